// Kernel-level scenarios, driven the way the CPU core drives the kernel:
// load registers, raise the interrupt, inspect registers and guest memory.

use std::fs;
use std::path::Path;

use dos86::cpu::CpuState;
use dos86::errors::Signal;
use dos86::memory::physical;
use dos86::{Configuration, DosKernel};

fn kernel_with_c(root: &Path) -> DosKernel {
    let _ = stderrlog::new().verbosity(2).init();
    let mut config = Configuration::default();
    config.mounts.push(('C', root.to_path_buf()));
    DosKernel::new(config).expect("kernel construction")
}

fn write_guest(kernel: &DosKernel, segment: u16, offset: u16, bytes: &[u8]) {
    kernel.bus().borrow_mut().write_bytes(physical(segment, offset), bytes);
}

fn write_asciz(kernel: &DosKernel, segment: u16, offset: u16, text: &str) {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    write_guest(kernel, segment, offset, &bytes);
}

fn read_guest(kernel: &DosKernel, segment: u16, offset: u16, len: usize) -> Vec<u8> {
    kernel.bus().borrow().read_bytes(physical(segment, offset), len)
}

fn read_word(kernel: &DosKernel, segment: u16, offset: u16) -> u16 {
    kernel.bus().borrow().read_u16(physical(segment, offset))
}

#[test]
fn com_program_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let mut com = vec![0xB4, 0x4C, 0xB0, 0x00, 0xCD, 0x21];
    com.resize(17, 0x90);
    fs::write(tmp.path().join("HELLO.COM"), &com).unwrap();

    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();
    kernel.load_program("C:\\HELLO.COM", "", &mut cpu).unwrap();

    assert_eq!((cpu.cs, cpu.ip), (0x0110, 0x0100));
    assert_eq!(cpu.ds, 0x0100);
    assert_eq!(cpu.ss, 0x0100);
    assert_eq!(read_guest(&kernel, 0x0110, 0x0000, 6), &com[..6]);
    // the PSP leads with the INT 20h stub
    assert_eq!(read_guest(&kernel, 0x0100, 0x0000, 2), [0xCD, 0x20]);

    // the program executes MOV AH,4Ch / MOV AL,0 / INT 21h
    cpu.ax = 0x4C00;
    let signal = kernel.interrupt(0x21, &mut cpu);
    assert!(matches!(signal, Signal::Halt(0)));

    cpu.ax = 0x4D00;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax, 0x0000, "normal termination, exit code 0");

    // nearly the whole heap is free again (the shell environment stays)
    cpu.ax = 0x4800;
    cpu.bx = 0x9E00;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry, "heap did not come back after exit");
}

#[test]
fn command_tail_lands_in_the_psp_with_parsed_fcbs() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("TINY.COM"), [0x90u8; 16]).unwrap();

    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();
    kernel.load_program("C:\\TINY.COM", "A.TXT B.DAT", &mut cpu).unwrap();

    let tail = read_guest(&kernel, 0x0100, 0x0080, 14);
    assert_eq!(tail[0], 12);
    assert_eq!(&tail[1..13], b" A.TXT B.DAT");
    assert_eq!(tail[13], 0x0D);
    assert_eq!(read_guest(&kernel, 0x0100, 0x5C + 1, 8), b"A       ");
    assert_eq!(read_guest(&kernel, 0x0100, 0x5C + 9, 3), b"TXT");
    assert_eq!(read_guest(&kernel, 0x0100, 0x6C + 1, 8), b"B       ");
    assert_eq!(read_guest(&kernel, 0x0100, 0x6C + 9, 3), b"DAT");
}

#[test]
fn create_write_find_first_scenario() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    // DTA at 0060:0080
    cpu.ax = 0x1A00;
    cpu.ds = 0x0060;
    cpu.dx = 0x0080;
    kernel.interrupt(0x21, &mut cpu);

    // create C:\A.TXT
    write_asciz(&kernel, 0x0050, 0x0000, "C:\\A.TXT");
    cpu.ax = 0x3C00;
    cpu.cx = 0;
    cpu.ds = 0x0050;
    cpu.dx = 0x0000;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    let handle = cpu.ax;
    assert_eq!(handle, 5, "first free slot after the standard handles");

    // write "hello"
    write_guest(&kernel, 0x0050, 0x0020, b"hello");
    cpu.ax = 0x4000;
    cpu.bx = handle;
    cpu.cx = 5;
    cpu.dx = 0x0020;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    assert_eq!(cpu.ax, 5);

    cpu.ax = 0x3E00;
    cpu.bx = handle;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);

    // find-first *.TXT fills the DTA record
    write_asciz(&kernel, 0x0050, 0x0040, "*.TXT");
    cpu.ax = 0x4E00;
    cpu.cx = 0;
    cpu.ds = 0x0050;
    cpu.dx = 0x0040;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    let record = read_guest(&kernel, 0x0060, 0x0080 + 0x15, 21);
    assert_eq!(record[0], 0x20, "archive attribute");
    let size = u32::from_le_bytes([record[5], record[6], record[7], record[8]]);
    assert_eq!(size, 5);
    assert_eq!(&record[9..20], b"A       TXT");
    assert_eq!(record[20], 0);

    // and find-next runs dry with code 18
    cpu.ax = 0x4F00;
    kernel.interrupt(0x21, &mut cpu);
    assert!(cpu.carry);
    assert_eq!(cpu.ax, 18);
}

#[test]
fn con_device_bypasses_the_filesystem() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    write_asciz(&kernel, 0x0050, 0x0000, "CON");
    cpu.ax = 0x3D01; // open for writing
    cpu.ds = 0x0050;
    cpu.dx = 0x0000;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    let handle = cpu.ax;

    write_guest(&kernel, 0x0050, 0x0020, b"ok\r\n");
    cpu.ax = 0x4000;
    cpu.bx = handle;
    cpu.cx = 4;
    cpu.dx = 0x0020;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    assert_eq!(cpu.ax, 4);

    cpu.ax = 0x3E00;
    cpu.bx = handle;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);

    assert!(!tmp.path().join("CON").exists(), "device write must not hit the host");
}

fn build_exe(min_alloc: u16, max_alloc: u16) -> Vec<u8> {
    // 32-byte header, 32-byte load module, one relocation at module:0000
    let mut exe = vec![0u8; 64];
    exe[0..2].copy_from_slice(b"MZ");
    exe[0x02..0x04].copy_from_slice(&64u16.to_le_bytes()); // bytes in last page
    exe[0x04..0x06].copy_from_slice(&1u16.to_le_bytes()); // pages
    exe[0x06..0x08].copy_from_slice(&1u16.to_le_bytes()); // relocation items
    exe[0x08..0x0A].copy_from_slice(&2u16.to_le_bytes()); // header paragraphs
    exe[0x0A..0x0C].copy_from_slice(&min_alloc.to_le_bytes());
    exe[0x0C..0x0E].copy_from_slice(&max_alloc.to_le_bytes());
    exe[0x0E..0x10].copy_from_slice(&0u16.to_le_bytes()); // initial SS
    exe[0x10..0x12].copy_from_slice(&0x0100u16.to_le_bytes()); // initial SP
    exe[0x14..0x16].copy_from_slice(&0x0010u16.to_le_bytes()); // initial IP
    exe[0x16..0x18].copy_from_slice(&0u16.to_le_bytes()); // initial CS
    exe[0x18..0x1A].copy_from_slice(&0x1Cu16.to_le_bytes()); // relocation table
    exe[0x1C..0x1E].copy_from_slice(&0u16.to_le_bytes()); // item offset
    exe[0x1E..0x20].copy_from_slice(&0u16.to_le_bytes()); // item segment
    exe[0x20..0x22].copy_from_slice(&0x1234u16.to_le_bytes()); // patched word
    exe
}

#[test]
fn exe_child_exec_and_parent_resume() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("PARENT.COM"), [0x90u8; 16]).unwrap();
    fs::write(tmp.path().join("CHILD.EXE"), build_exe(0, 0xFFFF)).unwrap();

    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();
    kernel.load_program("C:\\PARENT.COM", "", &mut cpu).unwrap();

    // the parent gives back everything above 0x200 paragraphs
    cpu.es = 0x0100;
    cpu.bx = 0x0200;
    cpu.ax = 0x4A00;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);

    // program name, parameter block and empty tail in parent memory
    write_asciz(&kernel, 0x0200, 0x0000, "C:\\CHILD.EXE");
    write_guest(&kernel, 0x0200, 0x0200, &[0x00, 0x0D]);
    let mut block = Vec::new();
    block.extend_from_slice(&0u16.to_le_bytes()); // inherit environment
    block.extend_from_slice(&0x0200u16.to_le_bytes()); // tail offset
    block.extend_from_slice(&0x0200u16.to_le_bytes()); // tail segment
    block.extend_from_slice(&[0u8; 8]); // FCB pointers unused
    write_guest(&kernel, 0x0200, 0x0100, &block);

    // pretend the parent got some way into its code
    cpu.ip = 0x0142;
    cpu.ax = 0x4B00;
    cpu.ds = 0x0200;
    cpu.dx = 0x0000;
    cpu.es = 0x0200;
    cpu.bx = 0x0100;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry, "exec failed: ax={:04X}", cpu.ax);

    // child PSP sits right behind the parent block, MaxAlloc 0xFFFF took
    // the largest free block
    let child_psp = 0x0301;
    let load_segment = child_psp + 0x10;
    assert_eq!(cpu.ds, child_psp);
    assert_eq!((cpu.cs, cpu.ip), (load_segment, 0x0010));
    assert_eq!((cpu.ss, cpu.sp), (load_segment, 0x0100));
    assert_eq!(read_word(&kernel, child_psp, 0x16), 0x0100, "parent link");
    // relocation added the load segment
    assert_eq!(read_word(&kernel, load_segment, 0x0000), 0x1234 + load_segment);
    // the child inherited the parent's standard handles
    assert_ne!(read_guest(&kernel, child_psp, 0x18, 1)[0], 0xFF);

    // child exits with code 1; the parent resumes where it left off
    cpu.ax = 0x4C01;
    let signal = kernel.interrupt(0x21, &mut cpu);
    assert!(matches!(signal, Signal::Ok));
    assert_eq!((cpu.cs, cpu.ip), (0x0110, 0x0142));
    assert_eq!((cpu.ss, cpu.sp), (0x0100, 0xFFFE));

    cpu.ax = 0x4D00;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax, 0x0001, "AH = normal termination, AL = exit code 1");
}

#[test]
fn allocation_services_report_the_largest_block() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    // strategy round trip
    cpu.ax = 0x5800;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    assert_eq!(cpu.ax, 0);
    cpu.ax = 0x5801;
    cpu.bx = 0x0001;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    cpu.ax = 0x5800;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax, 1);
    // reserved bits are rejected
    cpu.ax = 0x5801;
    cpu.bx = 0x0004;
    kernel.interrupt(0x21, &mut cpu);
    assert!(cpu.carry);
    assert_eq!(cpu.ax, 1);

    // probe the heap size with an impossible request
    cpu.ax = 0x4800;
    cpu.bx = 0xFFFF;
    kernel.interrupt(0x21, &mut cpu);
    assert!(cpu.carry);
    assert_eq!(cpu.ax, 8);
    let total = cpu.bx;

    cpu.ax = 0x4800;
    cpu.bx = 0x8000;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    let block = cpu.ax;

    cpu.ax = 0x4800;
    cpu.bx = 0x8000;
    kernel.interrupt(0x21, &mut cpu);
    assert!(cpu.carry);
    assert_eq!(cpu.ax, 8);
    assert_eq!(cpu.bx, total - 0x8001);

    cpu.ax = 0x4900;
    cpu.es = block;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    cpu.ax = 0x4800;
    cpu.bx = 0xFFFF;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.bx, total, "freeing coalesced the heap back");
}

#[test]
fn directory_services() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    write_asciz(&kernel, 0x0050, 0x0000, "C:\\GAMES");
    cpu.ax = 0x3900;
    cpu.ds = 0x0050;
    cpu.dx = 0x0000;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    assert!(tmp.path().join("GAMES").is_dir());

    cpu.ax = 0x3B00;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);

    // 47h: current directory without the leading backslash
    cpu.ax = 0x4700;
    cpu.dx = 0;
    cpu.ds = 0x0050;
    cpu.si = 0x0040;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
    assert_eq!(cpu.ax, 0x0100);
    assert_eq!(read_guest(&kernel, 0x0050, 0x0040, 6), b"GAMES\0");

    // removing the current directory is refused
    cpu.ax = 0x3A00;
    cpu.dx = 0x0000;
    kernel.interrupt(0x21, &mut cpu);
    assert!(cpu.carry);
    assert_eq!(cpu.ax, 16);

    // current drive is C
    cpu.ax = 0x1900;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax & 0x00FF, 2);
}

#[test]
fn date_time_services_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    cpu.ax = 0x2B00;
    cpu.cx = 1995;
    cpu.dx = 0x060F; // June 15th
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax & 0x00FF, 0);

    cpu.ax = 0x2A00;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.cx, 1995);
    assert_eq!(cpu.dx, 0x060F);
    assert_eq!(cpu.ax & 0x00FF, 4, "1995-06-15 was a Thursday");

    cpu.ax = 0x2D00;
    cpu.cx = 0x0B2D; // 11:45
    cpu.dx = 0x1E00; // :30.00
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax & 0x00FF, 0);
    cpu.ax = 0x2C00;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.cx & 0xFF00, 0x0B00);

    // invalid date reports FF in AL
    cpu.ax = 0x2B00;
    cpu.cx = 1995;
    cpu.dx = 0x021E; // February 30th
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax & 0x00FF, 0xFF);
}

#[test]
fn interrupt_vector_services() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    cpu.ax = 0x2580;
    cpu.ds = 0x1234;
    cpu.dx = 0x5678;
    kernel.interrupt(0x21, &mut cpu);

    cpu.ax = 0x3580;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!((cpu.es, cpu.bx), (0x1234, 0x5678));

    // unhooked vectors point at the BIOS dummy IRET
    cpu.ax = 0x3511;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!((cpu.es, cpu.bx), (0xF000, 0xFF53));
}

#[test]
fn fcb_parse_service_advances_si() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    write_asciz(&kernel, 0x0050, 0x0000, "C:FILE.TXT rest");
    cpu.ax = 0x2901;
    cpu.ds = 0x0050;
    cpu.si = 0x0000;
    cpu.es = 0x0050;
    cpu.di = 0x0030;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax & 0x00FF, 0);
    assert_eq!(cpu.si, 10);
    assert_eq!(read_guest(&kernel, 0x0050, 0x0030, 1)[0], 3, "drive C:");
    assert_eq!(read_guest(&kernel, 0x0050, 0x0031, 11), b"FILE    TXT");
}

#[test]
fn tsr_keeps_its_memory_block() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("STAY.COM"), [0x90u8; 32]).unwrap();

    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();
    kernel.load_program("C:\\STAY.COM", "", &mut cpu).unwrap();

    cpu.ax = 0x3107; // keep resident, exit code 7
    cpu.dx = 0x0020; // 32 paragraphs
    let signal = kernel.interrupt(0x21, &mut cpu);
    // the initial program went resident: the machine still halts, but the
    // block survives at its requested size
    assert!(matches!(signal, Signal::Halt(7)));
    let mcb = read_guest(&kernel, 0x00FF, 0x0000, 5);
    assert_eq!(mcb[0], 0x4D);
    assert_eq!(u16::from_le_bytes([mcb[1], mcb[2]]), 0x0100, "still owned");
    assert_eq!(u16::from_le_bytes([mcb[3], mcb[4]]), 0x0020);

    cpu.ax = 0x4D00;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax, 0x0307, "AH = TSR termination, AL = exit code");
}

#[test]
fn misc_service_contracts() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    // version
    cpu.ax = 0x3000;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax & 0x00FF, 5);
    assert_eq!(cpu.bx & 0xFF00, 0xFF00);

    // current PSP is the shell before anything is loaded
    cpu.ax = 0x6200;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.bx, 0x0060);

    // absolute disk access is a silent success
    let signal = kernel.interrupt(0x25, &mut cpu);
    assert!(matches!(signal, Signal::Ok));
    assert!(!cpu.carry);

    // multiplex: nothing installed
    cpu.ax = 0x1600;
    kernel.interrupt(0x2F, &mut cpu);
    assert_eq!(cpu.ax & 0x00FF, 0);

    // unknown INT 21h function fails with code 1
    cpu.ax = 0xA500;
    kernel.interrupt(0x21, &mut cpu);
    assert!(cpu.carry);
    assert_eq!(cpu.ax, 1);

    // DTA get/set round trip
    cpu.ax = 0x1A00;
    cpu.ds = 0x0123;
    cpu.dx = 0x0456;
    kernel.interrupt(0x21, &mut cpu);
    cpu.ax = 0x2F00;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!((cpu.es, cpu.bx), (0x0123, 0x0456));
}

#[test]
fn scratch_drive_serves_autoexec() {
    let tmp = tempfile::tempdir().unwrap();
    let mut kernel = kernel_with_c(tmp.path());
    let mut cpu = CpuState::new();

    write_asciz(&kernel, 0x0050, 0x0000, "Z:\\AUTOEXEC.BAT");
    cpu.ax = 0x3D00;
    cpu.ds = 0x0050;
    cpu.dx = 0x0000;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry, "Z: drive must always carry AUTOEXEC.BAT");
    let handle = cpu.ax;

    cpu.ax = 0x3F00;
    cpu.bx = handle;
    cpu.cx = 9;
    cpu.ds = 0x0050;
    cpu.dx = 0x00B0;
    kernel.interrupt(0x21, &mut cpu);
    assert_eq!(cpu.ax, 9);
    assert_eq!(read_guest(&kernel, 0x0050, 0x00B0, 9), b"@ECHO OFF");

    cpu.ax = 0x3E00;
    cpu.bx = handle;
    kernel.interrupt(0x21, &mut cpu);
    assert!(!cpu.carry);
}
