// The AH-keyed INT 21h service dispatch plus the small surrounding
// interrupts (20h, 25h, 26h, 27h, 2Fh). Every arm is a thin adapter from
// registers to a manager call; the error contract is CF=1 + AX=code on
// failure, CF=0 and service-specific registers on success.

use log::{debug, warn};

use crate::cp850;
use crate::cpu::CpuState;
use crate::errors::{DosError, DosResult, Signal, StreamError, StreamResult};
use crate::fcb;
use crate::files::{FileAttributes, OpenMode};
use crate::mcb::AllocationStrategy;
use crate::memory::{physical, SegOff};
use crate::process::{
    ExecParamBlock, TERMINATE_NORMAL, TERMINATE_RESIDENT,
};
use crate::DosKernel;

const DOS_MAJOR: u8 = 5;
const DOS_MINOR: u8 = 0;

impl DosKernel {
    /// Entry point for every guest INT the DOS layer owns.
    pub fn interrupt(&mut self, vector: u8, cpu: &mut CpuState) -> Signal {
        match vector {
            // DOS 1+ - TERMINATE PROGRAM
            0x20 => self.procs.terminate(
                &mut self.mem,
                &mut self.files,
                cpu,
                0,
                TERMINATE_NORMAL,
                None,
            ),
            0x21 => self.int21(cpu),
            // ABSOLUTE DISK READ/WRITE - succeed without touching anything,
            // mounted drives have no sector-level representation
            0x25 | 0x26 => {
                cpu.carry = false;
                Signal::Ok
            }
            // DOS 1+ - TERMINATE AND STAY RESIDENT, DX = bytes to keep
            0x27 => {
                let paragraphs = (cpu.dx / 16).wrapping_add(if cpu.dx % 16 != 0 { 1 } else { 0 });
                self.procs.terminate(
                    &mut self.mem,
                    &mut self.files,
                    cpu,
                    0,
                    TERMINATE_RESIDENT,
                    Some(paragraphs),
                )
            }
            // MULTIPLEX - nothing resident here
            0x2F => {
                cpu.set_al(0);
                Signal::Ok
            }
            _ => {
                warn!("unhandled interrupt {:02X}", vector);
                Signal::Ok
            }
        }
    }

    fn fail(&mut self, cpu: &mut CpuState, error: DosError) {
        debug!("service {:02X} failed: {}", cpu.ah(), error);
        self.last_error = error.code();
        cpu.carry = true;
        cpu.ax = error.code();
    }

    fn finish<T>(
        &mut self,
        cpu: &mut CpuState,
        result: DosResult<T>,
        apply: impl FnOnce(&mut CpuState, T),
    ) {
        match result {
            Ok(value) => {
                cpu.carry = false;
                apply(cpu, value);
            }
            Err(error) => self.fail(cpu, error),
        }
    }

    fn finish_stream<T>(
        &mut self,
        cpu: &mut CpuState,
        result: StreamResult<T>,
        apply: impl FnOnce(&mut CpuState, T),
    ) -> Signal {
        match result {
            Ok(value) => {
                cpu.carry = false;
                apply(cpu, value);
                Signal::Ok
            }
            Err(StreamError::Dos(error)) => {
                self.fail(cpu, error);
                Signal::Ok
            }
            Err(StreamError::Unrecoverable(e)) => Signal::Abort(format!("host i/o failure: {}", e)),
        }
    }

    fn read_dos_string(&self, segment: u16, offset: u16) -> String {
        let bytes = self.services.bus.borrow().read_zstring(physical(segment, offset), 128);
        cp850::decode(&bytes)
    }

    fn int21(&mut self, cpu: &mut CpuState) -> Signal {
        match cpu.ah() {
            // DOS 1+ - TERMINATE PROGRAM
            0x00 => {
                return self.procs.terminate(
                    &mut self.mem,
                    &mut self.files,
                    cpu,
                    0,
                    TERMINATE_NORMAL,
                    None,
                )
            }
            // DOS 1+ - READ CHARACTER FROM STANDARD INPUT, WITH ECHO
            0x01 => {
                let result = self.console_read_echo();
                return self.finish_stream(cpu, result, |cpu, byte| cpu.set_al(byte));
            }
            // DOS 1+ - WRITE CHARACTER TO STANDARD OUTPUT
            0x02 => {
                let dl = cpu.dl();
                let result = self.files.console_write(&[dl]);
                return self.finish_stream(cpu, result, |cpu, _| cpu.set_al(dl));
            }
            // DOS 1+ - DIRECT CONSOLE I/O: DL = FF reads, otherwise writes
            0x06 => {
                if cpu.dl() == 0xFF {
                    let result = self.files.console_read_byte();
                    return self.finish_stream(cpu, result, |cpu, byte| {
                        cpu.set_al(byte);
                        cpu.zero = false;
                    });
                }
                let dl = cpu.dl();
                let result = self.files.console_write(&[dl]);
                return self.finish_stream(cpu, result, |cpu, _| cpu.set_al(dl));
            }
            // DOS 1+ - DIRECT/FILTERED CHARACTER INPUT WITHOUT ECHO
            0x07 | 0x08 => {
                let result = self.files.console_read_byte();
                return self.finish_stream(cpu, result, |cpu, byte| cpu.set_al(byte));
            }
            // DOS 1+ - WRITE '$'-TERMINATED STRING TO STANDARD OUTPUT
            0x09 => {
                let mut bytes = Vec::new();
                {
                    let bus = self.services.bus.borrow();
                    let base = physical(cpu.ds, cpu.dx);
                    for i in 0..4096 {
                        let b = bus.read_u8(base + i);
                        if b == b'$' {
                            break;
                        }
                        bytes.push(b);
                    }
                }
                let result = self.files.console_write(&bytes);
                return self.finish_stream(cpu, result, |cpu, _| cpu.set_al(b'$'));
            }
            // DOS 1+ - BUFFERED INPUT at DS:DX: max byte, count byte, text
            0x0A => {
                let base = physical(cpu.ds, cpu.dx);
                let capacity = self.services.bus.borrow().read_u8(base);
                if capacity == 0 {
                    cpu.carry = false;
                    return Signal::Ok;
                }
                match self.files.console_read_line(capacity as usize - 1) {
                    Ok(line) => {
                        let mut bus = self.services.bus.borrow_mut();
                        bus.write_u8(base + 1, line.len() as u8);
                        bus.write_bytes(base + 2, &line);
                        bus.write_u8(base + 2 + line.len(), 0x0D);
                        cpu.carry = false;
                    }
                    Err(StreamError::Dos(error)) => self.fail(cpu, error),
                    Err(StreamError::Unrecoverable(e)) => {
                        return Signal::Abort(format!("host i/o failure: {}", e))
                    }
                }
            }
            // DOS 1+ - GET STDIN STATUS: report a character waiting, the
            // following read blocks anyway
            0x0B => {
                cpu.set_al(0xFF);
                cpu.carry = false;
            }
            // DOS 1+ - FLUSH BUFFER AND READ STANDARD INPUT
            0x0C => {
                let sub = cpu.al();
                if matches!(sub, 0x01 | 0x06 | 0x07 | 0x08 | 0x0A) {
                    let ah = cpu.ah();
                    cpu.set_ah(sub);
                    let signal = self.int21(cpu);
                    cpu.set_ah(ah);
                    return signal;
                }
                cpu.carry = false;
            }
            // DOS 1+ - DISK RESET
            0x0D => {
                cpu.carry = false;
            }
            // DOS 1+ - SELECT DEFAULT DRIVE, DL = 0 for A:
            0x0E => {
                let _ = self.services.drives.borrow_mut().set_current(cpu.dl());
                cpu.set_al(crate::paths::DRIVE_COUNT as u8);
                cpu.carry = false;
            }
            // DOS 1+ - GET CURRENT DEFAULT DRIVE
            0x19 => {
                let current = self.services.drives.borrow().current();
                cpu.set_al(current);
                cpu.carry = false;
            }
            // DOS 1+ - SET DISK TRANSFER AREA ADDRESS
            0x1A => {
                self.files.set_dta(SegOff::new(cpu.ds, cpu.dx));
                cpu.carry = false;
            }
            // DOS 1+ - SET INTERRUPT VECTOR
            0x25 => {
                self.services.bus.borrow_mut().write_ivt(cpu.al(), SegOff::new(cpu.ds, cpu.dx));
                cpu.carry = false;
            }
            // DOS 1+ - CREATE NEW PSP at segment DX
            0x26 => {
                let current = self.services.psps.borrow().current();
                let copy = self.services.bus.borrow().read_bytes(physical(current, 0), 256);
                self.services.bus.borrow_mut().write_bytes(physical(cpu.dx, 0), &copy);
                cpu.carry = false;
            }
            // DOS 1+ - PARSE FILENAME INTO FCB: DS:SI string, ES:DI FCB
            0x29 => {
                let source = self
                    .services
                    .bus
                    .borrow()
                    .read_bytes(physical(cpu.ds, cpu.si), 64);
                let parsed = fcb::parse_filename(
                    &self.services.bus,
                    SegOff::new(cpu.es, cpu.di),
                    cpu.al(),
                    &source,
                );
                cpu.set_al(parsed.result);
                cpu.si = cpu.si.wrapping_add(parsed.consumed);
                cpu.carry = false;
            }
            // DOS 1+ - GET SYSTEM DATE
            0x2A => {
                let clock = self.services.clock.borrow();
                use chrono::Datelike;
                let date = clock.date();
                cpu.set_al(clock.weekday());
                cpu.cx = date.year() as u16;
                cpu.set_dh(date.month() as u8);
                cpu.set_dl(date.day() as u8);
                cpu.carry = false;
            }
            // DOS 1+ - SET SYSTEM DATE: AL = 0 ok, FF invalid
            0x2B => {
                let result =
                    self.services.clock.borrow_mut().set_date(cpu.cx, cpu.dh(), cpu.dl());
                cpu.set_al(if result.is_ok() { 0 } else { 0xFF });
                cpu.carry = false;
            }
            // DOS 1+ - GET SYSTEM TIME
            0x2C => {
                let clock = self.services.clock.borrow();
                use chrono::Timelike;
                let time = clock.time();
                cpu.set_ch(time.hour() as u8);
                cpu.set_cl(time.minute() as u8);
                cpu.set_dh(time.second() as u8);
                cpu.set_dl(clock.centiseconds());
                cpu.carry = false;
            }
            // DOS 1+ - SET SYSTEM TIME: AL = 0 ok, FF invalid
            0x2D => {
                let result = self
                    .services
                    .clock
                    .borrow_mut()
                    .set_time(cpu.ch(), cpu.cl(), cpu.dh(), cpu.dl());
                cpu.set_al(if result.is_ok() { 0 } else { 0xFF });
                cpu.carry = false;
            }
            // DOS 1+ - SET VERIFY FLAG
            0x2E => {
                self.verify_flag = cpu.al() != 0;
                cpu.carry = false;
            }
            // DOS 2+ - GET DISK TRANSFER AREA ADDRESS
            0x2F => {
                let dta = self.files.dta();
                cpu.es = dta.segment;
                cpu.bx = dta.offset;
                cpu.carry = false;
            }
            // DOS 2+ - GET DOS VERSION
            0x30 => {
                cpu.set_al(DOS_MAJOR);
                cpu.set_ah(DOS_MINOR);
                cpu.set_bh(0xFF); // MS-DOS
                cpu.set_bl(0);
                cpu.cx = 0;
                cpu.carry = false;
            }
            // DOS 2+ - TERMINATE AND STAY RESIDENT
            0x31 => {
                let code = cpu.al();
                let paragraphs = cpu.dx;
                return self.procs.terminate(
                    &mut self.mem,
                    &mut self.files,
                    cpu,
                    code,
                    TERMINATE_RESIDENT,
                    Some(paragraphs),
                );
            }
            // DOS 2+ - EXTENDED BREAK CHECKING
            0x33 => match cpu.al() {
                0x00 => {
                    cpu.set_dl(self.break_flag as u8);
                    cpu.carry = false;
                }
                0x01 => {
                    self.break_flag = cpu.dl() != 0;
                    cpu.carry = false;
                }
                0x02 => {
                    let previous = self.break_flag;
                    self.break_flag = cpu.dl() != 0;
                    cpu.set_dl(previous as u8);
                    cpu.carry = false;
                }
                // boot drive, 1 = A:
                0x05 => {
                    cpu.set_dl(3);
                    cpu.carry = false;
                }
                // true DOS version
                0x06 => {
                    cpu.set_bl(DOS_MAJOR);
                    cpu.set_bh(DOS_MINOR);
                    cpu.dx = 0;
                    cpu.carry = false;
                }
                _ => self.fail(cpu, DosError::FunctionInvalid),
            },
            // DOS 2+ - GET INTERRUPT VECTOR
            0x35 => {
                let target = self.services.bus.borrow().read_ivt(cpu.al());
                cpu.es = target.segment;
                cpu.bx = target.offset;
                cpu.carry = false;
            }
            // DOS 2+ - GET DISK FREE SPACE, DL = 0 default or 1 = A:
            0x36 => {
                let drives = self.services.drives.borrow();
                let drive =
                    if cpu.dl() == 0 { drives.current() } else { cpu.dl().wrapping_sub(1) };
                if drives.is_mounted(drive) {
                    cpu.ax = 8; // sectors per cluster
                    cpu.bx = 0x1000; // free clusters
                    cpu.cx = 512; // bytes per sector
                    cpu.dx = 0x4000; // total clusters
                } else {
                    cpu.ax = 0xFFFF;
                }
                cpu.carry = false;
            }
            // DOS 2+ - GET/SET SWITCH CHARACTER
            0x37 => match cpu.al() {
                0x00 => {
                    cpu.set_dl(self.switch_char);
                    cpu.set_al(0);
                    cpu.carry = false;
                }
                0x01 => {
                    self.switch_char = cpu.dl();
                    cpu.set_al(0);
                    cpu.carry = false;
                }
                _ => {
                    cpu.set_al(0xFF);
                    cpu.carry = false;
                }
            },
            // DOS 2+ - GET COUNTRY INFORMATION (US table)
            0x38 => {
                if cpu.al() == 0 {
                    let base = physical(cpu.ds, cpu.dx);
                    let mut bus = self.services.bus.borrow_mut();
                    for i in 0..34 {
                        bus.write_u8(base + i, 0);
                    }
                    bus.write_u16(base, 0); // date format: month day year
                    bus.write_bytes(base + 2, b"$\0"); // currency symbol
                    bus.write_bytes(base + 7, b",\0"); // thousands separator
                    bus.write_bytes(base + 9, b".\0"); // decimal separator
                    bus.write_bytes(base + 11, b"-\0"); // date separator
                    bus.write_bytes(base + 13, b":\0"); // time separator
                    bus.write_u8(base + 16, 2); // currency decimal places
                    cpu.bx = 1; // country code USA
                    cpu.carry = false;
                } else {
                    self.fail(cpu, DosError::FunctionInvalid);
                }
            }
            // DOS 2+ - MKDIR
            0x39 => {
                let name = self.read_dos_string(cpu.ds, cpu.dx);
                let result = self.files.make_directory(&name);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - RMDIR
            0x3A => {
                let name = self.read_dos_string(cpu.ds, cpu.dx);
                let result = self.files.remove_directory(&name);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - CHDIR
            0x3B => {
                let name = self.read_dos_string(cpu.ds, cpu.dx);
                let result = self.files.change_directory(&name);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - CREAT - CREATE OR TRUNCATE FILE
            0x3C => {
                let name = self.read_dos_string(cpu.ds, cpu.dx);
                let attributes = FileAttributes::from_bits_truncate(cpu.cl());
                let result = self.files.create(&name, attributes);
                self.finish(cpu, result, |cpu, handle| cpu.ax = handle);
            }
            // DOS 2+ - OPEN EXISTING FILE
            0x3D => {
                let name = self.read_dos_string(cpu.ds, cpu.dx);
                let result = OpenMode::from_access_byte(cpu.al())
                    .and_then(|mode| self.files.open(&name, mode));
                self.finish(cpu, result, |cpu, handle| cpu.ax = handle);
            }
            // DOS 2+ - CLOSE FILE
            0x3E => {
                let result = self.files.close(cpu.bx);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - READ FROM FILE OR DEVICE
            0x3F => {
                let result = self.files.read(cpu.bx, SegOff::new(cpu.ds, cpu.dx), cpu.cx);
                return self.finish_stream(cpu, result, |cpu, read| cpu.ax = read);
            }
            // DOS 2+ - WRITE TO FILE OR DEVICE; CX = 0 truncates
            0x40 => {
                let result = self.files.write(cpu.bx, SegOff::new(cpu.ds, cpu.dx), cpu.cx);
                return self.finish_stream(cpu, result, |cpu, written| cpu.ax = written);
            }
            // DOS 2+ - UNLINK
            0x41 => {
                let name = self.read_dos_string(cpu.ds, cpu.dx);
                let result = self.files.delete(&name);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - LSEEK: AL = origin, CX:DX = offset, returns DX:AX
            0x42 => {
                let offset = (((cpu.cx as u32) << 16) | cpu.dx as u32) as i32;
                let result = self.files.seek(cpu.bx, cpu.al(), offset);
                return self.finish_stream(cpu, result, |cpu, position| {
                    cpu.ax = position as u16;
                    cpu.dx = (position >> 16) as u16;
                });
            }
            // DOS 2+ - GET/SET FILE ATTRIBUTES
            0x43 => {
                let name = self.read_dos_string(cpu.ds, cpu.dx);
                match cpu.al() {
                    0x00 => {
                        let result = self.files.attributes(&name);
                        self.finish(cpu, result, |cpu, attributes| {
                            cpu.cx = attributes.bits() as u16
                        });
                    }
                    0x01 => {
                        let attributes = FileAttributes::from_bits_truncate(cpu.cl());
                        let result = self.files.set_attributes(&name, attributes);
                        self.finish(cpu, result, |_, _| {});
                    }
                    _ => self.fail(cpu, DosError::FunctionInvalid),
                }
            }
            // DOS 2+ - IOCTL
            0x44 => match cpu.al() {
                0x00 => {
                    let result = self.files.device_info(cpu.bx);
                    self.finish(cpu, result, |cpu, info| cpu.dx = info);
                }
                0x01 => {
                    let result = self.files.device_info(cpu.bx).map(|_| ());
                    self.finish(cpu, result, |_, _| {});
                }
                // input/output status: always ready
                0x06 | 0x07 => {
                    let result = self.files.device_info(cpu.bx).map(|_| ());
                    self.finish(cpu, result, |cpu, _| cpu.set_al(0xFF));
                }
                // block device removability: fixed
                0x08 => {
                    cpu.ax = 1;
                    cpu.carry = false;
                }
                _ => self.fail(cpu, DosError::FunctionInvalid),
            },
            // DOS 2+ - DUP - DUPLICATE FILE HANDLE
            0x45 => {
                let result = self.files.duplicate(cpu.bx);
                self.finish(cpu, result, |cpu, handle| cpu.ax = handle);
            }
            // DOS 2+ - DUP2 - FORCE DUPLICATE FILE HANDLE
            0x46 => {
                let result = self.files.force_duplicate(cpu.bx, cpu.cx);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - CWD - GET CURRENT DIRECTORY into DS:SI
            0x47 => {
                let result = self.files.current_directory(cpu.dl());
                match result {
                    Ok(directory) => {
                        let bytes = cp850::encode(&directory);
                        let base = physical(cpu.ds, cpu.si);
                        let mut bus = self.services.bus.borrow_mut();
                        bus.write_bytes(base, &bytes[..bytes.len().min(63)]);
                        bus.write_u8(base + bytes.len().min(63), 0);
                        cpu.ax = 0x0100;
                        cpu.carry = false;
                    }
                    Err(error) => self.fail(cpu, error),
                }
            }
            // DOS 2+ - ALLOCATE MEMORY, BX = paragraphs
            0x48 => match self.mem.allocate(cpu.bx) {
                Ok(segment) => {
                    cpu.ax = segment;
                    cpu.carry = false;
                }
                Err(failure) => {
                    self.fail(cpu, failure.error);
                    cpu.bx = failure.largest_free;
                }
            },
            // DOS 2+ - FREE MEMORY, ES = block segment
            0x49 => {
                let result = self.mem.free(cpu.es);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - RESIZE MEMORY BLOCK, ES = block, BX = paragraphs
            0x4A => match self.mem.resize(cpu.es, cpu.bx) {
                Ok(()) => cpu.carry = false,
                Err(failure) => {
                    self.fail(cpu, failure.error);
                    cpu.bx = failure.largest_free;
                }
            },
            // DOS 2+ - EXEC - LOAD AND EXECUTE PROGRAM
            0x4B => {
                if cpu.al() != 0 {
                    self.fail(cpu, DosError::FunctionInvalid);
                    return Signal::Ok;
                }
                let name = self.read_dos_string(cpu.ds, cpu.dx);
                let block = ExecParamBlock::read(&self.services, SegOff::new(cpu.es, cpu.bx));
                let result = self.procs.load_and_exec(
                    &mut self.mem,
                    &mut self.files,
                    cpu,
                    &name,
                    Some(&block),
                    &[],
                    None,
                    false,
                );
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - EXIT - TERMINATE WITH RETURN CODE
            0x4C => {
                let code = cpu.al();
                return self.procs.terminate(
                    &mut self.mem,
                    &mut self.files,
                    cpu,
                    code,
                    TERMINATE_NORMAL,
                    None,
                );
            }
            // DOS 2+ - GET RETURN CODE OF CHILD
            0x4D => {
                let (code, kind) = self.procs.exit_code();
                cpu.set_al(code);
                cpu.set_ah(kind);
                cpu.carry = false;
            }
            // DOS 2+ - FINDFIRST, CX = attribute mask, DS:DX = spec
            0x4E => {
                let spec = self.read_dos_string(cpu.ds, cpu.dx);
                let attributes = FileAttributes::from_bits_truncate(cpu.cl());
                let result = self.files.find_first(&spec, attributes);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - FINDNEXT
            0x4F => {
                let result = self.files.find_next();
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ internal - SET CURRENT PSP
            0x50 => {
                self.services.psps.borrow_mut().set_current(cpu.bx);
                cpu.carry = false;
            }
            // DOS 2+ internal - GET CURRENT PSP
            0x51 | 0x62 => {
                cpu.bx = self.services.psps.borrow().current();
                cpu.carry = false;
            }
            // DOS 2+ - GET VERIFY FLAG
            0x54 => {
                cpu.set_al(self.verify_flag as u8);
                cpu.carry = false;
            }
            // DOS 2+ - RENAME FILE: DS:DX old, ES:DI new
            0x56 => {
                let old = self.read_dos_string(cpu.ds, cpu.dx);
                let new = self.read_dos_string(cpu.es, cpu.di);
                let result = self.files.rename(&old, &new);
                self.finish(cpu, result, |_, _| {});
            }
            // DOS 2+ - GET/SET FILE DATE AND TIME
            0x57 => match cpu.al() {
                0x00 => {
                    let result = self.files.file_times(cpu.bx);
                    self.finish(cpu, result, |cpu, (date, time)| {
                        cpu.cx = time;
                        cpu.dx = date;
                    });
                }
                0x01 => {
                    let result = self.files.set_file_times(cpu.bx, cpu.dx, cpu.cx);
                    self.finish(cpu, result, |_, _| {});
                }
                _ => self.fail(cpu, DosError::FunctionInvalid),
            },
            // DOS 2.11+ - GET/SET MEMORY ALLOCATION STRATEGY
            0x58 => match cpu.al() {
                0x00 => {
                    cpu.ax = self.mem.strategy().raw();
                    cpu.carry = false;
                }
                0x01 => match AllocationStrategy::from_raw(cpu.bx) {
                    Ok(strategy) => {
                        self.mem.set_strategy(strategy);
                        cpu.carry = false;
                    }
                    Err(error) => self.fail(cpu, error),
                },
                // UMB link state: no upper memory blocks
                0x02 => {
                    cpu.set_al(0);
                    cpu.carry = false;
                }
                _ => self.fail(cpu, DosError::FunctionInvalid),
            },
            // DOS 3+ - GET EXTENDED ERROR INFORMATION
            0x59 => {
                cpu.ax = self.last_error;
                cpu.set_bh(0x01); // class: out of resource
                cpu.set_bl(0x05); // action: immediate abort
                cpu.set_ch(0x01); // locus: unknown
                cpu.carry = false;
            }
            // DOS 3+ - FILE LOCKING: region locks are meaningless here
            0x5C => {
                cpu.carry = false;
            }
            // DOS 3.3+ - COMMIT FILE
            0x68 => {
                let result = self.files.commit(cpu.bx);
                return self.finish_stream(cpu, result, |_, _| {});
            }
            // DOS 4+ - EXTENDED OPEN/CREATE
            0x6C => {
                let name = self.read_dos_string(cpu.ds, cpu.si);
                let action = cpu.dx;
                let attributes = FileAttributes::from_bits_truncate(cpu.cl());
                let mode = OpenMode::from_access_byte(cpu.bl());
                let exists = self
                    .services
                    .drives
                    .borrow()
                    .resolve(&name, false)
                    .map(|p| p.exists())
                    .unwrap_or(false);
                let result = mode.and_then(|mode| {
                    if exists {
                        if action & 0x0002 != 0 {
                            self.files.create(&name, attributes).map(|h| (h, 3u16))
                        } else if action & 0x0001 != 0 {
                            self.files.open(&name, mode).map(|h| (h, 1u16))
                        } else {
                            Err(DosError::AccessDenied)
                        }
                    } else if action & 0x0010 != 0 {
                        self.files.create(&name, attributes).map(|h| (h, 2u16))
                    } else {
                        Err(DosError::FileNotFound)
                    }
                });
                self.finish(cpu, result, |cpu, (handle, status)| {
                    cpu.ax = handle;
                    cpu.cx = status;
                });
            }
            unknown => {
                warn!("int21 unknown function ah={:02X} ax={:04X}", unknown, cpu.ax);
                self.fail(cpu, DosError::FunctionInvalid);
            }
        }
        Signal::Ok
    }

    fn console_read_echo(&mut self) -> StreamResult<u8> {
        let byte = self.files.console_read_byte()?;
        self.files.console_write(&[byte])?;
        Ok(byte)
    }
}
