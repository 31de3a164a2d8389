use log::{debug, info};
use std::fs;

use crate::cpu::CpuState;
use crate::errors::{DosError, DosResult, Signal};
use crate::fcb;
use crate::files::FileManager;
use crate::image::{self, ProgramImage};
use crate::mcb::{Mcb, MemoryManager};
use crate::memory::{physical, SegOff};
use crate::psp::{Psp, COMMAND_TAIL_OFFSET, PSP_PARAGRAPHS};
use crate::Services;

pub const TERMINATE_NORMAL: u8 = 0;
pub const TERMINATE_CTRL_C: u8 = 1;
pub const TERMINATE_CRITICAL_ERROR: u8 = 2;
pub const TERMINATE_RESIDENT: u8 = 3;

const COM_ENTRY_OFFSET: u16 = 0x0100;
const DEFAULT_ENVIRONMENT: &[u8] = b"PATH=Z:\\;C:\\\0COMSPEC=Z:\\COMMAND.COM\0";

/// INT 21h 4Bh parameter block at ES:BX: environment segment, then far
/// pointers to the command tail and the two FCB templates.
pub struct ExecParamBlock {
    pub environment_segment: u16,
    pub command_tail: SegOff,
    pub fcb1: SegOff,
    pub fcb2: SegOff,
}

impl ExecParamBlock {
    pub fn read(services: &Services, at: SegOff) -> Self {
        let bus = services.bus.borrow();
        let base = at.physical();
        ExecParamBlock {
            environment_segment: bus.read_u16(base),
            command_tail: SegOff::new(bus.read_u16(base + 4), bus.read_u16(base + 2)),
            fcb1: SegOff::new(bus.read_u16(base + 8), bus.read_u16(base + 6)),
            fcb2: SegOff::new(bus.read_u16(base + 12), bus.read_u16(base + 10)),
        }
    }
}

/// EXEC and terminate. The manager owns no other manager; the dispatcher
/// lends it the allocator and the file manager per call.
pub struct ProcessManager {
    services: Services,
}

impl ProcessManager {
    pub fn new(services: &Services) -> Self {
        ProcessManager { services: services.clone() }
    }

    /// INT 21h 4Bh subfunction 0. On success the CPU state carries the
    /// child's CS:IP and SS:SP and the child PSP is current.
    pub fn load_and_exec(
        &mut self,
        mem: &mut MemoryManager,
        files: &mut FileManager,
        cpu: &mut CpuState,
        program: &str,
        params: Option<&ExecParamBlock>,
        default_tail: &[u8],
        load_at: Option<u16>,
        mark_initial: bool,
    ) -> DosResult<()> {
        let host_path = self.services.drives.borrow().resolve(program, false)?;
        let data = fs::read(&host_path).map_err(|_| DosError::FileNotFound)?;
        let image = image::classify(program, data)?;

        let (min, max) = match &image {
            ProgramImage::Com(_) => (0, 0),
            ProgramImage::Exe { header, .. } => {
                let module = (header.load_module_size() + 15) as u32 / 16;
                let min = module + header.min_alloc as u32 + PSP_PARAGRAPHS as u32;
                let max = module + header.max_alloc as u32 + PSP_PARAGRAPHS as u32;
                if min > 0xFFFF {
                    return Err(DosError::InsufficientMemory);
                }
                (min as u16, max.min(0xFFFF) as u16)
            }
        };
        let parent_segment = self.services.psps.borrow().current();
        let parent = Psp::at(&self.services.bus, parent_segment);

        // the environment block sits below the program block, so build it
        // first; re-stamp its owner once the child PSP segment is known
        let built_environment = match params {
            Some(block) if block.environment_segment != 0 => None,
            _ => Some(self.build_environment(mem, &parent, program, parent_segment)?),
        };

        let reserved = mem.reserve_program_block(min, max, load_at);
        let (psp_segment, block_size) = match reserved {
            Ok(block) => block,
            Err(failure) => {
                if let Some(environment) = built_environment {
                    mem.free(environment).ok();
                }
                return Err(failure.error);
            }
        };

        // a COM image gets no fit check from the header, so do it here
        // while the reservation is still trivially reversible
        if let ProgramImage::Com(bytes) = &image {
            let capacity = (block_size - PSP_PARAGRAPHS) as usize * 16;
            if bytes.len() > capacity {
                mem.free(psp_segment).ok();
                if let Some(environment) = built_environment {
                    mem.free(environment).ok();
                }
                return Err(DosError::InsufficientMemory);
            }
        }
        Mcb::at(&self.services.bus, psp_segment - 1).set_owner_name(program_stem(program));
        if let Some(environment) = built_environment {
            Mcb::at(&self.services.bus, environment - 1).set_owner(psp_segment);
        }

        let caller = SegOff::new(cpu.cs, cpu.ip);
        let caller_stack = SegOff::new(cpu.ss, cpu.sp);

        let child = Psp::at(&self.services.bus, psp_segment);
        child.init();
        child.set_next_segment(psp_segment.wrapping_add(block_size));
        child.set_parent_psp(parent_segment);

        // INT 22h copy doubles as the parent resume point; INT 23h/24h come
        // from the parent unless it never had them
        let resume = if caller.is_zero() { parent.terminate_address() } else { caller };
        child.set_terminate_address(resume);
        let (int23, int24) = if parent.break_address().is_zero() {
            let bus = self.services.bus.borrow();
            (bus.read_ivt(0x23), bus.read_ivt(0x24))
        } else {
            (parent.break_address(), parent.critical_error_address())
        };
        child.set_break_address(int23);
        child.set_critical_error_address(int24);
        child.set_saved_stack(caller_stack);
        parent.set_saved_stack(caller_stack);

        files.clone_jft(parent_segment, psp_segment);

        let environment = match (built_environment, params) {
            (Some(segment), _) => segment,
            (None, Some(block)) => block.environment_segment,
            (None, None) => 0,
        };
        child.set_environment_segment(environment);

        let tail = match params {
            Some(block) => {
                let bus = self.services.bus.borrow();
                let base = block.command_tail.physical();
                let len = bus.read_u8(base) as usize;
                bus.read_bytes(base + 1, len.min(126))
            }
            None => default_tail.to_vec(),
        };
        child.set_command_tail(&tail);
        let first = fcb::parse_filename(&self.services.bus, child.fcb1(), 0x01, &tail);
        fcb::parse_filename(
            &self.services.bus,
            child.fcb2(),
            0x01,
            &tail[(first.consumed as usize).min(tail.len())..],
        );

        match image {
            ProgramImage::Com(bytes) => {
                let load_segment = psp_segment + PSP_PARAGRAPHS;
                self.services
                    .bus
                    .borrow_mut()
                    .write_bytes(physical(load_segment, 0), &bytes);
                let block_bytes = block_size as u32 * 16;
                let sp = if block_bytes >= 0x1_0000 { 0xFFFE } else { (block_bytes - 2) as u16 };
                cpu.cs = load_segment;
                cpu.ip = COM_ENTRY_OFFSET;
                cpu.ds = psp_segment;
                cpu.es = psp_segment;
                cpu.ss = psp_segment;
                cpu.sp = sp;
                // a RET from the entry point lands on the PSP INT 20h stub
                self.services.bus.borrow_mut().write_u16(physical(psp_segment, sp), 0);
            }
            ProgramImage::Exe { header, data } => {
                let load_segment = psp_segment + PSP_PARAGRAPHS;
                let start = header.header_size().min(data.len());
                let end = (start + header.load_module_size()).min(data.len());
                self.services
                    .bus
                    .borrow_mut()
                    .write_bytes(physical(load_segment, 0), &data[start..end]);
                for entry in header.relocations(&data) {
                    let addr = physical(load_segment.wrapping_add(entry.segment), entry.offset);
                    let mut bus = self.services.bus.borrow_mut();
                    let word = bus.read_u16(addr);
                    bus.write_u16(addr, word.wrapping_add(load_segment));
                }
                cpu.cs = header.init_cs.wrapping_add(load_segment);
                cpu.ip = header.init_ip;
                cpu.ss = header.init_ss.wrapping_add(load_segment);
                cpu.sp = header.init_sp;
                cpu.ds = psp_segment;
                cpu.es = psp_segment;
            }
        }
        cpu.ax = 0;

        files.set_dta(SegOff::new(psp_segment, COMMAND_TAIL_OFFSET));
        self.services.psps.borrow_mut().push(psp_segment);
        if mark_initial {
            self.services.psps.borrow_mut().mark_initial_program(psp_segment);
        }
        info!(
            "exec {} at {:04X} ({} paragraphs), entry {:04X}:{:04X}",
            program, psp_segment, block_size, cpu.cs, cpu.ip
        );
        Ok(())
    }

    /// First program of the run, honoring the configured load address.
    pub fn load_first_program(
        &mut self,
        mem: &mut MemoryManager,
        files: &mut FileManager,
        cpu: &mut CpuState,
        program: &str,
        arguments: &str,
        load_segment: u16,
    ) -> DosResult<()> {
        let mut tail = Vec::with_capacity(arguments.len() + 1);
        if !arguments.is_empty() {
            tail.push(b' ');
            tail.extend_from_slice(arguments.as_bytes());
        }
        self.load_and_exec(mem, files, cpu, program, None, &tail, Some(load_segment), true)
    }

    /// Copies the parent's environment (or the built-in one) into a fresh
    /// block owned by the child, appending the program's full DOS path the
    /// way DOS 3+ does.
    fn build_environment(
        &mut self,
        mem: &mut MemoryManager,
        parent: &Psp,
        program: &str,
        owner: u16,
    ) -> DosResult<u16> {
        let variables = match parent.environment_segment() {
            0 => DEFAULT_ENVIRONMENT.to_vec(),
            segment => {
                let bus = self.services.bus.borrow();
                let base = physical(segment, 0);
                let mut bytes = Vec::new();
                // variable area ends at a double NUL, bounded to 32 KiB
                let mut i = 0;
                while i < 0x8000 {
                    let b = bus.read_u8(base + i);
                    if b == 0 && bytes.last() == Some(&0) {
                        break;
                    }
                    bytes.push(b);
                    i += 1;
                }
                if bytes.is_empty() {
                    bytes.push(0);
                }
                bytes
            }
        };
        let full_path = self.canonical_program_path(program)?;
        let mut block = variables;
        block.push(0);
        block.extend_from_slice(&1u16.to_le_bytes());
        block.extend_from_slice(full_path.as_bytes());
        block.push(0);

        let paragraphs = ((block.len() + 15) / 16) as u16;
        let segment = mem.allocate_environment(paragraphs).map_err(|failure| failure.error)?;
        Mcb::at(&self.services.bus, segment - 1).set_owner(owner);
        Mcb::at(&self.services.bus, segment - 1).set_owner_name(program_stem(program));
        self.services.bus.borrow_mut().write_bytes(physical(segment, 0), &block);
        Ok(segment)
    }

    fn canonical_program_path(&self, program: &str) -> DosResult<String> {
        let drives = self.services.drives.borrow();
        let (drive, components) = drives.normalize(program)?;
        let mut path = String::new();
        path.push(crate::paths::drive_letter(drive));
        path.push_str(":\\");
        path.push_str(&components.join("\\").to_ascii_uppercase());
        Ok(path)
    }

    /// Common tail of INT 20h, INT 21h 00h/31h/4Ch and INT 27h.
    pub fn terminate(
        &mut self,
        mem: &mut MemoryManager,
        files: &mut FileManager,
        cpu: &mut CpuState,
        code: u8,
        kind: u8,
        keep_paragraphs: Option<u16>,
    ) -> Signal {
        let exiting = self.services.psps.borrow().current();
        let psp = Psp::at(&self.services.bus, exiting);

        match keep_paragraphs {
            Some(paragraphs) => {
                // TSR keeps its block and its open handles
                if let Err(failure) = mem.resize(exiting, paragraphs) {
                    debug!("tsr resize to {} paragraphs failed: {}", paragraphs, failure.error);
                }
            }
            None => {
                files.close_all(exiting);
                mem.free_owned_by(exiting);
            }
        }

        let initial = self.services.psps.borrow().is_initial_program(exiting);
        {
            let mut psps = self.services.psps.borrow_mut();
            psps.record_exit(code, kind);
            if psps.depth() > 1 {
                psps.pop();
            }
        }
        if initial {
            info!("initial program terminated, exit code {}", code);
            return Signal::Halt(code);
        }

        let resume = psp.terminate_address();
        let stack = psp.saved_stack();
        cpu.cs = resume.segment;
        cpu.ip = resume.offset;
        cpu.ss = stack.segment;
        cpu.sp = stack.offset;
        cpu.carry = false;
        Signal::Ok
    }

    /// INT 21h 4Dh.
    pub fn exit_code(&self) -> (u8, u8) {
        self.services.psps.borrow().last_exit()
    }
}

fn program_stem(program: &str) -> &str {
    let base = program.rsplit(|c| c == '\\' || c == '/').next().unwrap_or(program);
    let base = base.split(':').last().unwrap_or(base);
    base.split('.').next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;

    #[test]
    fn param_block_layout() {
        let bus = MemoryBus::new();
        let services = Services::new(bus, SegOff::new(0x00B2, 0x0010));
        {
            let mut mem = services.bus.borrow_mut();
            let base = physical(0x0200, 0x0010);
            mem.write_u16(base, 0x1234); // environment
            mem.write_u16(base + 2, 0x0080); // tail offset
            mem.write_u16(base + 4, 0x0500); // tail segment
            mem.write_u16(base + 6, 0x005C);
            mem.write_u16(base + 8, 0x0500);
            mem.write_u16(base + 10, 0x006C);
            mem.write_u16(base + 12, 0x0500);
        }
        let block = ExecParamBlock::read(&services, SegOff::new(0x0200, 0x0010));
        assert_eq!(block.environment_segment, 0x1234);
        assert_eq!(block.command_tail, SegOff::new(0x0500, 0x0080));
        assert_eq!(block.fcb1, SegOff::new(0x0500, 0x005C));
        assert_eq!(block.fcb2, SegOff::new(0x0500, 0x006C));
    }

    #[test]
    fn program_stem_strips_path_and_extension() {
        assert_eq!(program_stem("C:\\GAMES\\HELLO.COM"), "HELLO");
        assert_eq!(program_stem("PLAY.EXE"), "PLAY");
        assert_eq!(program_stem("C:TINY"), "TINY");
    }
}
