//! The DOS side of a real-mode 8086 emulator: conventional-memory
//! allocator, process and PSP lifecycle, host-mapped drives with DOS
//! filename semantics, and the INT 20h/21h/25h/26h/2Fh service layer.
//!
//! The CPU itself lives elsewhere; it hands a [`cpu::CpuState`] to
//! [`DosKernel::interrupt`] at every INT boundary and resumes with whatever
//! register state the service left behind.

use std::cell::RefCell;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;

pub mod clock;
pub mod cp850;
pub mod cpu;
pub mod errors;
pub mod fcb;
pub mod files;
pub mod image;
mod interrupts;
pub mod machine;
pub mod mcb;
pub mod memory;
pub mod paths;
pub mod process;
pub mod psp;
pub mod wildcard;

use clock::VirtualClock;
use cpu::CpuState;
use errors::DosResult;
use files::FileManager;
use mcb::MemoryManager;
use memory::{BusPtr, MemoryBus, SegOff};
use paths::DriveMap;
use process::ProcessManager;
use psp::PspTracker;

/// Shared leaf state (bus, clock, PSP stack, drive table). Every manager
/// holds a clone; none of them holds another manager.
#[derive(Clone)]
pub struct Services {
    pub bus: BusPtr,
    pub clock: Rc<RefCell<VirtualClock>>,
    pub psps: Rc<RefCell<PspTracker>>,
    pub drives: Rc<RefCell<DriveMap>>,
}

impl Services {
    pub fn new(bus: BusPtr, sda_current_psp: SegOff) -> Self {
        Services {
            clock: Rc::new(RefCell::new(VirtualClock::new())),
            psps: Rc::new(RefCell::new(PspTracker::new(bus.clone(), sda_current_psp))),
            drives: Rc::new(RefCell::new(DriveMap::new())),
            bus,
        }
    }
}

pub struct Configuration {
    pub root_psp_segment: u16,
    /// PSP segment of the first program; the MCB chain starts one
    /// paragraph below it.
    pub program_segment: u16,
    pub last_free_segment: u16,
    pub device_driver_segment: u16,
    pub sda_segment: u16,
    pub current_drive: char,
    pub mounts: Vec<(char, PathBuf)>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            root_psp_segment: machine::DEFAULT_ROOT_PSP_SEGMENT,
            program_segment: machine::DEFAULT_PROGRAM_SEGMENT,
            last_free_segment: machine::DEFAULT_LAST_FREE_SEGMENT,
            device_driver_segment: machine::DEFAULT_DEVICE_DRIVER_SEGMENT,
            sda_segment: machine::DEFAULT_SDA_SEGMENT,
            current_drive: 'C',
            mounts: Vec::new(),
        }
    }
}

/// The kernel: owns the three managers and is the only component that
/// knows all of them. The interrupt dispatcher lives in `interrupts`.
pub struct DosKernel {
    pub(crate) services: Services,
    pub(crate) mem: MemoryManager,
    pub(crate) files: FileManager,
    pub(crate) procs: ProcessManager,
    program_segment: u16,
    pub(crate) verify_flag: bool,
    pub(crate) break_flag: bool,
    pub(crate) switch_char: u8,
    pub(crate) last_error: u16,
}

fn config_error(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

impl DosKernel {
    pub fn new(config: Configuration) -> io::Result<DosKernel> {
        let bus = MemoryBus::new();
        machine::seed_low_memory(&bus, config.device_driver_segment);

        let sda = SegOff::new(config.sda_segment, machine::SDA_CURRENT_PSP_OFFSET);
        let services = Services::new(bus, sda);
        {
            let mut drives = services.drives.borrow_mut();
            for (letter, root) in &config.mounts {
                drives
                    .mount(*letter, root.clone())
                    .map_err(|e| config_error(format!("mount {}: {}", letter, e)))?;
            }
            drives.mount_scratch()?;
            let current = paths::drive_index(config.current_drive)
                .map_err(|e| config_error(e.to_string()))?;
            drives
                .set_current(current)
                .map_err(|e| config_error(format!("current drive {}: {}", config.current_drive, e)))?;
        }

        services.psps.borrow_mut().push(config.root_psp_segment);
        let mut mem = MemoryManager::new(&services, config.program_segment, config.last_free_segment);
        let mut files = FileManager::new(&services);
        let procs = ProcessManager::new(&services);

        // shell environment block, owned by the root PSP
        let environment = {
            let mut block = Vec::new();
            block.extend_from_slice(b"PATH=Z:\\;C:\\\0COMSPEC=Z:\\COMMAND.COM\0");
            block.push(0);
            block.extend_from_slice(&1u16.to_le_bytes());
            block.extend_from_slice(b"Z:\\COMMAND.COM\0");
            let paragraphs = ((block.len() + 15) / 16) as u16;
            let segment = mem
                .allocate_environment(paragraphs)
                .map_err(|f| config_error(format!("shell environment: {}", f.error)))?;
            mcb::Mcb::at(&services.bus, segment - 1).set_owner_name("COMMAND");
            services.bus.borrow_mut().write_bytes(memory::physical(segment, 0), &block);
            segment
        };
        psp::synthesize_root(
            &services.bus,
            config.root_psp_segment,
            config.last_free_segment + 1,
            environment,
        );
        files.install_default_handles();
        files.set_dta(SegOff::new(config.root_psp_segment, psp::COMMAND_TAIL_OFFSET));

        Ok(DosKernel {
            services,
            mem,
            files,
            procs,
            program_segment: config.program_segment,
            verify_flag: false,
            break_flag: false,
            switch_char: b'/',
            last_error: 0,
        })
    }

    /// Loads the first program and points the CPU state at its entry.
    pub fn load_program(
        &mut self,
        program: &str,
        arguments: &str,
        cpu: &mut CpuState,
    ) -> DosResult<()> {
        self.procs.load_first_program(
            &mut self.mem,
            &mut self.files,
            cpu,
            program,
            arguments,
            self.program_segment,
        )
    }

    pub fn bus(&self) -> BusPtr {
        self.services.bus.clone()
    }

    pub fn services(&self) -> &Services {
        &self.services
    }
}
