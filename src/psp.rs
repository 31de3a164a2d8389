use std::rc::Rc;

use crate::memory::{physical, BusPtr, SegOff};

pub const PSP_PARAGRAPHS: u16 = 16; // 256 bytes
pub const JFT_ENTRIES: usize = 20;
pub const JFT_CLOSED: u8 = 0xFF;

// Program Segment Prefix layout (offsets within the 256-byte prefix):
//   $00.W   INT 20h exit stub (CD 20)
//   $02.W   segment just past the program's allocation
//   $05     CP/M service request (far call stub)
//   $0A.L   INT 22h terminate vector copy
//   $0E.L   INT 23h break vector copy
//   $12.L   INT 24h critical error vector copy
//   $16.W   parent PSP segment
//   $18     job file table, 20 bytes, FF = closed
//   $2C.W   environment segment
//   $2E.L   caller SS:SP, saved on EXEC
//   $32.W   JFT capacity
//   $34.L   far pointer to the JFT
//   $38.L   previous PSP far pointer
//   $40.W   DOS version to report
//   $50     INT 21h service stub (CD 21 CB)
//   $5C     FCB 1
//   $6C     FCB 2
//   $80     command tail: length byte, bytes, CR
const EXIT_STUB: usize = 0x00;
const NEXT_SEGMENT: usize = 0x02;
const CPM_SERVICE_REQUEST: usize = 0x05;
const TERMINATE_ADDRESS: usize = 0x0A;
const BREAK_ADDRESS: usize = 0x0E;
const CRITICAL_ERROR_ADDRESS: usize = 0x12;
const PARENT_PSP: usize = 0x16;
const JFT: usize = 0x18;
const ENVIRONMENT_SEGMENT: usize = 0x2C;
const SAVED_SS_SP: usize = 0x2E;
const MAX_OPEN_FILES: usize = 0x32;
const JFT_FAR_POINTER: usize = 0x34;
const PREVIOUS_PSP: usize = 0x38;
const DOS_VERSION: usize = 0x40;
const SERVICE_STUB: usize = 0x50;
pub const FCB1_OFFSET: u16 = 0x5C;
pub const FCB2_OFFSET: u16 = 0x6C;
pub const COMMAND_TAIL_OFFSET: u16 = 0x80;

/// View of a Program Segment Prefix in guest memory.
#[derive(Clone)]
pub struct Psp {
    bus: BusPtr,
    pub segment: u16,
}

impl Psp {
    pub fn at(bus: &BusPtr, segment: u16) -> Self {
        Psp { bus: Rc::clone(bus), segment }
    }

    fn base(&self) -> usize {
        physical(self.segment, 0)
    }

    fn read_u16(&self, offset: usize) -> u16 {
        self.bus.borrow().read_u16(self.base() + offset)
    }
    fn write_u16(&self, offset: usize, value: u16) {
        self.bus.borrow_mut().write_u16(self.base() + offset, value);
    }
    fn read_far(&self, offset: usize) -> SegOff {
        let bus = self.bus.borrow();
        SegOff::new(bus.read_u16(self.base() + offset + 2), bus.read_u16(self.base() + offset))
    }
    fn write_far(&self, offset: usize, value: SegOff) {
        let mut bus = self.bus.borrow_mut();
        bus.write_u16(self.base() + offset, value.offset);
        bus.write_u16(self.base() + offset + 2, value.segment);
    }

    /// Writes the fixed prefix template; callers fill the process-specific
    /// fields afterwards.
    pub fn init(&self) {
        let mut bus = self.bus.borrow_mut();
        let base = self.base();
        for i in 0..256 {
            bus.write_u8(base + i, 0);
        }
        bus.write_bytes(base + EXIT_STUB, &[0xCD, 0x20]);
        bus.write_bytes(base + CPM_SERVICE_REQUEST, &[0x9A, 0xF0, 0xFE, 0x1D, 0xF0]);
        bus.write_u16(base + MAX_OPEN_FILES, JFT_ENTRIES as u16);
        bus.write_u16(base + JFT_FAR_POINTER, JFT as u16);
        bus.write_u16(base + JFT_FAR_POINTER + 2, self.segment);
        bus.write_u32(base + PREVIOUS_PSP, 0xFFFF_FFFF);
        bus.write_bytes(base + DOS_VERSION, &[5, 0]);
        bus.write_bytes(base + SERVICE_STUB, &[0xCD, 0x21, 0xCB]);
        for i in 0..JFT_ENTRIES {
            bus.write_u8(base + JFT + i, JFT_CLOSED);
        }
        // empty command tail
        bus.write_u8(base + COMMAND_TAIL_OFFSET as usize, 0);
        bus.write_u8(base + COMMAND_TAIL_OFFSET as usize + 1, 0x0D);
    }

    pub fn next_segment(&self) -> u16 {
        self.read_u16(NEXT_SEGMENT)
    }
    pub fn set_next_segment(&self, segment: u16) {
        self.write_u16(NEXT_SEGMENT, segment);
    }

    pub fn terminate_address(&self) -> SegOff {
        self.read_far(TERMINATE_ADDRESS)
    }
    pub fn set_terminate_address(&self, value: SegOff) {
        self.write_far(TERMINATE_ADDRESS, value);
    }
    pub fn break_address(&self) -> SegOff {
        self.read_far(BREAK_ADDRESS)
    }
    pub fn set_break_address(&self, value: SegOff) {
        self.write_far(BREAK_ADDRESS, value);
    }
    pub fn critical_error_address(&self) -> SegOff {
        self.read_far(CRITICAL_ERROR_ADDRESS)
    }
    pub fn set_critical_error_address(&self, value: SegOff) {
        self.write_far(CRITICAL_ERROR_ADDRESS, value);
    }

    pub fn parent_psp(&self) -> u16 {
        self.read_u16(PARENT_PSP)
    }
    pub fn set_parent_psp(&self, segment: u16) {
        self.write_u16(PARENT_PSP, segment);
    }

    pub fn environment_segment(&self) -> u16 {
        self.read_u16(ENVIRONMENT_SEGMENT)
    }
    pub fn set_environment_segment(&self, segment: u16) {
        self.write_u16(ENVIRONMENT_SEGMENT, segment);
    }

    /// SS:SP of the caller, stashed by EXEC and restored on terminate.
    pub fn saved_stack(&self) -> SegOff {
        self.read_far(SAVED_SS_SP)
    }
    pub fn set_saved_stack(&self, value: SegOff) {
        self.write_far(SAVED_SS_SP, value);
    }

    pub fn max_open_files(&self) -> u16 {
        self.read_u16(MAX_OPEN_FILES)
    }

    pub fn jft_entry(&self, handle: u16) -> u8 {
        self.bus.borrow().read_u8(self.base() + JFT + handle as usize)
    }
    pub fn set_jft_entry(&self, handle: u16, value: u8) {
        self.bus.borrow_mut().write_u8(self.base() + JFT + handle as usize, value);
    }

    pub fn set_command_tail(&self, tail: &[u8]) {
        let mut bus = self.bus.borrow_mut();
        let base = self.base() + COMMAND_TAIL_OFFSET as usize;
        let len = tail.len().min(126);
        bus.write_u8(base, len as u8);
        bus.write_bytes(base + 1, &tail[..len]);
        bus.write_u8(base + 1 + len, 0x0D);
    }

    pub fn command_tail(&self) -> Vec<u8> {
        let bus = self.bus.borrow();
        let base = self.base() + COMMAND_TAIL_OFFSET as usize;
        let len = bus.read_u8(base).min(126) as usize;
        bus.read_bytes(base + 1, len)
    }

    pub fn fcb1(&self) -> SegOff {
        SegOff::new(self.segment, FCB1_OFFSET)
    }
    pub fn fcb2(&self) -> SegOff {
        SegOff::new(self.segment, FCB2_OFFSET)
    }
}

/// Synthesizes the root (shell) PSP. It is its own parent and never leaves
/// the stack; INT 22h/23h/24h copies come from the live vector table.
pub fn synthesize_root(bus: &BusPtr, segment: u16, next_segment: u16, environment: u16) -> Psp {
    let psp = Psp::at(bus, segment);
    psp.init();
    psp.set_parent_psp(segment);
    psp.set_next_segment(next_segment);
    psp.set_environment_segment(environment);
    let (int22, int23, int24) = {
        let bus = bus.borrow();
        (bus.read_ivt(0x22), bus.read_ivt(0x23), bus.read_ivt(0x24))
    };
    psp.set_terminate_address(int22);
    psp.set_break_address(int23);
    psp.set_critical_error_address(int24);
    psp
}

/// The stack of live PSPs plus the "current PSP" register of the kernel,
/// mirrored into the swappable data area for guests that peek at it.
pub struct PspTracker {
    bus: BusPtr,
    sda_current_psp: SegOff,
    stack: Vec<u16>,
    current: u16,
    initial_program: Option<u16>,
    last_exit: (u8, u8),
}

impl PspTracker {
    pub fn new(bus: BusPtr, sda_current_psp: SegOff) -> Self {
        PspTracker {
            bus,
            sda_current_psp,
            stack: Vec::new(),
            current: 0,
            initial_program: None,
            last_exit: (0, 0),
        }
    }

    pub fn push(&mut self, segment: u16) {
        self.stack.push(segment);
        self.set_current(segment);
    }

    pub fn pop(&mut self) -> Option<u16> {
        let popped = self.stack.pop();
        if let Some(&top) = self.stack.last() {
            self.set_current(top);
        }
        popped
    }

    pub fn current(&self) -> u16 {
        self.current
    }

    /// INT 21h 50h: the current PSP can be repointed without unwinding.
    pub fn set_current(&mut self, segment: u16) {
        self.current = segment;
        self.bus.borrow_mut().write_u16(self.sda_current_psp.physical(), segment);
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn mark_initial_program(&mut self, segment: u16) {
        self.initial_program = Some(segment);
    }

    pub fn is_initial_program(&self, segment: u16) -> bool {
        self.initial_program == Some(segment)
    }

    /// Exit code and termination kind for INT 21h 4Dh.
    pub fn record_exit(&mut self, code: u8, kind: u8) {
        self.last_exit = (code, kind);
    }

    pub fn last_exit(&self) -> (u8, u8) {
        self.last_exit
    }
}
