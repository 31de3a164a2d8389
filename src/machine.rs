use crate::memory::{physical, BusPtr, SegOff};

// Standard PC low-memory layout as the kernel expects it
//
//   0000:0000   interrupt vector table (256 * 4 bytes)
//   0040:0000   BIOS data area
//   0060:0000   root (shell) PSP
//   0070:0000   device driver chain
//   00B2:0000   DOS swappable data area
//   0100:0000   first program PSP; the MCB chain starts one paragraph below
//   A000:0000   graphic video memory, end of the conventional heap

pub const BIOS_DATA_AREA_SEGMENT: u16 = 0x0040;
pub const DEFAULT_ROOT_PSP_SEGMENT: u16 = 0x0060;
pub const DEFAULT_DEVICE_DRIVER_SEGMENT: u16 = 0x0070;
pub const DEFAULT_SDA_SEGMENT: u16 = 0x00B2;
/// Offset of the current-PSP word inside the swappable data area.
pub const SDA_CURRENT_PSP_OFFSET: u16 = 0x0010;
pub const DEFAULT_PROGRAM_SEGMENT: u16 = 0x0100;
pub const GRAPHIC_VIDEO_MEMORY_SEGMENT: u16 = 0xA000;
pub const DEFAULT_LAST_FREE_SEGMENT: u16 = GRAPHIC_VIDEO_MEMORY_SEGMENT - 1;

/// Where unhooked interrupt vectors point: the BIOS dummy IRET.
pub const BIOS_DUMMY_IRET: SegOff = SegOff { segment: 0xF000, offset: 0xFF53 };

enum Cell {
    Byte(u8),
    Word(u16),
}
use Cell::*;

// BIOS data area values guests commonly peek at
const BIOS_DATA: [(u16, Cell); 4] = [
    //   $10.W   equipment word: one floppy, 80x25 color
    (0x0010, Word(0x0021)),
    //   $13.W   conventional memory size in KiB
    (0x0013, Word(640)),
    //   $49.B   current video mode
    (0x0049, Byte(0x03)),
    //   $63.W   CRT controller base port
    (0x0063, Word(0x03D4)),
];

// Device driver chain: 18 bytes per header. Character device attribute
// word: bit 15 character, bit 4 CON special, bits 0/1 stdin/stdout.
const DEVICE_HEADERS: [(&[u8; 8], u16); 2] = [(b"NUL     ", 0x8004), (b"CON     ", 0x8013)];
const DEVICE_HEADER_LEN: u16 = 18;

pub fn seed_low_memory(bus: &BusPtr, device_driver_segment: u16) {
    let mut mem = bus.borrow_mut();
    for vector in 0u8..=0xFF {
        mem.write_ivt(vector, BIOS_DUMMY_IRET);
    }
    for (offset, cell) in &BIOS_DATA {
        let addr = physical(BIOS_DATA_AREA_SEGMENT, *offset);
        match cell {
            Byte(value) => mem.write_u8(addr, *value),
            Word(value) => mem.write_u16(addr, *value),
        }
    }
    let mut offset = 0u16;
    for (index, (name, attributes)) in DEVICE_HEADERS.iter().enumerate() {
        let addr = physical(device_driver_segment, offset);
        let next: u32 = if index + 1 == DEVICE_HEADERS.len() {
            0xFFFF_FFFF
        } else {
            ((device_driver_segment as u32) << 16) | (offset + DEVICE_HEADER_LEN) as u32
        };
        mem.write_u32(addr, next);
        mem.write_u16(addr + 4, *attributes);
        mem.write_u16(addr + 6, 0); // strategy entry
        mem.write_u16(addr + 8, 0); // interrupt entry
        mem.write_bytes(addr + 10, *name);
        offset += DEVICE_HEADER_LEN;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;

    #[test]
    fn vectors_point_at_the_dummy_iret() {
        let bus = MemoryBus::new();
        seed_low_memory(&bus, DEFAULT_DEVICE_DRIVER_SEGMENT);
        assert_eq!(bus.borrow().read_ivt(0x21), BIOS_DUMMY_IRET);
        assert_eq!(bus.borrow().read_ivt(0x00), BIOS_DUMMY_IRET);
    }

    #[test]
    fn driver_chain_is_nul_then_con_terminated() {
        let bus = MemoryBus::new();
        seed_low_memory(&bus, DEFAULT_DEVICE_DRIVER_SEGMENT);
        let mem = bus.borrow();
        let base = physical(DEFAULT_DEVICE_DRIVER_SEGMENT, 0);
        assert_eq!(mem.read_bytes(base + 10, 8), b"NUL     ");
        assert_eq!(mem.read_u32(base), ((DEFAULT_DEVICE_DRIVER_SEGMENT as u32) << 16) | 18);
        assert_eq!(mem.read_bytes(base + 18 + 10, 8), b"CON     ");
        assert_eq!(mem.read_u32(base + 18), 0xFFFF_FFFF);
    }

    #[test]
    fn bios_data_area_reports_640k() {
        let bus = MemoryBus::new();
        seed_low_memory(&bus, DEFAULT_DEVICE_DRIVER_SEGMENT);
        assert_eq!(bus.borrow().read_u16(physical(BIOS_DATA_AREA_SEGMENT, 0x13)), 640);
    }
}
