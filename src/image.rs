// Executable image classification and the MZ header. A file loads as a
// .COM image when it is named *.COM or carries no MZ/ZM signature;
// everything else goes through the EXE path with relocation.

use crate::errors::{DosError, DosResult};
use crate::memory::SegOff;

pub const SIGNATURE_MZ: u16 = 0x5A4D;
pub const SIGNATURE_ZM: u16 = 0x4D5A;

const HEADER_LEN: usize = 0x1C;
const PAGE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct ExeHeader {
    pub extra_bytes: u16,
    pub pages: u16,
    pub relocation_items: u16,
    pub header_paragraphs: u16,
    pub min_alloc: u16,
    pub max_alloc: u16,
    pub init_ss: u16,
    pub init_sp: u16,
    pub init_ip: u16,
    pub init_cs: u16,
    pub relocation_table: u16,
}

impl ExeHeader {
    pub fn parse(image: &[u8]) -> DosResult<ExeHeader> {
        if image.len() < HEADER_LEN {
            return Err(DosError::FormatInvalid);
        }
        let word = |offset: usize| u16::from_le_bytes([image[offset], image[offset + 1]]);
        let header = ExeHeader {
            extra_bytes: word(0x02),
            pages: word(0x04),
            relocation_items: word(0x06),
            header_paragraphs: word(0x08),
            min_alloc: word(0x0A),
            max_alloc: word(0x0C),
            init_ss: word(0x0E),
            init_sp: word(0x10),
            init_ip: word(0x14),
            init_cs: word(0x16),
            relocation_table: word(0x18),
        };
        if header.pages == 0 || header.header_size() > image.len() {
            return Err(DosError::FormatInvalid);
        }
        Ok(header)
    }

    pub fn header_size(&self) -> usize {
        self.header_paragraphs as usize * 16
    }

    /// Byte length of the load module that follows the header.
    pub fn load_module_size(&self) -> usize {
        let last_page = if self.extra_bytes == 0 { PAGE_SIZE } else { self.extra_bytes as usize };
        let total = (self.pages as usize - 1) * PAGE_SIZE + last_page;
        total.saturating_sub(self.header_size())
    }

    /// The relocation table: far pointers into the load module whose
    /// segment words get the load segment added.
    pub fn relocations(&self, image: &[u8]) -> Vec<SegOff> {
        let mut out = Vec::with_capacity(self.relocation_items as usize);
        let mut cursor = self.relocation_table as usize;
        for _ in 0..self.relocation_items {
            if cursor + 4 > image.len() {
                break;
            }
            let offset = u16::from_le_bytes([image[cursor], image[cursor + 1]]);
            let segment = u16::from_le_bytes([image[cursor + 2], image[cursor + 3]]);
            out.push(SegOff::new(segment, offset));
            cursor += 4;
        }
        out
    }
}

#[derive(Debug)]
pub enum ProgramImage {
    Com(Vec<u8>),
    Exe { header: ExeHeader, data: Vec<u8> },
}

fn has_com_extension(name: &str) -> bool {
    name.rsplit('.').next().map_or(false, |ext| ext.eq_ignore_ascii_case("COM"))
}

fn signature(data: &[u8]) -> Option<u16> {
    if data.len() >= 2 {
        Some(u16::from_le_bytes([data[0], data[1]]))
    } else {
        None
    }
}

pub fn classify(name: &str, data: Vec<u8>) -> DosResult<ProgramImage> {
    let mz = matches!(signature(&data), Some(SIGNATURE_MZ) | Some(SIGNATURE_ZM));
    if has_com_extension(name) || !mz {
        return Ok(ProgramImage::Com(data));
    }
    let header = ExeHeader::parse(&data)?;
    Ok(ProgramImage::Exe { header, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_exe(min_alloc: u16, max_alloc: u16) -> Vec<u8> {
        let mut image = vec![0u8; 64];
        image[0] = b'M';
        image[1] = b'Z';
        image[0x02..0x04].copy_from_slice(&64u16.to_le_bytes()); // extra bytes
        image[0x04..0x06].copy_from_slice(&1u16.to_le_bytes()); // pages
        image[0x08..0x0A].copy_from_slice(&2u16.to_le_bytes()); // header paragraphs
        image[0x0A..0x0C].copy_from_slice(&min_alloc.to_le_bytes());
        image[0x0C..0x0E].copy_from_slice(&max_alloc.to_le_bytes());
        image
    }

    #[test]
    fn com_by_extension_even_with_mz_signature() {
        let data = minimal_exe(0, 0xFFFF);
        assert!(matches!(classify("WEIRD.COM", data), Ok(ProgramImage::Com(_))));
    }

    #[test]
    fn exe_by_signature() {
        let data = minimal_exe(1, 0xFFFF);
        match classify("PLAY.EXE", data).unwrap() {
            ProgramImage::Exe { header, .. } => {
                assert_eq!(header.min_alloc, 1);
                assert_eq!(header.load_module_size(), 64 - 32);
            }
            ProgramImage::Com(_) => panic!("classified as COM"),
        }
    }

    #[test]
    fn missing_signature_is_com() {
        assert!(matches!(
            classify("TINY.EXE", vec![0xB4, 0x4C, 0xCD, 0x21]),
            Ok(ProgramImage::Com(_))
        ));
    }

    #[test]
    fn truncated_mz_header_is_rejected() {
        let mut data = vec![0u8; 16];
        data[0] = b'M';
        data[1] = b'Z';
        assert_eq!(classify("BAD.EXE", data).unwrap_err(), DosError::FormatInvalid);
    }

    #[test]
    fn relocation_entries_parse() {
        let mut image = minimal_exe(0, 0xFFFF);
        image[0x06..0x08].copy_from_slice(&1u16.to_le_bytes()); // one item
        image[0x18..0x1A].copy_from_slice(&0x1Cu16.to_le_bytes());
        image[0x1C..0x1E].copy_from_slice(&0x0003u16.to_le_bytes());
        image[0x1E..0x20].copy_from_slice(&0x0001u16.to_le_bytes());
        let header = ExeHeader::parse(&image).unwrap();
        let relocs = header.relocations(&image);
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0], SegOff::new(0x0001, 0x0003));
    }
}
