//! DOS header, COFF file header and the handful of Optional Header fields the
//! engine needs. Unlike the segmented legacy formats, every offset here is
//! taken relative to `e_lfanew` and hardcoded per §6 of the spec rather than
//! walked through a generic data-directory array — PE32 and PE32+ agree on
//! everything up to `ImageBase`, diverge there, then agree again in shape
//! (just shifted by 16 bytes) for the data directories.

use crate::error::{PeError, Result};
use crate::util::{u16_at, u32_at};

pub const PE32_MAGIC: u16 = 0x10b;
pub const PE32_PLUS_MAGIC: u16 = 0x20b;

pub const OFF_TIME_DATE_STAMP: usize = 8;
pub const OFF_MAGIC: usize = 24;
pub const OFF_MAJOR_LINKER_VERSION: usize = 26;
pub const OFF_MINOR_LINKER_VERSION: usize = 27;
pub const OFF_SIZE_OF_INITIALIZED_DATA: usize = 32;
pub const OFF_ADDRESS_OF_ENTRY_POINT: usize = 40;
pub const OFF_BASE_OF_CODE: usize = 44;
pub const OFF_IMAGE_BASE_32: usize = 52;
pub const OFF_IMAGE_BASE_64: usize = 48;
pub const OFF_SECTION_ALIGNMENT: usize = 56;
pub const OFF_FILE_ALIGNMENT: usize = 60;
pub const OFF_SIZE_OF_IMAGE: usize = 80;
pub const OFF_CHECKSUM: usize = 88;

pub const FILE_ALIGNMENT_CAP: u32 = 64000;

/// One `IMAGE_DATA_DIRECTORY` slot: RVA + size, both relative to `e_lfanew`.
#[derive(Debug, Clone, Copy)]
pub struct DirectorySlot {
    pub rva_offset: usize,
    pub size_offset: usize,
}

/// Offsets (relative to `e_lfanew`) of the directory entries the engine reads.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryOffsets {
    pub export: usize,
    pub import: usize,
    pub resource: usize,
    pub security: usize,
    pub basereloc: usize,
    pub debug: usize,
}

pub fn directory_offsets(is_pe32_plus: bool) -> DirectoryOffsets {
    if is_pe32_plus {
        DirectoryOffsets {
            export: 136,
            import: 144,
            resource: 152,
            security: 168,
            basereloc: 176,
            debug: 184,
        }
    } else {
        DirectoryOffsets {
            export: 120,
            import: 128,
            resource: 136,
            security: 152,
            basereloc: 160,
            debug: 168,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeHeader {
    pub e_lfanew: usize,
    pub is_pe32_plus: bool,
    pub time_date_stamp: u32,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_initialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub directories: DirectoryOffsets,
}

impl PeHeader {
    /// Reads `e_lfanew` at file offset `0x3c` and validates it is in-bounds.
    pub fn read_e_lfanew(data: &[u8]) -> Result<usize> {
        let value = u32_at(data, 0x3c, "dos-header")? as usize;
        if value == 0 || value + 24 >= data.len() {
            return Err(PeError::header(0x3c, format!("e_lfanew {value:#x} out of bounds")));
        }
        Ok(value)
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        let e_lfanew = Self::read_e_lfanew(data)?;
        let magic = u16_at(data, e_lfanew + OFF_MAGIC, "optional-header")?;
        let is_pe32_plus = match magic {
            PE32_MAGIC => false,
            PE32_PLUS_MAGIC => true,
            other => {
                return Err(PeError::header(
                    e_lfanew + OFF_MAGIC,
                    format!("unrecognized Magic {other:#x}"),
                ))
            }
        };

        let time_date_stamp = u32_at(data, e_lfanew + OFF_TIME_DATE_STAMP, "file-header")?;
        let major_linker_version = *data
            .get(e_lfanew + OFF_MAJOR_LINKER_VERSION)
            .ok_or_else(|| PeError::header(e_lfanew + OFF_MAJOR_LINKER_VERSION, "truncated"))?;
        let minor_linker_version = *data
            .get(e_lfanew + OFF_MINOR_LINKER_VERSION)
            .ok_or_else(|| PeError::header(e_lfanew + OFF_MINOR_LINKER_VERSION, "truncated"))?;
        let size_of_initialized_data =
            u32_at(data, e_lfanew + OFF_SIZE_OF_INITIALIZED_DATA, "optional-header")?;
        let address_of_entry_point =
            u32_at(data, e_lfanew + OFF_ADDRESS_OF_ENTRY_POINT, "optional-header")?;
        let base_of_code = u32_at(data, e_lfanew + OFF_BASE_OF_CODE, "optional-header")?;

        let image_base = if is_pe32_plus {
            data.get(e_lfanew + OFF_IMAGE_BASE_64..e_lfanew + OFF_IMAGE_BASE_64 + 8)
                .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
        } else {
            u32_at(data, e_lfanew + OFF_IMAGE_BASE_32, "optional-header").ok().map(|v| v as u64)
        }
        .ok_or_else(|| PeError::header(e_lfanew, "truncated ImageBase"))?;

        let section_alignment = u32_at(data, e_lfanew + OFF_SECTION_ALIGNMENT, "optional-header")?;
        let file_alignment = u32_at(data, e_lfanew + OFF_FILE_ALIGNMENT, "optional-header")?;
        let size_of_image = u32_at(data, e_lfanew + OFF_SIZE_OF_IMAGE, "optional-header")?;

        if !section_alignment.is_power_of_two()
            || !file_alignment.is_power_of_two()
            || section_alignment < file_alignment
            || file_alignment > FILE_ALIGNMENT_CAP
        {
            return Err(PeError::header(
                e_lfanew + OFF_SECTION_ALIGNMENT,
                format!(
                    "impossible alignments: section={section_alignment} file={file_alignment}"
                ),
            ));
        }

        Ok(PeHeader {
            e_lfanew,
            is_pe32_plus,
            time_date_stamp,
            major_linker_version,
            minor_linker_version,
            size_of_initialized_data,
            address_of_entry_point,
            base_of_code,
            image_base,
            section_alignment,
            file_alignment,
            size_of_image,
            directories: directory_offsets(is_pe32_plus),
        })
    }

    pub fn checksum_offset(&self) -> usize {
        self.e_lfanew + OFF_CHECKSUM
    }

    pub fn directory(&self, offset: usize) -> DirectorySlot {
        DirectorySlot {
            rva_offset: offset,
            size_offset: offset + 4,
        }
    }

    pub fn read_directory(&self, data: &[u8], offset: usize) -> Option<(u32, u32)> {
        let rva = crate::util::read_u32(data, offset)?;
        let size = crate::util::read_u32(data, offset + 4)?;
        Some((rva, size))
    }
}

/// `check_64`: peeks the Magic field to tell PE32 from PE32+ without building
/// a full `PeHeader`.
pub fn check_64(data: &[u8], e_lfanew: usize) -> Result<bool> {
    let magic = u16_at(data, e_lfanew + OFF_MAGIC, "optional-header")?;
    match magic {
        PE32_MAGIC => Ok(false),
        PE32_PLUS_MAGIC => Ok(true),
        other => Err(PeError::header(e_lfanew + OFF_MAGIC, format!("unrecognized Magic {other:#x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header(is_64: bool) -> Vec<u8> {
        let e_lfanew = 0x80usize;
        let mut data = vec![0u8; e_lfanew + 256];
        data[0x3c..0x40].copy_from_slice(&(e_lfanew as u32).to_le_bytes());
        let magic = if is_64 { PE32_PLUS_MAGIC } else { PE32_MAGIC };
        data[e_lfanew + OFF_MAGIC..e_lfanew + OFF_MAGIC + 2].copy_from_slice(&magic.to_le_bytes());
        data[e_lfanew + OFF_SECTION_ALIGNMENT..e_lfanew + OFF_SECTION_ALIGNMENT + 4]
            .copy_from_slice(&0x1000u32.to_le_bytes());
        data[e_lfanew + OFF_FILE_ALIGNMENT..e_lfanew + OFF_FILE_ALIGNMENT + 4]
            .copy_from_slice(&0x200u32.to_le_bytes());
        data
    }

    #[test]
    fn reads_pe32_header() {
        let data = minimal_header(false);
        let header = PeHeader::read(&data).unwrap();
        assert!(!header.is_pe32_plus);
        assert_eq!(header.directories.import, 128);
    }

    #[test]
    fn reads_pe32_plus_header() {
        let data = minimal_header(true);
        let header = PeHeader::read(&data).unwrap();
        assert!(header.is_pe32_plus);
        assert_eq!(header.directories.import, 144);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = minimal_header(false);
        let e_lfanew = 0x80;
        data[e_lfanew + OFF_MAGIC..e_lfanew + OFF_MAGIC + 2].copy_from_slice(&0x1234u16.to_le_bytes());
        assert!(PeHeader::read(&data).is_err());
    }

    #[test]
    fn rejects_bad_alignment() {
        let mut data = minimal_header(false);
        let e_lfanew = 0x80;
        data[e_lfanew + OFF_FILE_ALIGNMENT..e_lfanew + OFF_FILE_ALIGNMENT + 4]
            .copy_from_slice(&3u32.to_le_bytes());
        assert!(PeHeader::read(&data).is_err());
    }
}
