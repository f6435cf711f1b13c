//! Debug Directory: an array of 28-byte `IMAGE_DEBUG_DIRECTORY` entries, each
//! pointing at a data blob elsewhere in the file.

use crate::error::{PeError, Result};
use crate::pe::section::{offset_rva_delta, Section};
use crate::util::read_u32;

pub const DEBUG_ENTRY_SIZE: usize = 28;

#[derive(Debug, Clone, Copy)]
pub struct DebugEntry {
    pub hdr_offset: usize,
    pub struct_offset: usize,
    pub data_va: u32,
    pub data_offset: usize,
    pub data_size: u32,
}

impl DebugEntry {
    pub fn fits(&self, donor: &DebugEntry) -> bool {
        self.data_size >= donor.data_size
    }
}

/// No debug directory present, but the session may still want to spill a
/// donor's debug info into `.rsrc`. Mirrors the `CREATE_DEBUG_INFO_SESSION`
/// placeholder `MimicPart` the original returns in that case.
pub struct DebugDirectory {
    pub hdr_offset: usize,
    pub entries: Vec<DebugEntry>,
}

/// Mirrors `get_dbg`. `strict` surfaces malformed-entry errors instead of
/// silently disqualifying (donor mode wants the latter).
pub fn read_debug_directory(
    data: &[u8],
    hdr_offset: usize,
    sections: &[Section],
    eof: usize,
    strict: bool,
) -> Result<Option<DebugDirectory>> {
    let struct_vaddr = read_u32(data, hdr_offset).unwrap_or(0);
    if struct_vaddr == 0 {
        return Ok(None);
    }

    let delta = offset_rva_delta(sections, struct_vaddr, None);
    let struct_full_size = read_u32(data, hdr_offset + 4).unwrap_or(0);

    let malformed = |reason: String| -> Result<Option<DebugDirectory>> {
        if strict {
            Err(PeError::region("debug", hdr_offset, reason))
        } else {
            Ok(None)
        }
    };

    let Some(delta) = delta else {
        return malformed("debug directory RVA resolves to no section".into());
    };
    if delta < 0 {
        return malformed("negative section delta for debug directory".into());
    }
    let struct_offset = (struct_vaddr as i64 - delta) as usize;
    if struct_offset == 0
        || struct_offset >= eof
        || struct_full_size == 0
        || struct_full_size % DEBUG_ENTRY_SIZE as u32 != 0
    {
        return malformed(format!(
            "invalid debug directory: vaddr={struct_vaddr:#x} offset={struct_offset:#x} size={struct_full_size}"
        ));
    }

    let count = struct_full_size as usize / DEBUG_ENTRY_SIZE;
    let mut entries = Vec::with_capacity(count);
    let mut offset = struct_offset;
    for _ in 0..count {
        let check_start = read_u32(data, offset).unwrap_or(u32::MAX);
        let data_va = read_u32(data, offset + 20).unwrap_or(0);
        let data_offset = read_u32(data, offset + 24).unwrap_or(0) as usize;
        let data_size = read_u32(data, offset + 16).unwrap_or(0);
        if check_start != 0
            || data_offset as u32 > data_va
            || data_offset >= eof
            || data_size as usize >= eof
        {
            return malformed(format!("invalid debug entry at {offset:#x}"));
        }
        entries.push(DebugEntry {
            hdr_offset,
            struct_offset: offset,
            data_va,
            data_offset,
            data_size,
        });
        offset += DEBUG_ENTRY_SIZE;
    }

    Ok(Some(DebugDirectory { hdr_offset, entries }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_two_entries() {
        let hdr_offset = 0x100;
        let struct_offset = 0x200usize;
        let mut data = vec![0u8; 0x400];
        data[hdr_offset..hdr_offset + 4].copy_from_slice(&0x2000u32.to_le_bytes());
        data[hdr_offset + 4..hdr_offset + 8].copy_from_slice(&56u32.to_le_bytes());
        let section = Section {
            struct_offset: 0,
            name: *b".rdata\0\0",
            vsize: 0x1000,
            vaddr: 0x2000,
            rsize: 0x1000,
            raddr: struct_offset as u32,
        };
        for i in 0..2 {
            let off = struct_offset + i * DEBUG_ENTRY_SIZE;
            data[off + 16..off + 20].copy_from_slice(&100u32.to_le_bytes());
            data[off + 20..off + 24].copy_from_slice(&0x50u32.to_le_bytes());
            data[off + 24..off + 28].copy_from_slice(&0x50u32.to_le_bytes());
        }
        let dbg = read_debug_directory(&data, hdr_offset, &[section], 0x400, true)
            .unwrap()
            .unwrap();
        assert_eq!(dbg.entries.len(), 2);
        assert_eq!(dbg.entries[0].data_size, 100);
    }
}
