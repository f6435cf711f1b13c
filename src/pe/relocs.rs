//! Base Relocation Table. Read-only: consulted, never rewritten, since no
//! engine in this tool moves code or data that relocations describe.

use crate::error::Result;
use crate::pe::section::{offset_rva_delta, Section};
use crate::util::read_u32;

#[derive(Debug, Clone)]
pub struct RelocEntry {
    pub kind: u8,
    pub rva_offset: u16,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct RelocBlock {
    pub rva: u32,
    pub size: u32,
    pub entries: Vec<RelocEntry>,
}

#[derive(Debug, Clone)]
pub struct RelocTable {
    pub hdr_offset: usize,
    pub struct_offset: usize,
    pub struct_size: u32,
    pub blocks: Vec<RelocBlock>,
}

/// Mirrors `get_relocs`; returns `None` when the directory slot is empty.
pub fn read_relocs(data: &[u8], hdr_offset: usize, sections: &[Section]) -> Result<Option<RelocTable>> {
    let reloc_rva = read_u32(data, hdr_offset).unwrap_or(0);
    let reloc_size = read_u32(data, hdr_offset + 4).unwrap_or(0);
    if reloc_rva == 0 || reloc_size == 0 {
        return Ok(None);
    }
    let delta = offset_rva_delta(sections, reloc_rva, None).unwrap_or(0);
    let struct_offset = (reloc_rva as i64 - delta) as usize;
    let table = &data[struct_offset..struct_offset + reloc_size as usize];

    let mut blocks = Vec::new();
    let mut offset = 0usize;
    while offset < reloc_size as usize {
        let block_rva = u32::from_le_bytes(table[offset..offset + 4].try_into().unwrap());
        let block_size = u32::from_le_bytes(table[offset + 4..offset + 8].try_into().unwrap());
        let entries_bytes = &table[offset + 8..offset + block_size as usize];
        let entries = entries_bytes
            .chunks_exact(2)
            .map(|chunk| {
                let word = u16::from_le_bytes([chunk[0], chunk[1]]);
                RelocEntry {
                    kind: (word >> 12) as u8,
                    rva_offset: word & 0x0fff,
                    offset: block_rva as i64 + (word & 0x0fff) as i64 - delta,
                }
            })
            .collect();
        blocks.push(RelocBlock {
            rva: block_rva,
            size: block_size,
            entries,
        });
        offset += block_size as usize;
    }

    Ok(Some(RelocTable {
        hdr_offset,
        struct_offset,
        struct_size: reloc_size,
        blocks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::section::Section;

    #[test]
    fn parses_one_block() {
        let mut data = vec![0u8; 0x200];
        let hdr_offset = 0x100;
        data[hdr_offset..hdr_offset + 4].copy_from_slice(&0x2000u32.to_le_bytes());
        data[hdr_offset + 4..hdr_offset + 8].copy_from_slice(&12u32.to_le_bytes());
        let reloc_offset = 0x50;
        data[reloc_offset..reloc_offset + 4].copy_from_slice(&0x2000u32.to_le_bytes());
        data[reloc_offset + 4..reloc_offset + 8].copy_from_slice(&12u32.to_le_bytes());
        data[reloc_offset + 8..reloc_offset + 10].copy_from_slice(&0x3010u16.to_le_bytes());
        data[reloc_offset + 10..reloc_offset + 12].copy_from_slice(&0x0000u16.to_le_bytes());
        let section = Section {
            struct_offset: 0,
            name: *b".reloc\0\0",
            vsize: 0x1000,
            vaddr: 0x2000,
            rsize: 0x1000,
            raddr: reloc_offset as u32,
        };
        let table = read_relocs(&data, hdr_offset, &[section]).unwrap().unwrap();
        assert_eq!(table.blocks.len(), 1);
        assert_eq!(table.blocks[0].entries[0].kind, 3);
    }
}
