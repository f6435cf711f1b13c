//! Resource Directory: a rooted tree of directory tables, represented as an
//! arena of nodes addressed by index rather than an owned graph with parent
//! pointers — parsing, and later merging two trees, only ever needs to walk
//! down and append, never to mutate a parent through a child.

use crate::error::{PeError, Result};
use crate::pe::section::offset_rva_delta;
use crate::util::{read_u16, read_u32};

pub const RESOURCE_DEPTH_CAP: u32 = 32;
pub const RT_VERSION: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResChild {
    Dir(usize),
    Data(usize),
}

#[derive(Debug, Clone)]
pub struct ResDir {
    pub struct_offset: usize,
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub named_entries_count: u16,
    pub id_entries_count: u16,
    /// Index into `ResourceTree::entries` of the `RT_VERSION` entry, if any,
    /// stored apart from `entries` so it can be swapped independently.
    pub vi: Option<usize>,
    pub entries: Vec<usize>,
}

impl ResDir {
    pub fn entries_count(&self) -> u16 {
        self.named_entries_count + self.id_entries_count
    }

    pub fn block_size(&self) -> u32 {
        16 + self.entries_count() as u32 * 8
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.characteristics.to_le_bytes());
        out[4..8].copy_from_slice(&self.time_date_stamp.to_le_bytes());
        out[8..10].copy_from_slice(&self.major_version.to_le_bytes());
        out[10..12].copy_from_slice(&self.minor_version.to_le_bytes());
        out[12..14].copy_from_slice(&self.named_entries_count.to_le_bytes());
        out[14..16].copy_from_slice(&self.id_entries_count.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone)]
pub struct ResDirEntry {
    pub struct_offset: usize,
    pub name_indent: Option<u32>,
    pub bname: Option<Vec<u8>>,
    pub id: Option<u32>,
    pub child: ResChild,
}

#[derive(Debug, Clone)]
pub struct ResDataEntry {
    pub struct_offset: usize,
    pub data_va: u32,
    pub data_offset: usize,
    pub data_size: u32,
    pub code_page: u32,
    pub reserved: u32,
    pub data_bytes: Vec<u8>,
}

impl ResDataEntry {
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.data_va.to_le_bytes());
        out[4..8].copy_from_slice(&self.data_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.code_page.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceTree {
    pub dirs: Vec<ResDir>,
    pub entries: Vec<ResDirEntry>,
    pub data: Vec<ResDataEntry>,
    pub root: usize,
}

struct Parser<'a> {
    data: &'a [u8],
    offset_va_delta: i64,
    eof: usize,
    strict: bool,
    visited: Vec<usize>,
    tree: ResourceTree,
}

fn read_name(data: &[u8], offset: usize) -> Vec<u8> {
    let name_units = read_u16(data, offset).unwrap_or(0) as usize;
    let len = name_units * 2 + 2;
    data.get(offset..offset + len).map(|s| s.to_vec()).unwrap_or_default()
}

impl<'a> Parser<'a> {
    fn check_offset(&mut self, offset: usize) -> Result<()> {
        if offset == 0 || offset >= self.eof {
            return Err(PeError::region("resource", offset, "entry offset out of file bounds"));
        }
        if self.visited.contains(&offset) {
            return Err(PeError::region("resource", offset, "recursive resource pointer"));
        }
        self.visited.push(offset);
        Ok(())
    }

    fn parse_dir(&mut self, dir_offset: usize, start_offset: usize, depth: u32) -> Result<usize> {
        if depth > RESOURCE_DEPTH_CAP {
            return Err(PeError::region("resource", dir_offset, "resource depth exceeds 32"));
        }
        let raw = self
            .data
            .get(dir_offset..dir_offset + 16)
            .ok_or_else(|| PeError::region("resource", dir_offset, "truncated directory"))?;
        let mut dir = ResDir {
            struct_offset: dir_offset,
            characteristics: u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            time_date_stamp: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
            major_version: u16::from_le_bytes(raw[8..10].try_into().unwrap()),
            minor_version: u16::from_le_bytes(raw[10..12].try_into().unwrap()),
            named_entries_count: u16::from_le_bytes(raw[12..14].try_into().unwrap()),
            id_entries_count: u16::from_le_bytes(raw[14..16].try_into().unwrap()),
            vi: None,
            entries: Vec::new(),
        };
        let dir_idx = self.tree.dirs.len();
        self.tree.dirs.push(dir.clone());

        let first_entry_offset = dir_offset + 16;
        for i in 0..dir.entries_count() as usize {
            let entry_offset = first_entry_offset + i * 8;
            self.check_offset(entry_offset)?;
            let entry_idx = self.parse_entry(entry_offset, start_offset, depth)?;
            let entry = &self.tree.entries[entry_idx];
            if entry.id == Some(RT_VERSION) {
                dir.vi = Some(entry_idx);
            } else {
                dir.entries.push(entry_idx);
            }
        }
        self.tree.dirs[dir_idx] = dir;
        Ok(dir_idx)
    }

    fn parse_entry(&mut self, entry_offset: usize, start_offset: usize, depth: u32) -> Result<usize> {
        let name_id = self
            .data
            .get(entry_offset..entry_offset + 4)
            .ok_or_else(|| PeError::region("resource", entry_offset, "truncated entry"))?;
        let is_id_entry = name_id[3] & 0x80 == 0;
        let (id, name_indent, bname) = if is_id_entry {
            (Some(u32::from_le_bytes(name_id.try_into().unwrap())), None, None)
        } else {
            let indent = u32::from_le_bytes([name_id[0], name_id[1], name_id[2], name_id[3] & 0x7f]);
            let name_offset = indent as usize + start_offset;
            (None, Some(indent), Some(read_name(self.data, name_offset)))
        };

        let indent_bytes = self
            .data
            .get(entry_offset + 4..entry_offset + 8)
            .ok_or_else(|| PeError::region("resource", entry_offset, "truncated entry"))?;
        let next_indent = u32::from_le_bytes([indent_bytes[0], indent_bytes[1], indent_bytes[2], indent_bytes[3] & 0x7f]);
        let next_offset = start_offset + next_indent as usize;
        self.check_offset(next_offset)?;
        let is_data_next = indent_bytes[3] & 0x80 == 0;

        let child = if is_data_next {
            let raw = self
                .data
                .get(next_offset..next_offset + 16)
                .ok_or_else(|| PeError::region("resource", next_offset, "truncated data entry"))?;
            let data_va = u32::from_le_bytes(raw[0..4].try_into().unwrap());
            let data_size = u32::from_le_bytes(raw[4..8].try_into().unwrap());
            let data_offset = (data_va as i64 - self.offset_va_delta) as usize;
            let data_bytes = self
                .data
                .get(data_offset..data_offset + data_size as usize)
                .ok_or_else(|| PeError::region("resource", data_offset, "resource data runs past EOF"))?
                .to_vec();
            let data_idx = self.tree.data.len();
            self.tree.data.push(ResDataEntry {
                struct_offset: next_offset,
                data_va,
                data_offset,
                data_size,
                code_page: u32::from_le_bytes(raw[8..12].try_into().unwrap()),
                reserved: u32::from_le_bytes(raw[12..16].try_into().unwrap()),
                data_bytes,
            });
            ResChild::Data(data_idx)
        } else {
            ResChild::Dir(self.parse_dir(next_offset, start_offset, depth + 1)?)
        };

        let entry_idx = self.tree.entries.len();
        self.tree.entries.push(ResDirEntry {
            struct_offset: entry_offset,
            name_indent,
            bname,
            id,
            child,
        });
        Ok(entry_idx)
    }
}

/// Parses the whole resource tree rooted at `res_dir_offset`. Mirrors
/// `get_resource_info` / `get_resource_entries`.
pub fn read_resource_tree(
    data: &[u8],
    res_dir_offset: usize,
    offset_va_delta: i64,
    eof: usize,
    strict: bool,
) -> Result<ResourceTree> {
    let mut parser = Parser {
        data,
        offset_va_delta,
        eof,
        strict,
        visited: Vec::new(),
        tree: ResourceTree::default(),
    };
    let root = parser.parse_dir(res_dir_offset, res_dir_offset, 0)?;
    parser.tree.root = root;
    Ok(parser.tree)
}

/// Mirrors `get_resources`: reads the directory-entry slot, then the tree.
pub fn read_resources(
    data: &[u8],
    hdr_offset: usize,
    sections: &[crate::pe::section::Section],
    eof: usize,
    strict: bool,
) -> Result<Option<ResourceTree>> {
    let res_dir_vaddr = read_u32(data, hdr_offset).unwrap_or(0);
    if res_dir_vaddr == 0 {
        return Ok(None);
    }
    let delta = offset_rva_delta(sections, res_dir_vaddr, None)
        .ok_or_else(|| PeError::region("resource", hdr_offset, "resource directory RVA resolves to no section"))?;
    let res_dir_offset = (res_dir_vaddr as i64 - delta) as usize;
    if res_dir_offset == 0 || delta < 0 {
        return Err(PeError::region("resource", hdr_offset, "invalid resource directory RVA"));
    }
    Ok(Some(read_resource_tree(data, res_dir_offset, delta, eof, strict)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_bytes(named: u16, id: u16) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[12..14].copy_from_slice(&named.to_le_bytes());
        out[14..16].copy_from_slice(&id.to_le_bytes());
        out
    }

    #[test]
    fn parses_single_data_leaf() {
        let mut data = vec![0u8; 0x200];
        let root_offset = 0x10;
        data[root_offset..root_offset + 16].copy_from_slice(&dir_bytes(0, 1));
        let entry_offset = root_offset + 16;
        data[entry_offset..entry_offset + 4].copy_from_slice(&3u32.to_le_bytes()); // id 3
        let data_entry_offset = 0x80;
        let next_indent = (data_entry_offset - root_offset) as u32;
        data[entry_offset + 4..entry_offset + 8].copy_from_slice(&next_indent.to_le_bytes());
        data[data_entry_offset..data_entry_offset + 4].copy_from_slice(&0x5000u32.to_le_bytes());
        data[data_entry_offset + 4..data_entry_offset + 8].copy_from_slice(&4u32.to_le_bytes());
        data[0x100..0x104].copy_from_slice(b"ABCD");

        // offset_va_delta chosen so data_va(0x5000) - delta = 0x100
        let delta = 0x5000i64 - 0x100i64;
        let tree = read_resource_tree(&data, root_offset, delta, 0x200, true).unwrap();
        assert_eq!(tree.dirs[tree.root].entries.len(), 1);
        let entry = &tree.entries[tree.dirs[tree.root].entries[0]];
        assert_eq!(entry.id, Some(3));
        match entry.child {
            ResChild::Data(idx) => assert_eq!(tree.data[idx].data_bytes, b"ABCD"),
            _ => panic!("expected data leaf"),
        }
    }

    #[test]
    fn rejects_repeated_entry_offset() {
        // two id entries whose "next entry" indent resolves to the same offset
        let mut data = vec![0u8; 0x200];
        let root_offset = 0x10;
        data[root_offset..root_offset + 16].copy_from_slice(&dir_bytes(0, 2));
        let first_entry = root_offset + 16;
        let second_entry = first_entry + 8;
        let shared_data_offset = 0x80usize;
        let shared_indent = (shared_data_offset - root_offset) as u32;

        data[first_entry..first_entry + 4].copy_from_slice(&1u32.to_le_bytes());
        data[first_entry + 4..first_entry + 8].copy_from_slice(&shared_indent.to_le_bytes());
        data[second_entry..second_entry + 4].copy_from_slice(&2u32.to_le_bytes());
        data[second_entry + 4..second_entry + 8].copy_from_slice(&shared_indent.to_le_bytes());
        data[shared_data_offset..shared_data_offset + 8].copy_from_slice(&0u64.to_le_bytes());

        assert!(read_resource_tree(&data, root_offset, 0, 0x200, true).is_err());
    }
}
