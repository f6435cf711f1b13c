//! Import Directory: DLL descriptors and their thunk tables.
//!
//! Reading here stays read-only; reordering lives in `engines::imports` since
//! it also needs the disassembled reference sites collected by
//! `engines::imports::collect_import_calls`.

use crate::error::{PeError, Result};
use crate::pe::section::{offset_rva_delta, Section};
use crate::util::{read_cstring_capped, read_u32};

pub const IMPORT_NAME_LENGTH_LIMIT: usize = 4096;
const IMPORT_DLL_STRUCT_SIZE: usize = 20;

#[derive(Debug, Clone)]
pub struct ImportFunc {
    pub index: usize,
    pub struct_offset: usize,
    pub struct_size: usize,
    pub is_ordinal: bool,
    pub ordinal_raw: u64,
    pub hint: u16,
    pub hint_name_rva: u32,
    pub hint_name_offset: usize,
    pub name: Vec<u8>,
    /// VA the loader will patch / the OFT entry addresses today.
    pub func_va: u64,
}

#[derive(Debug, Clone)]
pub struct ImportDll {
    pub index: usize,
    pub struct_offset: usize,
    pub oft_rva: u32,
    pub oft_offset: usize,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub name_offset: usize,
    pub name: Vec<u8>,
    pub ft_rva: u32,
    pub ft_offset: usize,
    pub funcs: Vec<ImportFunc>,
}

impl ImportDll {
    pub fn to_bytes(&self) -> [u8; IMPORT_DLL_STRUCT_SIZE] {
        let mut out = [0u8; IMPORT_DLL_STRUCT_SIZE];
        out[0..4].copy_from_slice(&self.oft_rva.to_le_bytes());
        out[4..8].copy_from_slice(&self.time_date_stamp.to_le_bytes());
        out[8..12].copy_from_slice(&self.forwarder_chain.to_le_bytes());
        out[12..16].copy_from_slice(&self.name_rva.to_le_bytes());
        out[16..20].copy_from_slice(&self.ft_rva.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone)]
pub struct ImportDir {
    pub hdr_offset: usize,
    pub struct_offset: usize,
    pub dlls: Vec<ImportDll>,
    pub va_list: Vec<u64>,
}

/// Three sequences that, if contiguous, the shuffler is allowed to reorder:
/// name block, OFT block, FT block. Any non-contiguous sequence is left
/// untouched and the corresponding reorder step is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContiguityOffsets {
    pub name_min: Option<usize>,
    pub name_max: Option<usize>,
    pub oft_min: Option<usize>,
    pub oft_delta: i64,
    pub ft_min: Option<usize>,
    pub ft_delta: i64,
}

fn read_name(data: &[u8], offset: usize) -> Result<Vec<u8>> {
    read_cstring_capped(data, offset, IMPORT_NAME_LENGTH_LIMIT, "import-name")
}

/// Parses the Import Directory. Mirrors `get_imports`/`get_dll_funcs`.
pub fn read_imports(
    data: &[u8],
    hdr_offset: usize,
    sections: &[Section],
    eof: usize,
    is_pe32_plus: bool,
    imagebase: u64,
) -> Result<Option<ImportDir>> {
    let import_dir_rva = read_u32(data, hdr_offset).ok_or_else(|| PeError::region("import", hdr_offset, "truncated"))?;
    if import_dir_rva == 0 {
        return Ok(None);
    }
    let iat_section = sections
        .iter()
        .find(|s| s.contains_rva(import_dir_rva))
        .ok_or_else(|| PeError::region("import", hdr_offset, "invalid import directory RVA"))?;

    let struct_offset = (import_dir_rva as i64 - iat_section.va_offset_delta()) as usize;
    let thunk_size: usize = if is_pe32_plus { 8 } else { 4 };

    let mut dlls = Vec::new();
    let mut va_list = Vec::new();
    let mut dll_offset = struct_offset;
    let mut index = 0;
    loop {
        let raw = data
            .get(dll_offset..dll_offset + IMPORT_DLL_STRUCT_SIZE)
            .ok_or_else(|| PeError::region("import", dll_offset, "truncated DLL descriptor"))?;
        if raw.iter().all(|&b| b == 0) {
            break;
        }
        let oft_rva = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        let time_date_stamp = u32::from_le_bytes(raw[4..8].try_into().unwrap());
        let forwarder_chain = u32::from_le_bytes(raw[8..12].try_into().unwrap());
        let name_rva = u32::from_le_bytes(raw[12..16].try_into().unwrap());
        let ft_rva = u32::from_le_bytes(raw[16..20].try_into().unwrap());

        let name_delta = offset_rva_delta(sections, name_rva, Some(iat_section))
            .ok_or_else(|| PeError::region("import", dll_offset, "unresolvable DLL name RVA"))?;
        let name_offset = (name_rva as i64 - name_delta) as usize;
        let name = read_name(data, name_offset)?;

        let oft_delta = offset_rva_delta(sections, oft_rva, Some(iat_section)).unwrap_or(-1);
        let ft_delta = offset_rva_delta(sections, ft_rva, Some(iat_section)).unwrap_or(-1);
        let oft_offset = if oft_rva > 0 && oft_delta >= 0 {
            (oft_rva as i64 - oft_delta) as usize
        } else {
            0
        };
        let ft_offset = if ft_rva > 0 && ft_delta >= 0 {
            (ft_rva as i64 - ft_delta) as usize
        } else {
            0
        };

        if ft_offset >= eof && oft_offset >= eof {
            return Err(PeError::region("import", dll_offset, "DLL thunk table out of bounds"));
        }

        let funcs = read_dll_funcs(
            data,
            eof,
            sections,
            iat_section,
            oft_offset,
            oft_rva,
            ft_offset,
            ft_rva,
            thunk_size,
            imagebase,
            &mut va_list,
        )?;

        dlls.push(ImportDll {
            index,
            struct_offset: dll_offset,
            oft_rva,
            oft_offset,
            time_date_stamp,
            forwarder_chain,
            name_rva,
            name_offset,
            name,
            ft_rva,
            ft_offset,
            funcs,
        });
        dll_offset += IMPORT_DLL_STRUCT_SIZE;
        index += 1;
    }

    Ok(Some(ImportDir {
        hdr_offset,
        struct_offset,
        dlls,
        va_list,
    }))
}

#[allow(clippy::too_many_arguments)]
fn read_dll_funcs(
    data: &[u8],
    eof: usize,
    sections: &[Section],
    iat_section: &Section,
    oft_offset: usize,
    oft_rva: u32,
    ft_offset: usize,
    ft_rva: u32,
    thunk_size: usize,
    imagebase: u64,
    va_list: &mut Vec<u64>,
) -> Result<Vec<ImportFunc>> {
    let mut func_offset = if ft_offset > 0 { ft_offset } else { oft_offset };
    let mut func_rva = if ft_rva > 0 { ft_rva } else { oft_rva };
    let mut func_va = func_rva as u64 + imagebase;
    let mut funcs = Vec::new();
    let mut index = 0;

    loop {
        if func_offset + thunk_size > eof {
            return Err(PeError::region("import", func_offset, "thunk table runs past EOF"));
        }
        let raw = &data[func_offset..func_offset + thunk_size];
        if raw.iter().all(|&b| b == 0) {
            break;
        }
        let top_bit = raw[thunk_size - 1] & 0x80 != 0;
        if top_bit {
            let mut ordinal_raw = 0u64;
            for (i, b) in raw.iter().enumerate() {
                ordinal_raw |= (*b as u64) << (8 * i);
            }
            funcs.push(ImportFunc {
                index,
                struct_offset: func_offset,
                struct_size: thunk_size,
                is_ordinal: true,
                ordinal_raw,
                hint: 0,
                hint_name_rva: 0,
                hint_name_offset: 0,
                name: Vec::new(),
                func_va,
            });
        } else {
            let hint_name_rva = u32::from_le_bytes(raw[0..4].try_into().unwrap());
            let delta = offset_rva_delta(sections, hint_name_rva, Some(iat_section))
                .ok_or_else(|| PeError::region("import", func_offset, "unresolvable hint/name RVA"))?;
            let hint_name_offset = (hint_name_rva as i64 - delta) as usize;
            let hint = crate::util::read_u16(data, hint_name_offset)
                .ok_or_else(|| PeError::region("import", hint_name_offset, "truncated hint"))?;
            let name = read_name(data, hint_name_offset + 2)?;
            funcs.push(ImportFunc {
                index,
                struct_offset: func_offset,
                struct_size: thunk_size,
                is_ordinal: false,
                ordinal_raw: 0,
                hint,
                hint_name_rva,
                hint_name_offset,
                name,
                func_va,
            });
        }
        va_list.push(func_va);
        func_rva += thunk_size as u32;
        func_va += thunk_size as u64;
        func_offset += thunk_size;
        index += 1;
    }
    Ok(funcs)
}

/// Decides whether the name/OFT/FT sequences are contiguous and returns the
/// bases needed to relocate them. Mirrors `check_import_offsets`.
pub fn check_contiguity(dlls: &[ImportDll]) -> ContiguityOffsets {
    let mut name_ranges: Vec<(usize, usize)> = Vec::new();
    let mut oft_ranges: Vec<(usize, usize)> = Vec::new();
    let mut ft_ranges: Vec<(usize, usize)> = Vec::new();

    for dll in dlls {
        name_ranges.push((dll.name_offset, dll.name.len() + 1));
        for f in &dll.funcs {
            if !f.is_ordinal {
                name_ranges.push((f.hint_name_offset, f.name.len() + 3));
            }
        }
        if dll.oft_offset > 0 && !dll.funcs.is_empty() {
            let span = dll.funcs[0].struct_size * (dll.funcs.len() + 1);
            oft_ranges.push((dll.oft_offset, span));
        }
        if dll.ft_offset > 0 && !dll.funcs.is_empty() {
            let span = dll.funcs[0].struct_size * (dll.funcs.len() + 1);
            ft_ranges.push((dll.ft_offset, span));
        }
    }

    fn contiguous(ranges: &mut [(usize, usize)]) -> Option<(usize, i64)> {
        if ranges.is_empty() {
            return None;
        }
        ranges.sort_by_key(|(off, _)| *off);
        let mut cursor = ranges[0].0;
        for (off, len) in ranges.iter() {
            if *off != cursor {
                return None;
            }
            cursor += len;
        }
        Some((ranges[0].0, 0))
    }

    let mut out = ContiguityOffsets::default();
    if let Some((min, _)) = contiguous(&mut name_ranges) {
        out.name_min = Some(min);
        out.name_max = Some(name_ranges.iter().map(|(o, l)| o + l).max().unwrap_or(min));
    }
    if let Some((min, _)) = contiguous(&mut oft_ranges) {
        out.oft_min = Some(min);
        out.oft_delta = dlls.iter().find(|d| d.oft_offset == min).map(|d| d.oft_rva as i64 - min as i64).unwrap_or(0);
    }
    if let Some((min, _)) = contiguous(&mut ft_ranges) {
        out.ft_min = Some(min);
        out.ft_delta = dlls.iter().find(|d| d.ft_offset == min).map(|d| d.ft_rva as i64 - min as i64).unwrap_or(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dll(struct_offset: usize, name_offset: usize, name_len: usize, oft_offset: usize, ft_offset: usize, n_funcs: usize) -> ImportDll {
        ImportDll {
            index: 0,
            struct_offset,
            oft_rva: 0,
            oft_offset,
            time_date_stamp: 0,
            forwarder_chain: 0,
            name_rva: 0,
            name_offset,
            name: vec![b'a'; name_len],
            ft_rva: 0,
            ft_offset,
            funcs: (0..n_funcs)
                .map(|i| ImportFunc {
                    index: i,
                    struct_offset: oft_offset + i * 4,
                    struct_size: 4,
                    is_ordinal: false,
                    ordinal_raw: 0,
                    hint: 0,
                    hint_name_rva: 0,
                    hint_name_offset: 0,
                    name: vec![b'f'],
                    func_va: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn detects_contiguous_oft() {
        let dlls = vec![dll(0, 0, 3, 100, 0, 2)];
        let offsets = check_contiguity(&dlls);
        assert_eq!(offsets.oft_min, Some(100));
    }

    #[test]
    fn rejects_non_contiguous_names() {
        let mut d1 = dll(0, 0, 3, 100, 0, 1);
        let d2 = dll(20, 50, 3, 200, 0, 1);
        d1.funcs[0].hint_name_offset = 10;
        let dlls = vec![d1, d2];
        let offsets = check_contiguity(&dlls);
        assert!(offsets.name_min.is_none());
    }
}
