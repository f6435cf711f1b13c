//! Import Shuffler: reorders DLL descriptors, thunk tables and hint/name
//! blocks, then rewrites every disassembled reference to a relocated thunk so
//! the binary still calls the right imported function. Mirrors
//! `shuffle_imports`/`fix_shuffled_funcs`/`collect_import_calls`.
//!
//! Reordering a block is only attempted when `check_contiguity` found it
//! perfectly packed; otherwise that block is rewritten in place at its
//! original offsets and only the element order inside it changes.

use std::collections::HashMap;

use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic, OpKind};
use rand::seq::SliceRandom;

use crate::pe::imports::{check_contiguity, ImportDir, ImportDll};
use crate::pe::section::Section;

/// One disassembled instruction that references an import thunk by address.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSite {
    pub file_offset: usize,
    pub is_absolute: bool,
    pub operand_offset: usize,
    pub operand_size: usize,
}

/// Disassembles the section containing `base_of_code` (falling back to the
/// one containing `entry_point`) and records every `call`/`jmp`/`mov` whose
/// memory operand resolves to one of the import thunk VAs in `import_vas`.
/// Mirrors `collect_import_calls`.
pub fn collect_import_calls(
    data: &[u8],
    sections: &[Section],
    base_of_code: u32,
    entry_point: u32,
    imagebase: u64,
    is_pe32_plus: bool,
    import_vas: &std::collections::HashSet<u64>,
) -> HashMap<u64, Vec<ReferenceSite>> {
    let mut map: HashMap<u64, Vec<ReferenceSite>> = HashMap::new();

    let code_section = sections
        .iter()
        .find(|s| s.contains_rva(base_of_code))
        .or_else(|| sections.iter().find(|s| s.contains_rva(entry_point)));
    let Some(code_section) = code_section else {
        return map;
    };

    let start = code_section.raddr as usize;
    let end = start + code_section.rsize as usize;
    if end > data.len() || start >= end {
        return map;
    }
    let code_bytes = &data[start..end];
    let bitness = if is_pe32_plus { 64 } else { 32 };
    let ip = imagebase + code_section.vaddr as u64;

    let mut decoder = Decoder::with_ip(bitness, code_bytes, ip, DecoderOptions::NONE);
    let mut instr = Instruction::default();
    while decoder.can_decode() {
        decoder.decode_out(&mut instr);

        let mnemonic = instr.mnemonic();
        if !matches!(mnemonic, Mnemonic::Call | Mnemonic::Jmp | Mnemonic::Mov) {
            continue;
        }
        let mem_op_index: u32 = if mnemonic == Mnemonic::Mov { 1 } else { 0 };
        if instr.op_count() <= mem_op_index || instr.op_kind(mem_op_index) != OpKind::Memory {
            continue;
        }

        let (is_absolute, operand_va) = if instr.is_ip_rel_memory_operand() {
            (false, instr.ip_rel_memory_address())
        } else {
            (true, instr.memory_displacement64())
        };
        if operand_va == 0 || !import_vas.contains(&operand_va) {
            continue;
        }

        let offsets = decoder.get_constant_offsets(&instr);
        let (operand_offset, operand_size) = if offsets.has_displacement() {
            (offsets.displacement_offset(), offsets.displacement_size())
        } else if offsets.has_immediate() {
            (offsets.immediate_offset(), offsets.immediate_size())
        } else {
            continue;
        };
        if operand_size == 0 {
            continue;
        }

        let file_offset = (instr.ip() - ip) as usize + start;
        map.entry(operand_va).or_default().push(ReferenceSite {
            file_offset,
            is_absolute,
            operand_offset: operand_offset as usize,
            operand_size: operand_size as usize,
        });
    }

    map
}

/// Rewrites `sample_data` bytes at a recorded reference site so the operand
/// points at `new_va`, preserving the instruction's length and prefix bytes.
/// Mirrors the body of `fix_shuffled_funcs`.
fn fix_reference(sample_data: &mut [u8], site: &ReferenceSite, new_va: u64) {
    let operand_val = if site.is_absolute {
        new_va
    } else {
        // RIP-relative: site.file_offset is the instruction start, and the
        // operand is always the trailing bytes, so the next-IP is the byte
        // right after the operand field.
        let next_ip_offset = site.file_offset + site.operand_offset + site.operand_size;
        new_va.wrapping_sub(next_ip_offset as u64)
    };
    let bytes = operand_val.to_le_bytes();
    let start = site.file_offset + site.operand_offset;
    let end = start + site.operand_size;
    if end <= sample_data.len() {
        sample_data[start..end].copy_from_slice(&bytes[..site.operand_size]);
    }
}

/// Shuffles DLL order, function order within each DLL, and (when contiguous)
/// the name/OFT/FT blocks, then fixes up every reference site collected by
/// `collect_import_calls`. Mirrors `shuffle_imports`.
#[allow(clippy::too_many_arguments)]
pub fn shuffle(
    sample_data: &mut Vec<u8>,
    import_dir: &ImportDir,
    sections: &[Section],
    is_pe32_plus: bool,
    imagebase: u64,
    base_of_code: u32,
    entry_point: u32,
) {
    if import_dir.dlls.is_empty() {
        return;
    }

    let import_vas: std::collections::HashSet<u64> = import_dir.va_list.iter().copied().collect();
    let calls = collect_import_calls(
        sample_data,
        sections,
        base_of_code,
        entry_point,
        imagebase,
        is_pe32_plus,
        &import_vas,
    );

    let contiguity = check_contiguity(&import_dir.dlls);
    let mut dlls: Vec<ImportDll> = import_dir.dlls.clone();

    let mut rng = rand::thread_rng();
    dlls.shuffle(&mut rng);
    for dll in &mut dlls {
        dll.funcs.shuffle(&mut rng);
    }

    if let (Some(name_min), Some(name_max)) = (contiguity.name_min, contiguity.name_max) {
        shuffle_names(sample_data, &mut dlls, name_min, name_max);
    }

    let mut oft_cursor = contiguity.oft_min;
    let mut ft_cursor = contiguity.ft_min;
    let mut fixups: Vec<(ReferenceSite, u64)> = Vec::new();

    for dll in &mut dlls {
        let struct_size = dll.funcs.first().map(|f| f.struct_size).unwrap_or(4);
        let func_count = dll.funcs.len();

        let mut oft_block = Vec::with_capacity((func_count + 1) * struct_size);
        let mut ft_block = Vec::with_capacity((func_count + 1) * struct_size);

        for (i, func) in dll.funcs.iter_mut().enumerate() {
            let original_va = func.func_va;

            if dll.oft_offset != 0 {
                func.func_va = match oft_cursor {
                    Some(base) => (base as i64 + contiguity.oft_delta) as u64 + (i * struct_size) as u64 + imagebase,
                    None => dll.oft_rva as u64 + (i * struct_size) as u64 + imagebase,
                };
            } else if dll.ft_offset != 0 {
                func.func_va = match ft_cursor {
                    Some(base) => (base as i64 + contiguity.ft_delta) as u64 + (i * struct_size) as u64 + imagebase,
                    None => dll.ft_rva as u64 + (i * struct_size) as u64 + imagebase,
                };
            }

            let thunk_val: u64 = if func.is_ordinal {
                func.ordinal_raw
            } else {
                func.hint_name_rva as u64
            };
            let raw = thunk_val.to_le_bytes();
            oft_block.extend_from_slice(&raw[..struct_size]);
            ft_block.extend_from_slice(&raw[..struct_size]);

            if let Some(sites) = calls.get(&original_va) {
                for site in sites {
                    fixups.push((*site, func.func_va));
                }
            }
        }
        oft_block.extend(std::iter::repeat(0u8).take(struct_size));
        ft_block.extend(std::iter::repeat(0u8).take(struct_size));

        if dll.oft_offset != 0 {
            match oft_cursor {
                Some(base) => {
                    write_block(sample_data, base, &oft_block);
                    dll.oft_offset = base;
                    dll.oft_rva = (base as i64 + contiguity.oft_delta) as u32;
                    oft_cursor = Some(base + oft_block.len());
                }
                None => write_block(sample_data, dll.oft_offset, &oft_block),
            }
        }
        if dll.ft_offset != 0 {
            match ft_cursor {
                Some(base) => {
                    write_block(sample_data, base, &ft_block);
                    dll.ft_offset = base;
                    dll.ft_rva = (base as i64 + contiguity.ft_delta) as u32;
                    ft_cursor = Some(base + ft_block.len());
                }
                None => write_block(sample_data, dll.ft_offset, &ft_block),
            }
        }
    }

    let mut dll_block = Vec::with_capacity((dlls.len() + 1) * 20);
    for dll in &dlls {
        dll_block.extend_from_slice(&dll.to_bytes());
    }
    dll_block.extend_from_slice(&[0u8; 20]);
    write_block(sample_data, import_dir.dlls[0].struct_offset, &dll_block);

    for (site, new_va) in &fixups {
        fix_reference(sample_data, site, *new_va);
    }
}

fn write_block(sample_data: &mut [u8], offset: usize, block: &[u8]) {
    let end = offset + block.len();
    if end <= sample_data.len() {
        sample_data[offset..end].copy_from_slice(block);
    }
}

/// Repacks the name block at `name_min`, writing each DLL name followed by
/// every non-ordinal function's `hint+name`, 2-byte aligned. Only commits if
/// the new block still fits before the first non-zero byte past `name_max`.
/// Mirrors `shuffle_names`.
fn shuffle_names(sample_data: &mut [u8], dlls: &mut [ImportDll], name_min: usize, name_max: usize) {
    let mut free_end = name_max;
    while free_end < sample_data.len() && sample_data[free_end] == 0 {
        free_end += 1;
    }

    let mut block = Vec::new();
    let mut cursor = name_min;

    for dll in dlls.iter_mut() {
        let name_delta = dll.name_rva as i64 - dll.name_offset as i64;
        dll.name_offset = cursor;
        dll.name_rva = (cursor as i64 + name_delta) as u32;
        block.extend_from_slice(&dll.name);
        block.push(0);
        cursor += dll.name.len() + 1;

        for func in dll.funcs.iter_mut() {
            if func.is_ordinal {
                continue;
            }
            if cursor % 2 != 0 {
                block.push(0);
                cursor += 1;
            }
            let hint_delta = func.hint_name_rva as i64 - func.hint_name_offset as i64;
            func.hint_name_offset = cursor;
            func.hint_name_rva = (cursor as i64 + hint_delta) as u32;

            let start = block.len();
            block.extend_from_slice(&func.hint.to_le_bytes());
            block.extend_from_slice(&func.name);
            block.push(0);
            if (block.len() - start) % 2 != 0 {
                block.push(0);
            }
            cursor += block.len() - start;
        }
    }

    if name_min + block.len() <= free_end {
        write_block(sample_data, name_min, &block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::imports::ImportFunc;

    fn func(struct_offset: usize, hint_name_offset: usize, func_va: u64) -> ImportFunc {
        ImportFunc {
            index: 0,
            struct_offset,
            struct_size: 4,
            is_ordinal: false,
            ordinal_raw: 0,
            hint: 1,
            hint_name_rva: hint_name_offset as u32 + 0x1000,
            hint_name_offset,
            name: b"Func".to_vec(),
            func_va,
        }
    }

    fn dll(struct_offset: usize, name_offset: usize, oft_offset: usize, ft_offset: usize, funcs: Vec<ImportFunc>) -> ImportDll {
        ImportDll {
            index: 0,
            struct_offset,
            oft_rva: oft_offset as u32 + 0x1000,
            oft_offset,
            time_date_stamp: 0,
            forwarder_chain: 0,
            name_rva: name_offset as u32 + 0x1000,
            name_offset,
            name: b"a.dll".to_vec(),
            ft_rva: ft_offset as u32 + 0x1000,
            ft_offset,
            funcs,
        }
    }

    #[test]
    fn fix_reference_preserves_absolute_operand_size() {
        let mut sample = vec![0u8; 16];
        sample[0..6].copy_from_slice(&[0xff, 0x25, 0xaa, 0xaa, 0xaa, 0xaa]);
        let site = ReferenceSite {
            file_offset: 0,
            is_absolute: true,
            operand_offset: 2,
            operand_size: 4,
        };
        fix_reference(&mut sample, &site, 0x2000);
        assert_eq!(&sample[2..6], &0x2000u32.to_le_bytes());
    }

    #[test]
    fn fix_reference_computes_rip_relative_delta() {
        let mut sample = vec![0u8; 16];
        let site = ReferenceSite {
            file_offset: 0,
            is_absolute: false,
            operand_offset: 2,
            operand_size: 4,
        };
        // instruction is 6 bytes, so next_ip = file_offset + 6; target 0x2006
        // means disp must be 0x2000.
        fix_reference(&mut sample, &site, 0x2006);
        assert_eq!(&sample[2..6], &0x2000u32.to_le_bytes());
    }

    #[test]
    fn shuffle_names_repacks_contiguous_block() {
        let mut sample = vec![0u8; 0x100];
        sample[0x10..0x16].copy_from_slice(b"a.dll\0");
        let mut dlls = vec![dll(0, 0x10, 0, 0, vec![func(0, 0x16, 0)])];
        shuffle_names(&mut sample, &mut dlls, 0x10, 0x1c);
        assert_eq!(&sample[0x10..0x15], b"a.dll");
    }
}
