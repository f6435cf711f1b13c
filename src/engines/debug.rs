//! Debug Engine: transplants `IMAGE_DEBUG_DIRECTORY` entries in place when an
//! acceptor slot is large enough to hold a donor's, or else hands a spill
//! block to the Resource Engine.

use crate::pe::debug::{DebugDirectory, DebugEntry, DEBUG_ENTRY_SIZE};
use crate::util::align_up;

/// Clears every debug struct+data region to zero. Mirrors `clear_dbg`, used
/// before an in-resources debug block replaces the original entries.
pub fn clear_debug(sample_data: &mut [u8], dir: &DebugDirectory, hdr_size: usize) {
    sample_data[dir.hdr_offset..dir.hdr_offset + hdr_size].fill(0);
    for entry in &dir.entries {
        if entry.struct_offset != 0 {
            sample_data[entry.struct_offset..entry.struct_offset + DEBUG_ENTRY_SIZE].fill(0);
            if entry.data_offset != 0 {
                let end = entry.data_offset + entry.data_size as usize;
                sample_data[entry.data_offset..end].fill(0);
            }
        }
    }
}

/// Result of the in-place transplant attempt: how many acceptor entries were
/// actually rewritten, out of how many exist.
pub struct DebugTransplantResult {
    pub changed: usize,
    pub total: usize,
}

/// Sorts acceptor entries ascending and donor entries descending by size,
/// first-fit matching each acceptor slot against the smallest donor entry
/// that still fits it. Mirrors `set_dbg`.
pub fn transplant(
    sample_data: &mut [u8],
    acceptor_entries: &[DebugEntry],
    donor_data: &[u8],
    donor_entries: &[DebugEntry],
) -> DebugTransplantResult {
    let mut acceptor: Vec<DebugEntry> = acceptor_entries.to_vec();
    acceptor.sort_by_key(|e| e.data_size);
    let mut donor: Vec<DebugEntry> = donor_entries.to_vec();
    donor.sort_by_key(|e| std::cmp::Reverse(e.data_size));

    let mut changed = 0usize;
    for odbg in &acceptor {
        let mut idx = 0;
        while idx < donor.len() {
            if odbg.fits(&donor[idx]) {
                let ddbg = donor.remove(idx);
                let mut this_changed = false;
                if odbg.data_size != ddbg.data_size && odbg.struct_offset != 0 && ddbg.struct_offset != 0 {
                    let donor_head = &donor_data[ddbg.struct_offset..ddbg.struct_offset + 20];
                    let acceptor_tail = sample_data[odbg.struct_offset + 20..odbg.struct_offset + 28].to_vec();
                    sample_data[odbg.struct_offset..odbg.struct_offset + 20].copy_from_slice(donor_head);
                    sample_data[odbg.struct_offset + 20..odbg.struct_offset + 28].copy_from_slice(&acceptor_tail);
                    this_changed = true;
                }
                if odbg.data_offset != 0 && ddbg.data_offset != 0 {
                    let donor_bytes = &donor_data[ddbg.data_offset..ddbg.data_offset + ddbg.data_size as usize];
                    let end = odbg.data_offset + odbg.data_size as usize;
                    sample_data[odbg.data_offset..odbg.data_offset + ddbg.data_size as usize]
                        .copy_from_slice(donor_bytes);
                    let pad_start = odbg.data_offset + ddbg.data_size as usize;
                    sample_data[pad_start..end].fill(0);
                    this_changed = true;
                }
                if this_changed {
                    changed += 1;
                }
                break;
            }
            idx += 1;
        }
    }

    DebugTransplantResult {
        changed,
        total: acceptor_entries.len(),
    }
}

/// Builds a single block (struct array followed by data blobs) suitable for
/// appending to the `.rsrc` section when no acceptor debug slot fits any
/// donor entry. Mirrors `dbg_to_resource_block`.
pub fn debug_to_resource_block(donor_data: &[u8], donor_entries: &[DebugEntry], start_offset: u32, start_va: u32) -> Vec<u8> {
    let struct_size = DEBUG_ENTRY_SIZE * donor_entries.len();
    let aligned_struct_size = align_up(struct_size as u32, 16) as usize;

    let mut struct_bytes = Vec::with_capacity(aligned_struct_size);
    let mut data_bytes = Vec::new();

    let mut data_last_offset = start_offset + aligned_struct_size as u32;
    let mut data_last_va = start_va + aligned_struct_size as u32;

    for entry in donor_entries {
        struct_bytes.extend_from_slice(&donor_data[entry.struct_offset..entry.struct_offset + 20]);
        struct_bytes.extend_from_slice(&data_last_va.to_le_bytes());
        struct_bytes.extend_from_slice(&data_last_offset.to_le_bytes());
        data_last_offset += entry.data_size;
        data_last_va += entry.data_size;
        data_bytes.extend_from_slice(&donor_data[entry.data_offset..entry.data_offset + entry.data_size as usize]);
    }

    struct_bytes.resize(aligned_struct_size, 0);
    let data_pad = (16 - data_bytes.len() % 16) % 16;
    data_bytes.resize(data_bytes.len() + data_pad, 0);

    let mut block = struct_bytes;
    block.extend_from_slice(&data_bytes);
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(struct_offset: usize, data_offset: usize, data_size: u32) -> DebugEntry {
        DebugEntry {
            hdr_offset: 0,
            struct_offset,
            data_va: 0,
            data_offset,
            data_size,
        }
    }

    #[test]
    fn first_fit_matches_smallest_sufficient_donor() {
        let mut sample = vec![0u8; 0x200];
        let acceptor = vec![entry(0x10, 0x100, 50)];
        let donor_data = {
            let mut d = vec![0u8; 0x200];
            d[0x20..0x20 + 20].copy_from_slice(&[7u8; 20]);
            d[0x120..0x120 + 40].copy_from_slice(&[9u8; 40]);
            d
        };
        let donor = vec![entry(0x20, 0x120, 40)];
        let result = transplant(&mut sample, &acceptor, &donor_data, &donor);
        assert_eq!(result.changed, 1);
        assert_eq!(&sample[0x100..0x100 + 40], &[9u8; 40][..]);
    }

    #[test]
    fn resource_block_lays_out_struct_then_data() {
        let mut donor_data = vec![0u8; 0x100];
        donor_data[0x10..0x10 + 20].copy_from_slice(&[1u8; 20]);
        donor_data[0x40..0x40 + 8].copy_from_slice(&[2u8; 8]);
        let entries = vec![entry(0x10, 0x40, 8)];
        let block = debug_to_resource_block(&donor_data, &entries, 0x1000, 0x2000);
        assert_eq!(block.len() % 16, 0);
        assert!(block.len() >= 28 + 8);
    }
}
