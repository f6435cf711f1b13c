//! Resource Engine: merges two resource trees and re-flattens the result
//! into a fresh `.rsrc` byte blob, cascading section-table and
//! `SizeOfImage` updates when the blob's size changes.
//!
//! The merged tree is always a fresh arena (never the acceptor's own), since
//! it is a throwaway used once to compute new byte offsets — mirrors the
//! original's `copy.deepcopy` before merging, translated to "build a new
//! arena" rather than "deep-copy an owned graph".

use crate::pe::resources::{ResChild, ResDataEntry, ResDir, ResDirEntry, ResourceTree};
use crate::pe::section::Section;
use crate::util::align_up;

/// Mirrors `merge_resources`: clones the acceptor tree, optionally swaps its
/// `RT_VERSION` subtree for the donor's, optionally appends the donor's
/// top-level entries.
pub fn merge(acceptor: &ResourceTree, donor: &ResourceTree, replace_vi: bool, add_resources: bool) -> ResourceTree {
    let mut merged = acceptor.clone();

    if replace_vi {
        if let Some(donor_vi) = donor.dirs[donor.root].vi {
            if merged.dirs[merged.root].vi.is_none() {
                merged.dirs[merged.root].id_entries_count += 1;
            }
            let new_idx = graft(&mut merged, donor, donor_vi);
            merged.dirs[merged.root].vi = Some(new_idx);
        }
    }

    if add_resources {
        let donor_entries = acceptor_root_entries(donor);
        for eid in donor_entries {
            let is_named = donor.entries[eid].id.is_none();
            let new_idx = graft(&mut merged, donor, eid);
            if is_named {
                merged.dirs[merged.root].named_entries_count += 1;
            } else {
                merged.dirs[merged.root].id_entries_count += 1;
            }
            merged.dirs[merged.root].entries.push(new_idx);
        }
    }

    merged
}

fn acceptor_root_entries(tree: &ResourceTree) -> Vec<usize> {
    tree.dirs[tree.root].entries.clone()
}

/// Copies the subtree rooted at `entries[src_entry]` of `src` into `dst`,
/// returning the new entry's index in `dst.entries`.
fn graft(dst: &mut ResourceTree, src: &ResourceTree, src_entry: usize) -> usize {
    let entry = &src.entries[src_entry];
    let child = match entry.child {
        ResChild::Dir(d) => ResChild::Dir(graft_dir(dst, src, d)),
        ResChild::Data(d) => ResChild::Data(graft_data(dst, &src.data[d])),
    };
    dst.entries.push(ResDirEntry {
        struct_offset: 0,
        name_indent: entry.name_indent,
        bname: entry.bname.clone(),
        id: entry.id,
        child,
    });
    dst.entries.len() - 1
}

fn graft_dir(dst: &mut ResourceTree, src: &ResourceTree, src_dir: usize) -> usize {
    let dir = &src.dirs[src_dir];
    let new_entries: Vec<usize> = dir.entries.iter().map(|&e| graft(dst, src, e)).collect();
    let new_vi = dir.vi.map(|e| graft(dst, src, e));
    dst.dirs.push(ResDir {
        struct_offset: 0,
        characteristics: dir.characteristics,
        time_date_stamp: dir.time_date_stamp,
        major_version: dir.major_version,
        minor_version: dir.minor_version,
        named_entries_count: dir.named_entries_count,
        id_entries_count: dir.id_entries_count,
        vi: new_vi,
        entries: new_entries,
    });
    dst.dirs.len() - 1
}

fn graft_data(dst: &mut ResourceTree, data: &ResDataEntry) -> usize {
    dst.data.push(data.clone());
    dst.data.len() - 1
}

enum LevelItem {
    Dir(usize),
    Data(usize),
}

struct EntryPatch {
    entry_idx: usize,
    is_dir: bool,
}

/// Output of flattening: three concatenated byte regions, ready to become
/// the new `.rsrc` raw content once padded to file alignment.
pub struct FlatRsrc {
    pub bytes: Vec<u8>,
}

/// Walks the merged tree level-by-level (directory structs for all levels,
/// then name strings, then data payloads) and assigns every pointer.
/// Mirrors `get_flat_resources` / `set_resources`'s repacking loop.
pub fn flatten(tree: &ResourceTree, rsrc_vaddr: u32) -> FlatRsrc {
    // Step 1: BFS layering, if the vi slot is populated fold it into entries
    // the same way the original appends res_dir.vi to res_dir.entries.
    let mut levels: Vec<Vec<LevelItem>> = vec![vec![LevelItem::Dir(tree.root)]];
    let mut parents: Vec<Vec<EntryPatch>> = vec![Vec::new()];

    loop {
        let current = levels.last().unwrap();
        let mut next = Vec::new();
        let mut next_parents = Vec::new();
        for item in current {
            if let LevelItem::Dir(dir_idx) = item {
                let dir = &tree.dirs[*dir_idx];
                let mut ids = dir.entries.clone();
                if let Some(vi) = dir.vi {
                    ids.push(vi);
                }
                for eid in ids {
                    let is_dir = matches!(tree.entries[eid].child, ResChild::Dir(_));
                    match tree.entries[eid].child {
                        ResChild::Dir(d) => next.push(LevelItem::Dir(d)),
                        ResChild::Data(d) => next.push(LevelItem::Data(d)),
                    }
                    next_parents.push(EntryPatch { entry_idx: eid, is_dir });
                }
            }
        }
        if next.is_empty() {
            break;
        }
        levels.push(next);
        parents.push(next_parents);
    }

    let item_size = |item: &LevelItem| -> u32 {
        match item {
            LevelItem::Dir(d) => tree.dirs[*d].block_size(),
            LevelItem::Data(_) => 16,
        }
    };

    let mut level_start = vec![0u32; levels.len()];
    for lvl in 1..levels.len() {
        let prev_size: u32 = levels[lvl - 1].iter().map(item_size).sum();
        level_start[lvl] = level_start[lvl - 1] + prev_size;
    }

    // computed indent (struct-region-relative) for each entry, keyed by entry index
    let mut entry_child_indent = vec![0u32; tree.entries.len()];
    for (lvl, items) in levels.iter().enumerate().skip(1) {
        let mut running = level_start[lvl];
        for (i, item) in items.iter().enumerate() {
            let patch = &parents[lvl][i];
            entry_child_indent[patch.entry_idx] = running | if patch.is_dir { 0x8000_0000 } else { 0 };
            running += item_size(item);
        }
    }

    // name region: walk entries in the same order they'll be serialized,
    // assigning each named entry's name_id pointer.
    let mut name_region = Vec::new();
    let mut entry_name_id = vec![None::<u32>; tree.entries.len()];
    for items in &levels {
        for item in items {
            if let LevelItem::Dir(dir_idx) = item {
                let dir = &tree.dirs[*dir_idx];
                let mut ids = dir.entries.clone();
                if let Some(vi) = dir.vi {
                    ids.push(vi);
                }
                for eid in ids {
                    if let Some(bname) = &tree.entries[eid].bname {
                        if name_region.len() % 2 != 0 {
                            name_region.push(0);
                        }
                        let offset = name_region.len() as u32;
                        name_region.extend_from_slice(bname);
                        entry_name_id[eid] = Some(offset | 0x8000_0000);
                    }
                }
            }
        }
    }

    // data region: data entries in BFS order, 4-byte aligned by running VA.
    let mut data_region = Vec::new();
    let mut data_va = vec![0u32; tree.data.len()];
    let mut last_va = rsrc_vaddr;
    for items in &levels {
        for item in items {
            if let LevelItem::Data(data_idx) = item {
                let entry = &tree.data[*data_idx];
                let pad = (4 - (last_va % 4)) % 4;
                for _ in 0..pad {
                    data_region.push(0);
                }
                last_va += pad;
                data_va[*data_idx] = last_va;
                data_region.extend_from_slice(&entry.data_bytes);
                last_va += entry.data_bytes.len() as u32;
            }
        }
    }

    // struct region: serialize dirs and dir-entries and data structs in BFS order.
    let mut struct_region = Vec::new();
    for items in &levels {
        for item in items {
            match item {
                LevelItem::Dir(dir_idx) => {
                    let dir = &tree.dirs[*dir_idx];
                    struct_region.extend_from_slice(&dir.to_bytes());
                    let mut ids = dir.entries.clone();
                    if let Some(vi) = dir.vi {
                        ids.push(vi);
                    }
                    for eid in ids {
                        let entry = &tree.entries[eid];
                        let name_or_id = match entry.id {
                            Some(id) => id,
                            None => entry_name_id[eid].unwrap_or(0),
                        };
                        struct_region.extend_from_slice(&name_or_id.to_le_bytes());
                        struct_region.extend_from_slice(&entry_child_indent[eid].to_le_bytes());
                    }
                }
                LevelItem::Data(data_idx) => {
                    let entry = &tree.data[*data_idx];
                    struct_region.extend_from_slice(&data_va[*data_idx].to_le_bytes());
                    struct_region.extend_from_slice(&entry.data_size.to_le_bytes());
                    struct_region.extend_from_slice(&entry.code_page.to_le_bytes());
                    struct_region.extend_from_slice(&entry.reserved.to_le_bytes());
                }
            }
        }
    }

    let mut bytes = struct_region;
    bytes.extend_from_slice(&name_region);
    bytes.extend_from_slice(&data_region);
    FlatRsrc { bytes }
}

/// Result of substituting the new `.rsrc` blob back into the file: the
/// updated byte buffer and the cursor marking end-of-raw-data (used by the
/// Sign Engine to know where the overlay/signature may start).
pub struct ResourceSpliceResult {
    pub end_of_data: usize,
}

/// Substitutes `flat.bytes` (already padded to file alignment by the caller)
/// into the `.rsrc` section and cascades SizeOfRawData/SizeOfInitializedData/
/// VirtualSize/next-sections'-addresses/SizeOfImage. Mirrors the tail half of
/// `set_resources`.
pub fn splice_rsrc(
    sample_data: &mut Vec<u8>,
    rsrc_section: &Section,
    next_sections: &[Section],
    new_rsrc_bytes: &[u8],
    e_lfanew: usize,
    section_alignment: u32,
) -> ResourceSpliceResult {
    let rsrc_rsz = new_rsrc_bytes.len() as u32;
    let old_rsize = rsrc_section.rsize;
    let old_raddr = rsrc_section.raddr as usize;

    let tail = sample_data[old_raddr + old_rsize as usize..].to_vec();
    sample_data.truncate(old_raddr);
    sample_data.extend_from_slice(new_rsrc_bytes);
    sample_data.extend_from_slice(&tail);

    let mut end_of_data = old_raddr + rsrc_rsz as usize;

    if rsrc_rsz != old_rsize {
        sample_data[rsrc_section.struct_offset + 16..rsrc_section.struct_offset + 20]
            .copy_from_slice(&rsrc_rsz.to_le_bytes());

        let size_off = e_lfanew + crate::pe::header::OFF_SIZE_OF_INITIALIZED_DATA;
        let mut size_of_init_data = u32::from_le_bytes(sample_data[size_off..size_off + 4].try_into().unwrap());
        if rsrc_rsz > old_rsize {
            size_of_init_data += rsrc_rsz - old_rsize;
        } else {
            size_of_init_data += old_rsize - rsrc_rsz;
        }
        sample_data[size_off..size_off + 4].copy_from_slice(&size_of_init_data.to_le_bytes());

        let mut rsrc_vsz = rsrc_section.vsize;
        if rsrc_rsz > rsrc_vsz {
            rsrc_vsz = rsrc_rsz;
            sample_data[rsrc_section.struct_offset + 8..rsrc_section.struct_offset + 12]
                .copy_from_slice(&rsrc_vsz.to_le_bytes());
        }
        let mut size_of_image = rsrc_section.vaddr + rsrc_vsz;

        if !next_sections.is_empty() {
            let mut rpointer = old_raddr as u32 + rsrc_rsz;
            let mut vpointer = rsrc_section.vaddr + rsrc_vsz;
            for ns in next_sections {
                vpointer = align_up(vpointer, section_alignment);
                sample_data[ns.struct_offset + 12..ns.struct_offset + 16].copy_from_slice(&vpointer.to_le_bytes());
                sample_data[ns.struct_offset + 20..ns.struct_offset + 24].copy_from_slice(&rpointer.to_le_bytes());
                rpointer += ns.rsize;
                vpointer += ns.vsize;
            }
            size_of_image = vpointer;
            end_of_data = rpointer as usize;
        }

        let size_img_off = e_lfanew + crate::pe::header::OFF_SIZE_OF_IMAGE;
        sample_data[size_img_off..size_img_off + 4].copy_from_slice(&size_of_image.to_le_bytes());
    }

    ResourceSpliceResult { end_of_data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::resources::ResChild;

    fn single_data_tree(id: u32, bytes: Vec<u8>) -> ResourceTree {
        let mut tree = ResourceTree::default();
        let data_idx = tree.data.len();
        tree.data.push(ResDataEntry {
            struct_offset: 0,
            data_va: 0,
            data_offset: 0,
            data_size: bytes.len() as u32,
            code_page: 0,
            reserved: 0,
            data_bytes: bytes,
        });
        let entry_idx = tree.entries.len();
        tree.entries.push(ResDirEntry {
            struct_offset: 0,
            name_indent: None,
            bname: None,
            id: Some(id),
            child: ResChild::Data(data_idx),
        });
        tree.dirs.push(ResDir {
            struct_offset: 0,
            characteristics: 0,
            time_date_stamp: 0,
            major_version: 0,
            minor_version: 0,
            named_entries_count: 0,
            id_entries_count: 1,
            vi: None,
            entries: vec![entry_idx],
        });
        tree.root = 0;
        tree
    }

    #[test]
    fn flattens_single_leaf() {
        let tree = single_data_tree(3, vec![1, 2, 3, 4]);
        let flat = flatten(&tree, 0x4000);
        // struct region: 16 (root dir) + 8 (entry) + 16 (data struct) = 40 bytes, then 4 data bytes
        assert_eq!(flat.bytes.len(), 44);
    }

    #[test]
    fn merge_appends_donor_entries() {
        let acceptor = single_data_tree(1, vec![0xaa]);
        let donor = single_data_tree(2, vec![0xbb]);
        let merged = merge(&acceptor, &donor, false, true);
        assert_eq!(merged.dirs[merged.root].entries.len(), 2);
        assert_eq!(merged.dirs[merged.root].id_entries_count, 2);
    }
}
