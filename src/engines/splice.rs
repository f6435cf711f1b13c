//! Splice Controller: runs every enabled engine over one acceptor/donor pair
//! in the fixed order `get_sample_data` used — rich, stamp, import shuffle,
//! debug, resources, sign, section names, checksum — threading a single
//! running end-of-raw-data cursor from the resource/debug steps into the
//! sign step, exactly as the original's `end_of_data` local does.

use crate::diagnostics::Diagnostics;
use crate::engines::{checksum, debug, imports, resources, rich, sign};
use crate::error::{PeError, Result};
use crate::options::Options;
use crate::pe::resources::{ResChild, ResDataEntry, ResDirEntry, ResourceTree};
use crate::pe::section::Section;
use crate::pe::PeImage;
use crate::util::align_up;

/// Resource type ID a spilled debug block is filed under when no acceptor
/// debug slot fits the donor's and `dbg_to_rsrc` is enabled. Arbitrary but
/// fixed so repeated runs spill to the same place.
const DEBUG_SPILL_RESOURCE_ID: u32 = 0xD0DB;

/// Runs the whole transplant pipeline and returns the new acceptor bytes.
/// Does not touch `acceptor`/`donor`; callers write the result themselves.
pub fn splice(acceptor: &PeImage, donor: &PeImage, options: &Options, diag: &dyn Diagnostics) -> Result<Vec<u8>> {
    let mut sample_data = acceptor.data.clone();
    let e_lfanew = acceptor.e_lfanew();
    let mut end_of_data = sample_data.len();

    if options.rich {
        if let (Some(acc_rich), Some(donor_rich)) = (&acceptor.rich, &donor.rich) {
            if !acc_rich.fits(donor_rich) {
                return Err(PeError::CapacityMiss);
            }
            let donor_raw = &donor.data[donor_rich.struct_offset..donor_rich.struct_offset + donor_rich.struct_size];
            rich::transplant(
                &mut sample_data,
                acc_rich.struct_offset,
                acc_rich.struct_size,
                donor_raw,
                donor_rich.struct_offset,
                &acceptor.sections,
                e_lfanew,
                acceptor.header.is_pe32_plus,
                options.rich_fix,
                diag,
            );
        }
    }

    if options.stamp {
        let acc_off = acceptor.stamp_offset();
        let donor_off = donor.stamp_offset();
        sample_data[acc_off..acc_off + crate::pe::STAMP_STRUCT_SIZE]
            .copy_from_slice(&donor.data[donor_off..donor_off + crate::pe::STAMP_STRUCT_SIZE]);
    }

    if options.imp {
        if let Some(import_dir) = &acceptor.imports {
            imports::shuffle(
                &mut sample_data,
                import_dir,
                &acceptor.sections,
                acceptor.header.is_pe32_plus,
                acceptor.header.image_base,
                acceptor.header.base_of_code,
                acceptor.header.address_of_entry_point,
            );
        }
    }

    let mut debug_spill: Option<Vec<u8>> = None;
    if options.dbg {
        if let (Some(acc_dbg), Some(donor_dbg)) = (&acceptor.debug, &donor.debug) {
            if !donor_dbg.entries.is_empty() {
                let result = debug::transplant(&mut sample_data, &acc_dbg.entries, &donor.data, &donor_dbg.entries);
                if result.changed < result.total && options.dbg_to_rsrc {
                    if let Some(rsrc) = acceptor.rsrc_section() {
                        let start_offset = rsrc.raddr + rsrc.rsize;
                        let start_va = rsrc.vaddr + rsrc.vsize;
                        debug_spill = Some(debug::debug_to_resource_block(
                            &donor.data,
                            &donor_dbg.entries,
                            start_offset,
                            start_va,
                        ));
                    }
                }
            }
        }
    }

    if options.res || options.vi || debug_spill.is_some() {
        if let Some(acceptor_res) = &acceptor.resources {
            let empty = ResourceTree::default();
            let donor_res = donor.resources.as_ref().unwrap_or(&empty);
            let mut merged = resources::merge(acceptor_res, donor_res, options.vi, options.res);
            if let Some(block) = debug_spill {
                inject_raw_resource(&mut merged, DEBUG_SPILL_RESOURCE_ID, block);
            }

            if let Some(rsrc_section) = acceptor.rsrc_section() {
                let flat = resources::flatten(&merged, rsrc_section.vaddr);
                let mut bytes = flat.bytes;
                let padded_len = align_up(bytes.len() as u32, acceptor.header.file_alignment) as usize;
                bytes.resize(padded_len, 0);

                let next_sections = acceptor.sections_after_rsrc();
                let result = resources::splice_rsrc(
                    &mut sample_data,
                    rsrc_section,
                    &next_sections,
                    &bytes,
                    e_lfanew,
                    acceptor.header.section_alignment,
                );
                end_of_data = result.end_of_data;
            }
        }
    }

    if options.sign {
        if let (Some(acc_sign), Some(donor_sign)) = (&acceptor.sign, &donor.sign) {
            if let Some((offset, size)) = sign::transplant(&mut sample_data, acc_sign, end_of_data, &donor.data, donor_sign) {
                sample_data[acc_sign.hdr_offset..acc_sign.hdr_offset + 4].copy_from_slice(&offset.to_le_bytes());
                sample_data[acc_sign.hdr_offset + 4..acc_sign.hdr_offset + 8].copy_from_slice(&size.to_le_bytes());
            }
        }
    }

    if options.names {
        change_section_names(&mut sample_data, &acceptor.sections, &donor.sections);
    }

    if options.update_checksum {
        checksum::update_checksum(&mut sample_data);
    }

    Ok(sample_data)
}

/// Drives the removal-only pipeline: rich, stamp, debug, version info,
/// signature, overlay, in that order, each stripping rather than
/// transplanting. Mirrors `clear_original`.
pub fn remove(acceptor: &PeImage, options: &Options) -> Result<Vec<u8>> {
    let mut sample_data = acceptor.data.clone();
    let e_lfanew = acceptor.e_lfanew();
    let mut last_offset: usize = 0;

    if options.remove_rich {
        if let Some(rich_slot) = &acceptor.rich {
            sample_data[rich_slot.struct_offset..rich_slot.struct_offset + rich_slot.struct_size].fill(0);
        }
    }

    if options.remove_stamp {
        let off = acceptor.stamp_offset();
        sample_data[off..off + crate::pe::STAMP_STRUCT_SIZE].fill(0);
    }

    if options.remove_dbg {
        if let Some(dbg) = &acceptor.debug {
            debug::clear_debug(&mut sample_data, dbg, 8);
        }
    }

    if options.remove_vi {
        if let Some(acceptor_res) = &acceptor.resources {
            if let Some(rsrc_section) = acceptor.rsrc_section() {
                let mut stripped = acceptor_res.clone();
                if stripped.dirs[stripped.root].vi.take().is_some() {
                    stripped.dirs[stripped.root].id_entries_count =
                        stripped.dirs[stripped.root].id_entries_count.saturating_sub(1);
                }
                let flat = resources::flatten(&stripped, rsrc_section.vaddr);
                let mut bytes = flat.bytes;
                let padded_len = align_up(bytes.len() as u32, acceptor.header.file_alignment) as usize;
                bytes.resize(padded_len, 0);
                let next_sections = acceptor.sections_after_rsrc();
                let result = resources::splice_rsrc(
                    &mut sample_data,
                    rsrc_section,
                    &next_sections,
                    &bytes,
                    e_lfanew,
                    acceptor.header.section_alignment,
                );
                last_offset = result.end_of_data;
            }
        }
        if !options.remove_sign {
            fix_sign(&mut sample_data, acceptor, last_offset);
        }
    }

    if options.remove_sign {
        if let Some(sign_part) = &acceptor.sign {
            sample_data[sign_part.hdr_offset..sign_part.hdr_offset + 8].fill(0);
            let data_offset = if last_offset > 0 && last_offset != sign_part.data_offset {
                last_offset
            } else {
                sign_part.data_offset
            };
            let end = data_offset + sign_part.data_size as usize;
            if end <= sample_data.len() {
                sample_data.drain(data_offset..end);
            }
        }
    }

    if options.remove_overlay {
        if let Some(overlay) = &acceptor.overlay {
            let data_offset = if last_offset > 0 && last_offset != overlay.data_offset {
                last_offset
            } else {
                overlay.data_offset
            };
            if data_offset < sample_data.len() {
                sample_data.truncate(data_offset);
            }
        }
    }

    if options.update_checksum {
        checksum::update_checksum(&mut sample_data);
    }

    Ok(sample_data)
}

/// Rewrites just the Security Directory's offset field to `last_offset`,
/// leaving size untouched. Mirrors `fix_sign`.
fn fix_sign(sample_data: &mut [u8], acceptor: &PeImage, last_offset: usize) {
    if last_offset == 0 {
        return;
    }
    if let Some(sign_part) = &acceptor.sign {
        if sign_part.data_offset > 0 {
            sample_data[sign_part.hdr_offset..sign_part.hdr_offset + 4]
                .copy_from_slice(&(last_offset as u32).to_le_bytes());
        }
    }
}

fn inject_raw_resource(tree: &mut ResourceTree, id: u32, bytes: Vec<u8>) {
    let data_idx = tree.data.len();
    let size = bytes.len() as u32;
    tree.data.push(ResDataEntry {
        struct_offset: 0,
        data_va: 0,
        data_offset: 0,
        data_size: size,
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
    let root = tree.root;
    tree.dirs[root].entries.push(entry_idx);
    tree.dirs[root].id_entries_count += 1;
}

/// Walks both section lists in lockstep, skipping `.rsrc` sections on either
/// side without advancing both indices together, and overwrites only the
/// 8-byte name field where the two names differ. Mirrors `change_section_names`.
fn change_section_names(sample_data: &mut [u8], acceptor_sections: &[Section], donor_sections: &[Section]) {
    let mut o = 0;
    let mut d = 0;
    while o < acceptor_sections.len() && d < donor_sections.len() {
        if acceptor_sections[o].is_rsrc() {
            o += 1;
            continue;
        }
        if donor_sections[d].is_rsrc() {
            d += 1;
            continue;
        }
        let acc = &acceptor_sections[o];
        let don = &donor_sections[d];
        if acc.name != don.name {
            sample_data[acc.struct_offset..acc.struct_offset + 8].copy_from_slice(&don.name);
            log::info!("{} -> {}", acc.name_str(), don.name_str());
        }
        o += 1;
        d += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::section::Section;

    fn section(offset: usize, name: &[u8; 8]) -> Section {
        Section {
            struct_offset: offset,
            name: *name,
            vsize: 0,
            vaddr: 0,
            rsize: 0,
            raddr: 0,
        }
    }

    #[test]
    fn renames_section_and_skips_rsrc() {
        let mut sample = vec![0u8; 0x100];
        let acceptor_sections = vec![section(0x10, b".text\0\0\0"), section(0x38, b".rsrc\0\0\0"), section(0x60, b".data\0\0\0")];
        let donor_sections = vec![section(0, b".CODE\0\0\0"), section(0, b".rsrc\0\0\0"), section(0, b".DATA\0\0\0")];
        change_section_names(&mut sample, &acceptor_sections, &donor_sections);
        assert_eq!(&sample[0x10..0x18], b".CODE\0\0\0");
        assert_eq!(&sample[0x60..0x68], b".DATA\0\0\0");
        assert_eq!(&sample[0x38..0x40], &[0u8; 8]);
    }

    #[test]
    fn injects_spill_resource_as_top_level_entry() {
        let mut tree = ResourceTree::default();
        tree.dirs.push(crate::pe::resources::ResDir {
            struct_offset: 0,
            characteristics: 0,
            time_date_stamp: 0,
            major_version: 0,
            minor_version: 0,
            named_entries_count: 0,
            id_entries_count: 0,
            vi: None,
            entries: Vec::new(),
        });
        tree.root = 0;
        inject_raw_resource(&mut tree, DEBUG_SPILL_RESOURCE_ID, vec![1, 2, 3]);
        assert_eq!(tree.dirs[0].entries.len(), 1);
        assert_eq!(tree.dirs[0].id_entries_count, 1);
    }
}
