//! `PeImage`: one parsed PE, aggregating every sub-model the engines need.
//!
//! Construction is the Reader described in spec §4.1: a single pass that
//! builds the header, section table, and every optional region, routing
//! per-region parse failures through `Diagnostics` in strict (acceptor) mode
//! and silently disqualifying the capability in donor mode.

pub mod debug;
pub mod header;
pub mod imports;
pub mod relocs;
pub mod resources;
pub mod rich;
pub mod section;
pub mod sign;

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use debug::DebugDirectory;
use header::PeHeader;
use imports::ImportDir;
use relocs::RelocTable;
use resources::ResourceTree;
use rich::RichSlot;
use section::Section;
use sign::{OverlayPart, SignPart};

pub const OFF_TIME_DATE_STAMP: usize = header::OFF_TIME_DATE_STAMP;
pub const STAMP_STRUCT_SIZE: usize = 4;

#[derive(Debug)]
pub struct PeImage {
    pub data: Vec<u8>,
    pub header: PeHeader,
    pub sections: Vec<Section>,
    pub rich: Option<RichSlot>,
    pub imports: Option<ImportDir>,
    pub relocs: Option<RelocTable>,
    pub debug: Option<DebugDirectory>,
    pub resources: Option<ResourceTree>,
    pub sign: Option<SignPart>,
    pub overlay: Option<OverlayPart>,
}

impl PeImage {
    /// Parses `data` into a full `PeImage`. `strict` is the acceptor
    /// (`checking_original`) mode: region parse failures prompt via `diag`
    /// and may disable that capability for the session rather than aborting;
    /// non-strict (donor) mode disables the capability silently.
    pub fn read(data: Vec<u8>, strict: bool, diag: &dyn Diagnostics) -> Result<Self> {
        let header = PeHeader::read(&data)?;
        let eof = data.len();
        let sections = section::read_sections(&data, header.e_lfanew, eof, strict)?;

        let rich = rich::find_rich(&data, header.e_lfanew)
            .or_else(|| rich::find_rich_synthesis_slot(&data, header.e_lfanew));
        if rich.is_none() && strict {
            diag.warn("rich", "no Rich header and no usable synthesis slot");
        }

        macro_rules! region {
            ($kind:expr, $result:expr) => {
                match $result {
                    Ok(v) => v,
                    Err(e) => {
                        if strict {
                            if diag.confirm_or_abort($kind, &e.to_string()) {
                                None
                            } else {
                                return Err(e);
                            }
                        } else {
                            None
                        }
                    }
                }
            };
        }

        let imports = region!(
            "imports",
            imports::read_imports(
                &data,
                header.e_lfanew + header.directories.import,
                &sections,
                eof,
                header.is_pe32_plus,
                header.image_base,
            )
        );

        let relocs = relocs::read_relocs(&data, header.e_lfanew + header.directories.basereloc, &sections)?;

        let debug = region!(
            "debug",
            debug::read_debug_directory(
                &data,
                header.e_lfanew + header.directories.debug,
                &sections,
                eof,
                strict,
            )
        );

        let resources = region!(
            "resource",
            resources::read_resources(
                &data,
                header.e_lfanew + header.directories.resource,
                &sections,
                eof,
                strict,
            )
        );

        let sign = sign::read_sign(&data, header.e_lfanew + header.directories.security, eof);
        let overlay = sign::read_overlay(sign.as_ref(), data.len(), &sections);

        Ok(PeImage {
            data,
            header,
            sections,
            rich,
            imports,
            relocs,
            debug,
            resources,
            sign,
            overlay,
        })
    }

    pub fn e_lfanew(&self) -> usize {
        self.header.e_lfanew
    }

    pub fn stamp_offset(&self) -> usize {
        self.e_lfanew() + OFF_TIME_DATE_STAMP
    }

    pub fn rsrc_section(&self) -> Option<&Section> {
        self.sections.iter().find(|s| s.is_rsrc())
    }

    pub fn sections_after_rsrc(&self) -> Vec<Section> {
        match self.rsrc_section() {
            Some(rsrc) => self
                .sections
                .iter()
                .skip_while(|s| s.struct_offset != rsrc.struct_offset)
                .skip(1)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}
