//! `pemimic`: transplants PE/COFF metadata regions (Rich header, timestamp,
//! debug directory, resources, imports, Authenticode signature, section
//! names) from a donor executable onto an acceptor, so the acceptor's code
//! carries another binary's build provenance.
//!
//! The crate is split into a parser (`pe`), the region models it builds
//! (`pe::{rich, imports, debug, resources, sign, relocs, section, header}`),
//! the Fit Scorer (`fit`) that decides whether a donor qualifies, and the
//! engines (`engines`) that do the actual byte-level transplant. `config`
//! and `logging` are driver-layer concerns; the binary under `src/bin/` is
//! the only thing that touches argv or the filesystem directly.

pub mod config;
pub mod diagnostics;
pub mod engines;
pub mod error;
pub mod fit;
pub mod logging;
pub mod options;
pub mod pe;
pub mod util;
