//! Error taxonomy for PE parsing and splicing.
//!
//! Every variant carries the file offset the problem was found at (`0` when
//! no single offset applies) plus a short human-readable reason. `MalformedHeader`
//! is fatal in strict (acceptor) parsing and disqualifying in donor parsing;
//! `MalformedRegion` degrades a single capability instead of aborting the whole
//! parse. See `Diagnostics` for how strict mode surfaces these to an operator.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeError {
    #[error("malformed header at {offset:#x}: {reason}")]
    MalformedHeader { offset: usize, reason: String },

    #[error("malformed {region} at {offset:#x}: {reason}")]
    MalformedRegion {
        region: &'static str,
        offset: usize,
        reason: String,
    },

    #[error("donor part does not fit acceptor slot")]
    CapacityMiss,

    #[error("donor unreadable: {0}")]
    DonorUnreadable(#[from] io::Error),

    #[error("nothing to do: no enabled options survived strict-mode downgrades")]
    NothingToDo,
}

pub type Result<T> = std::result::Result<T, PeError>;

impl PeError {
    pub fn header(offset: usize, reason: impl Into<String>) -> Self {
        PeError::MalformedHeader {
            offset,
            reason: reason.into(),
        }
    }

    pub fn region(region: &'static str, offset: usize, reason: impl Into<String>) -> Self {
        PeError::MalformedRegion {
            region,
            offset,
            reason: reason.into(),
        }
    }
}
