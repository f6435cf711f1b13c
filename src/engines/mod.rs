//! Splice engines: each module owns one metadata region's transplant logic.
//! `splice` composes them in the fixed order the format's invariants demand.

pub mod checksum;
pub mod debug;
pub mod imports;
pub mod resources;
pub mod rich;
pub mod sign;
pub mod splice;
