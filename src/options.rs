//! Enumerated flag record driving both the Fit Scorer and the Splice Controller.
//!
//! Mirrors the original tool's `Options` class, which toggled module-level
//! booleans; here it is a plain value so a `splice` call is self-contained and
//! there is no global mutable search state.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub rich: bool,
    pub stamp: bool,
    pub sign: bool,
    pub vi: bool,
    pub res: bool,
    pub dbg: bool,
    pub imp: bool,
    pub names: bool,

    pub remove_rich: bool,
    pub remove_stamp: bool,
    pub remove_sign: bool,
    pub remove_overlay: bool,
    pub remove_vi: bool,
    pub remove_dbg: bool,

    pub rich_fix: bool,
    pub dbg_to_rsrc: bool,
    pub update_checksum: bool,
}

impl Options {
    /// All transplant options on, no removal, fixups and checksum update on.
    /// Matches `Options.enable_all_search()`.
    pub fn enable_all_search() -> Self {
        Options {
            rich: true,
            stamp: true,
            sign: true,
            vi: true,
            res: true,
            dbg: true,
            imp: true,
            names: true,
            remove_rich: false,
            remove_stamp: false,
            remove_sign: false,
            remove_overlay: false,
            remove_vi: false,
            remove_dbg: false,
            rich_fix: true,
            dbg_to_rsrc: false,
            update_checksum: true,
        }
    }

    /// All removal options on, no transplant. Matches `Options.enable_all_remove()`.
    pub fn enable_all_remove() -> Self {
        Options {
            rich: false,
            stamp: false,
            sign: false,
            vi: false,
            res: false,
            dbg: false,
            imp: false,
            names: false,
            remove_rich: true,
            remove_stamp: true,
            remove_sign: true,
            remove_overlay: true,
            remove_vi: true,
            remove_dbg: true,
            rich_fix: false,
            dbg_to_rsrc: false,
            update_checksum: true,
        }
    }

    pub fn remove_mode(&self) -> bool {
        self.remove_rich
            || self.remove_stamp
            || self.remove_sign
            || self.remove_overlay
            || self.remove_vi
            || self.remove_dbg
    }

    /// Count of transplant options enabled (`imp`/`names` excluded: they need
    /// no donor content, see the Fit Scorer).
    pub fn get_search_count(&self) -> usize {
        [self.rich, self.stamp, self.sign, self.vi, self.res, self.dbg]
            .iter()
            .filter(|b| **b)
            .count()
    }

    pub fn get_remove_count(&self) -> usize {
        [
            self.remove_rich,
            self.remove_stamp,
            self.remove_sign,
            self.remove_overlay,
            self.remove_vi,
            self.remove_dbg,
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    /// A donor file is required iff at least one transplant option (beyond
    /// `imp`/`names`) is enabled and we are not in remove mode.
    pub fn donor_needed(&self) -> bool {
        !self.remove_mode() && self.get_search_count() > 0
    }
}
