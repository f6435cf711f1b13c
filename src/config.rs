//! Driver-level configuration, assembled once by the CLI layer and handed
//! into the core. The core never touches argv or the filesystem beyond the
//! byte buffers `Config` points it at.

use std::path::PathBuf;

use crate::options::Options;

/// Acceptor/donor-root/output paths plus the enabled `Options`. `approx`
/// relaxes the Fit Scorer's minimum score by one; `limit` stops the driver
/// loop after that many accepted donors. `update_checksum`/`dbg_to_rsrc` are
/// carried on `Options` itself rather than duplicated here.
#[derive(Debug, Clone)]
pub struct Config {
    pub acceptor: PathBuf,
    pub donor_root: Option<PathBuf>,
    pub out_root: PathBuf,
    pub options: Options,
    pub approx: bool,
    pub limit: Option<u64>,
    pub log_path: Option<PathBuf>,
}

impl Config {
    pub fn new(acceptor: PathBuf, out_root: PathBuf, options: Options) -> Self {
        Config {
            acceptor,
            donor_root: None,
            out_root,
            options,
            approx: false,
            limit: None,
            log_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_defaults_to_no_limit_and_no_donor_root() {
        let config = Config::new(PathBuf::from("a.exe"), PathBuf::from("out"), Options::enable_all_search());
        assert!(config.donor_root.is_none());
        assert!(config.limit.is_none());
        assert!(!config.approx);
    }
}
