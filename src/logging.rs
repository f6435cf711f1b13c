//! Session logging: `flexi_logger` behind the `log` facade, duplicating every
//! record to the session log file and to stderr. Mirrors `Log.init`.

use std::path::Path;

use flexi_logger::{FileSpec, Logger, LoggerHandle, WriteMode};

/// Starts the session logger. `log_path`, when given, selects the log file's
/// directory and basename; otherwise `flexi_logger`'s default (`./`, program
/// name) is used. Returns a handle that must stay alive for the run.
pub fn init(log_path: Option<&Path>) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    let mut logger = Logger::try_with_env_or_str("info")?.write_mode(WriteMode::BufferAndFlush);

    if let Some(path) = log_path {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        let basename = path.file_stem().and_then(|s| s.to_str()).unwrap_or("pemimic");
        let mut spec = FileSpec::default().basename(basename);
        if let Some(parent) = parent {
            spec = spec.directory(parent);
        }
        logger = logger.log_to_file(spec).duplicate_to_stderr(flexi_logger::Duplicate::Info);
    } else {
        logger = logger.duplicate_to_stderr(flexi_logger::Duplicate::Info);
    }

    logger.start()
}
