//! Driver binary: parses CLI flags into a `Config`, reads the acceptor once
//! in strict mode, walks the donor root, scores and splices each candidate,
//! and writes verbose-named samples under the output root. The core crate
//! never touches argv or the filesystem; this binary is the only thing that
//! does.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use walkdir::WalkDir;

use pemimic::diagnostics::{Diagnostics, SilentDiagnostics};
use pemimic::engines::splice;
use pemimic::fit;
use pemimic::options::Options;
use pemimic::pe::PeImage;

#[derive(Parser, Debug)]
#[command(name = "pemimic", about = "Transplants PE/COFF metadata regions between executables")]
struct Cli {
    #[arg(long)]
    acceptor: PathBuf,
    #[arg(long)]
    donors: Option<PathBuf>,
    #[arg(long)]
    out: PathBuf,

    #[arg(long)]
    rich: bool,
    #[arg(long)]
    stamp: bool,
    #[arg(long)]
    sign: bool,
    #[arg(long)]
    vi: bool,
    #[arg(long)]
    res: bool,
    #[arg(long)]
    dbg: bool,
    #[arg(long)]
    imp: bool,
    #[arg(long)]
    names: bool,

    #[arg(long = "remove-rich")]
    remove_rich: bool,
    #[arg(long = "remove-stamp")]
    remove_stamp: bool,
    #[arg(long = "remove-sign")]
    remove_sign: bool,
    #[arg(long = "remove-overlay")]
    remove_overlay: bool,
    #[arg(long = "remove-vi")]
    remove_vi: bool,
    #[arg(long = "remove-dbg")]
    remove_dbg: bool,

    #[arg(long)]
    approx: bool,
    #[arg(long = "no-checksum")]
    no_checksum: bool,
    #[arg(long = "dbg-to-rsrc")]
    dbg_to_rsrc: bool,
    #[arg(long)]
    limit: Option<u64>,
    #[arg(long)]
    log: Option<PathBuf>,
}

fn build_options(cli: &Cli) -> Options {
    let remove_any = cli.remove_rich
        || cli.remove_stamp
        || cli.remove_sign
        || cli.remove_overlay
        || cli.remove_vi
        || cli.remove_dbg;
    let any_transplant =
        cli.rich || cli.stamp || cli.sign || cli.vi || cli.res || cli.dbg || cli.imp || cli.names;

    let mut options = if remove_any {
        Options {
            rich: false,
            stamp: false,
            sign: false,
            vi: false,
            res: false,
            dbg: false,
            imp: false,
            names: false,
            remove_rich: cli.remove_rich,
            remove_stamp: cli.remove_stamp,
            remove_sign: cli.remove_sign,
            remove_overlay: cli.remove_overlay,
            remove_vi: cli.remove_vi,
            remove_dbg: cli.remove_dbg,
            rich_fix: false,
            dbg_to_rsrc: false,
            update_checksum: true,
        }
    } else if any_transplant {
        Options {
            rich: cli.rich,
            stamp: cli.stamp,
            sign: cli.sign,
            vi: cli.vi,
            res: cli.res,
            dbg: cli.dbg,
            imp: cli.imp,
            names: cli.names,
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
    } else {
        Options::enable_all_search()
    };

    options.update_checksum = !cli.no_checksum;
    options.dbg_to_rsrc = cli.dbg_to_rsrc;
    options
}

/// Prompts on stderr/stdin during strict acceptor parsing. Mirrors the
/// original's interactive "continue without this region? [y/N]" prompts.
struct StdinDiagnostics;

impl Diagnostics for StdinDiagnostics {
    fn warn(&self, kind: &str, detail: &str) {
        log::warn!("{kind}: {detail}");
    }

    fn confirm_or_abort(&self, kind: &str, detail: &str) -> bool {
        log::warn!("{kind}: {detail}");
        eprint!("continue without {kind}? [y/N] ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn build_out_path(out_root: &Path, acceptor: &Path, donor: Option<&Path>, counter: u64) -> PathBuf {
    let acceptor_stem = acceptor.file_stem().and_then(|s| s.to_str()).unwrap_or("sample");
    let ext = acceptor.extension().and_then(|s| s.to_str()).unwrap_or("exe");
    let today = chrono::Local::now().format("%Y%m%d").to_string();

    let name = match donor {
        Some(donor) => {
            let donor_stem = donor.file_stem().and_then(|s| s.to_str()).unwrap_or("donor");
            format!("{counter}_{acceptor_stem}_{donor_stem}.{ext}")
        }
        None => format!("{counter}_{acceptor_stem}_removed.{ext}"),
    };

    out_root
        .join("_mimic_samples")
        .join(format!("{acceptor_stem}_mimics"))
        .join(today)
        .join(name)
}

fn write_sample(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

fn print_status(stdout: &mut StandardStream, color: Color, message: &str) -> Result<()> {
    stdout.set_color(ColorSpec::new().set_fg(Some(color)))?;
    writeln!(stdout, "{message}")?;
    stdout.reset()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = build_options(&cli);

    let _logger = pemimic::logging::init(cli.log.as_deref()).context("failed to start session log")?;

    let acceptor_bytes =
        fs::read(&cli.acceptor).with_context(|| format!("reading acceptor {}", cli.acceptor.display()))?;
    let acceptor = PeImage::read(acceptor_bytes, true, &StdinDiagnostics)
        .map_err(|e| anyhow::anyhow!("acceptor is malformed: {e}"))?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("failed to install ctrl-c handler")?;
    }

    let mut stdout = StandardStream::stdout(ColorChoice::Auto);

    if options.remove_mode() {
        let out_bytes = splice::remove(&acceptor, &options)?;
        let out_path = build_out_path(&cli.out, &cli.acceptor, None, 0);
        write_sample(&out_path, &out_bytes)?;
        print_status(&mut stdout, Color::Cyan, &format!("removed -> {}", out_path.display()))?;
        log::info!("removed -> {}", out_path.display());
        return Ok(());
    }

    let Some(donor_root) = &cli.donors else {
        bail!("--donors is required unless a --remove-* flag is set");
    };

    let mut accepted = 0u64;
    let mut counter = 0u64;

    for entry in WalkDir::new(donor_root).into_iter().filter_map(|e| e.ok()) {
        if stop.load(Ordering::SeqCst) {
            log::info!("stopping: ctrl-c received");
            break;
        }
        if let Some(limit) = cli.limit {
            if accepted >= limit {
                break;
            }
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        let donor_bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                log::debug!("skipping unreadable donor {}: {e}", path.display());
                continue;
            }
        };
        let donor = match PeImage::read(donor_bytes, false, &SilentDiagnostics) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("skipping malformed donor {}: {e}", path.display());
                continue;
            }
        };

        if !fit::accepts(&acceptor, &donor, &options, cli.approx) {
            log::info!("rejected: {}", path.display());
            continue;
        }
        log::info!("accepted: {}", path.display());

        let out_bytes = match splice::splice(&acceptor, &donor, &options, &SilentDiagnostics) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("splice failed for {}: {e}", path.display());
                print_status(&mut stdout, Color::Red, &format!("{}: {e}", path.display()))?;
                continue;
            }
        };

        counter += 1;
        let out_path = build_out_path(&cli.out, &cli.acceptor, Some(path), counter);
        write_sample(&out_path, &out_bytes)?;
        print_status(&mut stdout, Color::Green, &format!("{} -> {}", path.display(), out_path.display()))?;
        accepted += 1;
    }

    log::info!("done: {accepted} sample(s) written");
    Ok(())
}
