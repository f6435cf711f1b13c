//! Fit Scorer: decides whether a candidate donor qualifies, and which parts
//! are worth transplanting. Mirrors the scoring loop in `get_donor`.

use crate::options::Options;
use crate::pe::PeImage;

/// Score a donor against an acceptor for the enabled `options`. `approx`
/// relaxes the required minimum by one point, matching `args.approx`.
pub fn score(acceptor: &PeImage, donor: &PeImage, options: &Options) -> u32 {
    let mut score = 0;

    if options.names {
        score += 1;
    }
    if options.imp {
        score += 1;
    }
    if options.rich {
        if let (Some(acc_rich), Some(donor_rich)) = (&acceptor.rich, &donor.rich) {
            if acc_rich.fits(donor_rich) {
                score += 1;
            }
        }
    }
    if options.sign && donor.sign.is_some() {
        score += 1;
    }
    if options.stamp {
        // the original always has a TimeDateStamp, so a donor always scores;
        // presence is implicit (every PE header has the field).
        score += 1;
    }
    if options.dbg {
        if let Some(donor_dbgs) = &donor.debug {
            if !donor_dbgs.entries.is_empty() {
                score += 1;
            }
        }
    }
    if options.res || options.vi {
        if let Some(donor_res) = &donor.resources {
            if options.res {
                score += 1;
            }
            if options.vi && donor_res.dirs[donor_res.root].vi.is_some() {
                score += 1;
            }
        }
    }

    score
}

/// Minimum score required for the donor to be accepted. Mirrors
/// `Options.get_search_count() - int(approx)`.
pub fn minimum_score(options: &Options, approx: bool) -> u32 {
    let count = options.get_search_count() as u32;
    if approx {
        count.saturating_sub(1)
    } else {
        count
    }
}

pub fn accepts(acceptor: &PeImage, donor: &PeImage, options: &Options, approx: bool) -> bool {
    let s = score(acceptor, donor, options);
    s > 0 && s >= minimum_score(options, approx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SilentDiagnostics;

    fn minimal_pe() -> Vec<u8> {
        let e_lfanew = 0x80usize;
        let mut data = vec![0u8; e_lfanew + 256];
        data[0x3c..0x40].copy_from_slice(&(e_lfanew as u32).to_le_bytes());
        data[e_lfanew + 24..e_lfanew + 26].copy_from_slice(&0x10bu16.to_le_bytes());
        data[e_lfanew + 56..e_lfanew + 60].copy_from_slice(&0x1000u32.to_le_bytes());
        data[e_lfanew + 60..e_lfanew + 64].copy_from_slice(&0x200u32.to_le_bytes());
        data[e_lfanew + 6..e_lfanew + 8].copy_from_slice(&0u16.to_le_bytes());
        data[e_lfanew + 20..e_lfanew + 22].copy_from_slice(&224u16.to_le_bytes());
        data
    }

    #[test]
    fn zero_score_rejects() {
        let data = minimal_pe();
        let pe = PeImage::read(data.clone(), false, &SilentDiagnostics).unwrap();
        let donor = PeImage::read(data, false, &SilentDiagnostics).unwrap();
        let mut options = Options::enable_all_search();
        options.rich = false;
        options.stamp = false;
        options.sign = false;
        options.vi = false;
        options.res = false;
        options.dbg = false;
        options.imp = false;
        options.names = false;
        assert!(!accepts(&pe, &donor, &options, false));
    }

    #[test]
    fn stamp_only_accepts() {
        let data = minimal_pe();
        let pe = PeImage::read(data.clone(), false, &SilentDiagnostics).unwrap();
        let donor = PeImage::read(data, false, &SilentDiagnostics).unwrap();
        let mut options = Options::enable_all_search();
        options.rich = false;
        options.sign = false;
        options.vi = false;
        options.res = false;
        options.dbg = false;
        options.imp = false;
        options.names = false;
        assert!(accepts(&pe, &donor, &options, false));
    }
}
