//! Operator-interactive error handling, pulled out of the Reader.
//!
//! Strict (acceptor) parsing wants to warn about recoverable anomalies and let
//! an operator decide whether to continue with that region disabled. The core
//! never touches a terminal directly: it calls through this trait, so tests and
//! the donor-mode scan (which never prompts) can supply a stub.

pub trait Diagnostics {
    /// Informational notice; no decision required (e.g. "original file does not
    /// contain resources").
    fn warn(&self, kind: &str, detail: &str);

    /// A recoverable anomaly was found. Returns `true` to continue with the
    /// offending capability disabled, `false` to abort the parse.
    fn confirm_or_abort(&self, kind: &str, detail: &str) -> bool;
}

/// Always continues, never prints. Used by the Fit Scorer / donor-mode parsing
/// and by unit tests.
pub struct SilentDiagnostics;

impl Diagnostics for SilentDiagnostics {
    fn warn(&self, _kind: &str, _detail: &str) {}

    fn confirm_or_abort(&self, _kind: &str, _detail: &str) -> bool {
        true
    }
}

/// Records everything instead of printing it. Handy for tests that want to
/// assert on which anomalies were raised.
#[derive(Default)]
pub struct RecordingDiagnostics {
    pub warnings: std::cell::RefCell<Vec<(String, String)>>,
    pub confirmations: std::cell::RefCell<Vec<(String, String)>>,
    pub continue_on_confirm: bool,
}

impl RecordingDiagnostics {
    pub fn new(continue_on_confirm: bool) -> Self {
        Self {
            continue_on_confirm,
            ..Default::default()
        }
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn warn(&self, kind: &str, detail: &str) {
        self.warnings
            .borrow_mut()
            .push((kind.to_string(), detail.to_string()));
    }

    fn confirm_or_abort(&self, kind: &str, detail: &str) -> bool {
        self.confirmations
            .borrow_mut()
            .push((kind.to_string(), detail.to_string()));
        self.continue_on_confirm
    }
}
