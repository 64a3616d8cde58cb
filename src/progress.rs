//! Progress reporting for stage execution

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Caller-supplied progress observer, invoked with values in 0..=100.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Phases of an NFC chip read, each pinned to a fixed progress checkpoint.
/// The read driver (real or simulated) emits these directly; message text is
/// never inspected to infer the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfcReadPhase {
    Detecting,
    PersonalData,
    DigitalSignature,
    BiometricData,
    RegistryCheck,
    Done,
}

impl NfcReadPhase {
    /// Checkpoint the UI pacing relies on for each phase.
    pub fn checkpoint(self) -> u8 {
        match self {
            NfcReadPhase::Detecting => 15,
            NfcReadPhase::PersonalData => 40,
            NfcReadPhase::DigitalSignature => 65,
            NfcReadPhase::BiometricData => 80,
            NfcReadPhase::RegistryCheck => 90,
            NfcReadPhase::Done => 100,
        }
    }

    pub const SEQUENCE: [NfcReadPhase; 6] = [
        NfcReadPhase::Detecting,
        NfcReadPhase::PersonalData,
        NfcReadPhase::DigitalSignature,
        NfcReadPhase::BiometricData,
        NfcReadPhase::RegistryCheck,
        NfcReadPhase::Done,
    ];
}

impl fmt::Display for NfcReadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NfcReadPhase::Detecting => write!(f, "detecting chip"),
            NfcReadPhase::PersonalData => write!(f, "reading personal data"),
            NfcReadPhase::DigitalSignature => write!(f, "verifying digital signature"),
            NfcReadPhase::BiometricData => write!(f, "reading biometric data"),
            NfcReadPhase::RegistryCheck => write!(f, "checking official registry"),
            NfcReadPhase::Done => write!(f, "read complete"),
        }
    }
}

/// Monotonic progress gate between a stage strategy and the caller.
///
/// Values are clamped to 0..=100 and never move backwards, so callers can
/// rely on the stream for UX pacing regardless of how the underlying driver
/// interleaves its reports.
#[derive(Clone)]
pub struct ProgressSink {
    callback: ProgressCallback,
    last: Arc<Mutex<u8>>,
}

impl ProgressSink {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback,
            last: Arc::new(Mutex::new(0)),
        }
    }

    /// Sink that drops every report, for callers without a progress UI.
    pub fn discard() -> Self {
        Self::new(Arc::new(|_| {}))
    }

    /// Reports `value`, clamped into [last, 100].
    pub fn report(&self, value: u8) {
        let value = value.min(100);
        let mut last = self.last.lock();
        if value <= *last {
            return;
        }
        *last = value;
        (self.callback)(value);
    }

    pub fn report_phase(&self, phase: NfcReadPhase) {
        self.report(phase.checkpoint());
    }

    pub fn finish(&self) {
        self.report(100);
    }

    pub fn last(&self) -> u8 {
        *self.last.lock()
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").field("last", &self.last()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let sink = ProgressSink::new(Arc::new(move |v| seen_cb.lock().push(v)));
        (sink, seen)
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let (sink, seen) = collecting_sink();
        sink.report(10);
        sink.report(5); // ignored, would move backwards
        sink.report(60);
        sink.report(200); // clamped to 100
        assert_eq!(*seen.lock(), vec![10, 60, 100]);
        assert_eq!(sink.last(), 100);
    }

    #[test]
    fn phase_checkpoints_match_fixed_timeline() {
        let checkpoints: Vec<u8> = NfcReadPhase::SEQUENCE.iter().map(|p| p.checkpoint()).collect();
        assert_eq!(checkpoints, vec![15, 40, 65, 80, 90, 100]);
    }

    #[test]
    fn duplicate_reports_fire_once() {
        let (sink, seen) = collecting_sink();
        sink.report(50);
        sink.report(50);
        assert_eq!(*seen.lock(), vec![50]);
    }
}
