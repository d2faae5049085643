//! Session state shared between the caller and anyone watching the proxy.
//!
//! The state is the out-of-band channel for "the whole session is unusable"
//! as opposed to "this call failed". It is stored in atomics so that a
//! watchdog on another thread can request an abort while the caller is
//! blocked inside a long automation call; the request is observed at the next
//! call boundary.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use dispatch_protocol::StatusCode;

use crate::config::FailureClass;

/// Session state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyState {
    Normal,
    /// Error notifications are suppressed. Reported only while the session is
    /// otherwise `Normal`; `Abort` and `Retry` take precedence.
    Ignore,
    Abort,
    Retry,
}

const NORMAL: u8 = 0;
const ABORT: u8 = 1;
const RETRY: u8 = 2;

/// Atomic holder for the session state and the orthogonal ignore flag.
#[derive(Debug, Default)]
pub struct ProxyStatus {
    state: AtomicU8,
    ignore: AtomicBool,
}

impl ProxyStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProxyState {
        match self.state.load(Ordering::Acquire) {
            ABORT => ProxyState::Abort,
            RETRY => ProxyState::Retry,
            _ if self.is_ignoring() => ProxyState::Ignore,
            _ => ProxyState::Normal,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state.load(Ordering::Acquire) == ABORT
    }

    pub fn is_ignoring(&self) -> bool {
        self.ignore.load(Ordering::Acquire)
    }

    pub fn set_ignore(&self, on: bool) {
        self.ignore.store(on, Ordering::Release);
    }

    /// Abort the session. Takes effect at the next call boundary.
    pub fn request_abort(&self) {
        self.state.store(ABORT, Ordering::Release);
    }

    /// `Abort -> Normal`. Any other state is left alone.
    pub fn clear_abort(&self) -> bool {
        self.state
            .compare_exchange(ABORT, NORMAL, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Retry -> Normal` after a call went through.
    pub(crate) fn record_success(&self) {
        let _ = self
            .state
            .compare_exchange(RETRY, NORMAL, Ordering::AcqRel, Ordering::Acquire);
    }

    /// `Normal -> Retry`. An `Abort` is only left through `clear_abort`.
    fn enter_retry(&self) {
        let _ = self
            .state
            .compare_exchange(NORMAL, RETRY, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Apply the state transition for a classified failure. Never downgrades
    /// an `Abort`.
    pub(crate) fn record_failure(&self, class: FailureClass) {
        match class {
            FailureClass::Recoverable => {}
            FailureClass::Transient => self.enter_retry(),
            FailureClass::Fatal => self.request_abort(),
        }
    }

    /// Apply an observer's verdict on top of the classification. Verdicts
    /// only escalate, so `Retry` cannot undo an `Abort`.
    pub(crate) fn apply(&self, verdict: ErrorVerdict) {
        match verdict {
            ErrorVerdict::Accept => {}
            ErrorVerdict::Ignore => self.set_ignore(true),
            ErrorVerdict::Abort => self.request_abort(),
            ErrorVerdict::Retry => self.enter_retry(),
        }
    }
}

/// What the error observer is told about a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Status code reported by the server; `None` for failures detected
    /// before reaching it (bad path, unmarshalable value).
    pub code: Option<StatusCode>,
    pub message: String,
    /// Member path (and target) the failing call was made against.
    pub context: Option<String>,
    pub class: Option<FailureClass>,
}

/// The observer's answer, in the manner of an abort/retry/ignore prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorVerdict {
    /// Keep the state chosen by the classification.
    #[default]
    Accept,
    /// Suppress further notifications until the ignore flag is cleared.
    Ignore,
    Abort,
    Retry,
}

/// Registered error callback.
pub type ErrorObserver = Box<dyn FnMut(&ErrorReport) -> ErrorVerdict>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_then_success() {
        let s = ProxyStatus::new();
        s.record_failure(FailureClass::Transient);
        assert_eq!(s.state(), ProxyState::Retry);
        s.record_success();
        assert_eq!(s.state(), ProxyState::Normal);
    }

    #[test]
    fn test_clear_abort_only_clears_abort() {
        let s = ProxyStatus::new();
        s.record_failure(FailureClass::Transient);
        assert!(!s.clear_abort());
        assert_eq!(s.state(), ProxyState::Retry);

        s.record_failure(FailureClass::Fatal);
        assert_eq!(s.state(), ProxyState::Abort);
        s.record_success();
        assert_eq!(s.state(), ProxyState::Abort);
        assert!(s.clear_abort());
        assert_eq!(s.state(), ProxyState::Normal);
    }

    #[test]
    fn test_transient_does_not_downgrade_abort() {
        let s = ProxyStatus::new();
        s.request_abort();
        s.record_failure(FailureClass::Transient);
        assert_eq!(s.state(), ProxyState::Abort);
        s.apply(ErrorVerdict::Retry);
        assert_eq!(s.state(), ProxyState::Abort);
        s.record_success();
        assert_eq!(s.state(), ProxyState::Abort);
    }

    #[test]
    fn test_ignore_is_orthogonal() {
        let s = ProxyStatus::new();
        s.set_ignore(true);
        assert_eq!(s.state(), ProxyState::Ignore);
        s.record_failure(FailureClass::Fatal);
        assert_eq!(s.state(), ProxyState::Abort);
        assert!(s.is_ignoring());
        s.clear_abort();
        assert_eq!(s.state(), ProxyState::Ignore);
        s.set_ignore(false);
        assert_eq!(s.state(), ProxyState::Normal);
    }

    #[test]
    fn test_recoverable_leaves_state() {
        let s = ProxyStatus::new();
        s.record_failure(FailureClass::Recoverable);
        assert_eq!(s.state(), ProxyState::Normal);
    }
}
