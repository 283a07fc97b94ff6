//! Observer interface for progress/log/UI collaborators.
//!
//! The Dispatcher and SUT call these hooks; the default no-op implementation
//! lets a caller override only the events it cares about, the way
//! `HookEvent` in the sibling corpus enumerates trigger points without
//! forcing every consumer to act on all of them.

use crate::types::{SuiteResult, Test, TestResult};

/// One newly-set taint bit, reported with its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaintEvent {
    pub bit: u8,
    pub message: &'static str,
}

pub trait Events: Send + Sync {
    fn test_started(&self, _suite: &str, _test: &Test) {}
    fn test_stdout_line(&self, _suite: &str, _test: &Test, _line: &str) {}
    fn test_completed(&self, _suite: &str, _result: &TestResult) {}
    fn suite_started(&self, _suite: &str) {}
    fn suite_completed(&self, _result: &SuiteResult) {}
    fn suite_download_started(&self, _suite: &str) {}
    fn suite_download_completed(&self, _suite: &str) {}
    fn kernel_tainted(&self, _suite: &str, _test: &Test, _taint: &TaintEvent) {}
    fn kernel_panic(&self, _suite: &str, _test: &Test) {}
    fn sut_restart(&self, _reason: &str) {}
    fn sut_not_responding(&self, _suite: &str, _test: &Test) {}
    fn session_error(&self, _message: &str) {}
}

/// An `Events` implementation that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvents;

impl Events for NullEvents {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResultCounters;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEvents {
        started: AtomicUsize,
        tainted: AtomicUsize,
    }

    impl Events for CountingEvents {
        fn test_started(&self, _suite: &str, _test: &Test) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn kernel_tainted(&self, _suite: &str, _test: &Test, _taint: &TaintEvent) {
            self.tainted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_null_events_accepts_all_calls() {
        let events = NullEvents;
        let test = Test {
            name: "t".into(),
            command: "true".into(),
            arguments: vec![],
        };
        events.test_started("syscalls", &test);
        events.kernel_panic("syscalls", &test);
        events.session_error("boom");
    }

    #[test]
    fn test_custom_events_observe_calls() {
        let events = CountingEvents::default();
        let test = Test {
            name: "t".into(),
            command: "true".into(),
            arguments: vec![],
        };
        events.test_started("syscalls", &test);
        events.test_started("syscalls", &test);
        events.kernel_tainted(
            "syscalls",
            &test,
            &TaintEvent {
                bit: 9,
                message: "kernel issued warning",
            },
        );
        assert_eq!(events.started.load(Ordering::SeqCst), 2);
        assert_eq!(events.tainted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_result_counters_default_used_in_fixture() {
        let _ = ResultCounters::default();
    }
}
