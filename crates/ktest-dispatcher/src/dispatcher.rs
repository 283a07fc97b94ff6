//! Per-test state machine and per-suite driving loop (§4.7).

use ktest_core::{
    Events, ExecContext, ExecutionRecord, KtestError, NullEvents, Result, Suite, SuiteResult,
    SutInfo, TaintEvent, Test, TestResult,
};
use ktest_sut::Sut;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);
const KERNEL_PANIC_MARKER: &str = "Kernel panic - not syncing";

/// Drives one test, then one suite, against a single `Sut`. One dispatcher
/// runs exactly one test at a time — never spawns a competing task.
pub struct Dispatcher<S: Sut> {
    sut: S,
    events: Box<dyn Events>,
    ltp_root: PathBuf,
    tmp_dir: PathBuf,
    test_timeout: Duration,
    suite_timeout: Duration,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl<S: Sut> Dispatcher<S> {
    pub fn new(
        sut: S,
        ltp_root: PathBuf,
        tmp_dir: PathBuf,
        test_timeout: Duration,
        suite_timeout: Duration,
    ) -> Self {
        Self {
            sut,
            events: Box::new(NullEvents),
            ltp_root,
            tmp_dir,
            test_timeout,
            suite_timeout,
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_events(mut self, events: Box<dyn Events>) -> Self {
        self.events = events;
        self
    }

    /// Bring the underlying SUT up. Call once before the first `run_suite`.
    pub async fn start_sut(&mut self) -> Result<()> {
        self.sut.start().await
    }

    /// Tear the underlying SUT down. Call once after the last `run_suite`.
    pub async fn stop_sut(&mut self, timeout: Duration) -> Result<()> {
        self.sut.stop(timeout).await
    }

    /// An external caller's handle to request a graceful stop. Cheap to
    /// clone; flipping it is safe from a task other than the one driving
    /// `run_suite`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    /// Sets `stop_requested` and waits (polling every 50 ms) for the
    /// in-flight test to observe it and clear `running`.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        while self.running.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return Err(KtestError::Internal(
                    "dispatcher did not quiesce within the stop timeout".into(),
                ));
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        Ok(())
    }

    fn test_env(&self) -> ExecContext {
        ExecContext {
            cwd: Some(self.ltp_root.to_string_lossy().into_owned()),
            env: vec![
                ("LTPROOT".to_string(), self.ltp_root.to_string_lossy().into_owned()),
                ("LTP_COLORIZE_OUTPUT".to_string(), "n".to_string()),
                (
                    "PATH".to_string(),
                    format!(
                        "/sbin:/usr/sbin:/usr/local/sbin:/root/bin:/usr/local/bin:/usr/bin:/bin:{}/testcases/bin",
                        self.ltp_root.display()
                    ),
                ),
            ],
        }
    }

    async fn read_taint(&mut self) -> Result<u32> {
        let record = self
            .sut
            .channel()
            .execute(
                "cat /proc/sys/kernel/tainted",
                Duration::from_secs(10),
                None,
                &[],
                None,
            )
            .await?;
        Ok(record.stdout.trim().parse().unwrap_or(0))
    }

    /// Run one test through Idle -> Preflight -> Running -> Postflight (or
    /// Probing -> Rebooting on a missed deadline).
    pub async fn run_test(&mut self, suite_name: &str, test: &Test) -> Result<TestResult> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.run_test_inner(suite_name, test).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_test_inner(&mut self, suite_name: &str, test: &Test) -> Result<TestResult> {
        self.events.test_started(suite_name, test);

        let pre_taint = self.read_taint().await.unwrap_or(0);

        let ctx = self.test_env();
        let mut command = test.command.clone();
        for arg in &test.arguments {
            command.push(' ');
            command.push_str(arg);
        }

        // `events` borrows only the `events` field (shared — its methods
        // take `&self`); `self.sut.channel()` below borrows only `sut`
        // mutably. Disjoint fields, so both coexist in the same call.
        let events = self.events.as_ref();
        let mut on_line = |line: &str| {
            events.test_stdout_line(suite_name, test, line);
        };
        let record = self
            .sut
            .channel()
            .execute(
                &command,
                self.test_timeout,
                ctx.cwd.as_deref(),
                &ctx.env,
                Some(&mut on_line),
            )
            .await?;

        let record = if record.timed_out() {
            self.handle_missed_deadline(suite_name, test, record).await?
        } else {
            record
        };

        let post_taint = self.read_taint().await.unwrap_or(pre_taint);
        for (bit, message) in ktest_core::taint::newly_set_bits(pre_taint, post_taint) {
            self.events
                .kernel_tainted(suite_name, test, &TaintEvent { bit, message });
            self.reboot("kernel taint detected").await?;
        }

        let result = ktest_metadata::classify(&record, test)?;
        self.events.test_completed(suite_name, &result);
        Ok(result)
    }

    /// Probing: send a cheap liveness probe. If it answers, the deadline
    /// was genuine slowness — report a timeout. If it never answers, or
    /// stdout shows a kernel panic, force-reboot the SUT.
    async fn handle_missed_deadline(
        &mut self,
        suite_name: &str,
        test: &Test,
        timed_out_record: ExecutionRecord,
    ) -> Result<ExecutionRecord> {
        if timed_out_record.stdout.contains(KERNEL_PANIC_MARKER) {
            self.events.kernel_panic(suite_name, test);
            self.reboot("kernel panic detected in test output").await?;
            return Ok(timed_out_record);
        }

        let probe = self
            .sut
            .channel()
            .execute("test .", PROBE_TIMEOUT, None, &[], None)
            .await;

        match probe {
            Ok(probe_record) if !probe_record.timed_out() => Ok(timed_out_record),
            _ => {
                self.events.sut_not_responding(suite_name, test);
                self.reboot("SUT did not answer a liveness probe").await?;
                Ok(timed_out_record)
            }
        }
    }

    async fn reboot(&mut self, reason: &str) -> Result<()> {
        tracing::warn!(reason, "rebooting SUT");
        self.events.sut_restart(reason);
        self.sut.force_stop(Duration::from_secs(60)).await?;
        self.sut.start().await
    }

    /// Run every test in `suite`, and finalize with whatever results were
    /// collected if stopped or the suite budget is exceeded.
    pub async fn run_suite(&mut self, suite: &Suite) -> Result<SuiteResult> {
        tracing::info!(suite = %suite.name, tests = suite.tests.len(), "starting suite");
        self.events.suite_started(&suite.name);
        let start = Instant::now();

        let mut results = Vec::new();
        for test in &suite.tests {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            if start.elapsed() > self.suite_timeout {
                let err = KtestError::SuiteTimeout {
                    suite: suite.name.clone(),
                    budget: self.suite_timeout,
                };
                self.events.session_error(&err.to_string());
                break;
            }
            results.push(self.run_test(&suite.name, test).await?);
        }

        let sut_info = self.read_sut_info().await.unwrap_or_default();
        self.dump_dmesg(&suite.name).await;

        let suite_result = SuiteResult {
            suite: suite.clone(),
            results,
            sut_info,
        };
        self.events.suite_completed(&suite_result);
        Ok(suite_result)
    }

    async fn read_sut_info(&mut self) -> Result<SutInfo> {
        let distro = self.run_short("sh -c \". /etc/os-release 2>/dev/null; echo $ID\"").await;
        let distro_version = self
            .run_short("sh -c \". /etc/os-release 2>/dev/null; echo $VERSION_ID\"")
            .await;
        let kernel = self.run_short("uname -r").await;
        let arch = self.run_short("uname -m").await;
        Ok(SutInfo {
            distro,
            distro_version,
            kernel,
            arch,
        })
    }

    async fn run_short(&mut self, cmd: &str) -> String {
        self.sut
            .channel()
            .execute(cmd, Duration::from_secs(10), None, &[], None)
            .await
            .map(|r| r.stdout.trim().to_string())
            .unwrap_or_default()
    }

    async fn dump_dmesg(&mut self, suite_name: &str) {
        let record = self
            .sut
            .channel()
            .execute("dmesg", Duration::from_secs(30), None, &[], None)
            .await;
        if let Ok(record) = record {
            let path = self.tmp_dir.join(format!("dmesg_{suite_name}.log"));
            let _ = tokio::fs::write(path, record.stdout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktest_sut::LocalSut;

    fn make_dispatcher(tmp: &std::path::Path) -> Dispatcher<LocalSut> {
        Dispatcher::new(
            LocalSut::new(),
            tmp.to_path_buf(),
            tmp.to_path_buf(),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_run_test_classifies_a_passing_test() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = make_dispatcher(dir.path());
        dispatcher.sut.start().await.unwrap();

        let test = Test {
            name: "echo-ok".into(),
            command: "echo".into(),
            arguments: vec!["hi".into()],
        };
        let result = dispatcher.run_test("smoke", &test).await.unwrap();
        assert_eq!(result.counters.passed, 1);
        assert_eq!(result.returncode, 0);
    }

    #[tokio::test]
    async fn test_run_test_reports_timeout_when_probe_also_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(
            LocalSut::new(),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
            Duration::from_millis(200),
            Duration::from_secs(60),
        );
        dispatcher.sut.start().await.unwrap();

        let test = Test {
            name: "hang".into(),
            command: "sleep".into(),
            arguments: vec!["30".into()],
        };
        let result = dispatcher.run_test("smoke", &test).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.returncode, ExecutionRecord::TIMED_OUT);
    }

    #[tokio::test]
    async fn test_stop_returns_immediately_when_nothing_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = make_dispatcher(dir.path());
        dispatcher.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_suite_collects_results_and_sut_info() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = make_dispatcher(dir.path());
        dispatcher.sut.start().await.unwrap();

        let suite = Suite {
            name: "smoke".into(),
            tests: vec![Test {
                name: "true-test".into(),
                command: "true".into(),
                arguments: vec![],
            }],
        };
        let result = dispatcher.run_suite(&suite).await.unwrap();
        assert_eq!(result.results.len(), 1);
        assert!(!result.sut_info.kernel.is_empty());
    }
}
