use crate::cli::CommonArgs;
use anyhow::{Context, Result};
use ktest_config::KtestFileConfig;
use ktest_core::{Events, NullEvents, SuiteResult};
use ktest_dispatcher::Dispatcher;
use ktest_sut::Sut;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// A zero-second flag from the CLI means "no timeout" (§5).
fn resolve_timeout(secs: u64) -> Duration {
    if secs == 0 {
        Duration::MAX
    } else {
        Duration::from_secs(secs)
    }
}

fn resolve_ltp_root(common: &CommonArgs, file_config: Option<&KtestFileConfig>) -> PathBuf {
    if let Some(path) = &common.ltp_root {
        return path.clone();
    }
    if let Some(config) = file_config {
        return config.ltp_root.clone();
    }
    std::env::var("LTPROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/opt/ltp"))
}

fn resolve_tmp_dir(common: &CommonArgs) -> PathBuf {
    common
        .tmp_dir
        .clone()
        .or_else(|| std::env::var("TMPDIR").ok().map(PathBuf::from))
        .unwrap_or_else(std::env::temp_dir)
}

pub fn load_file_config(common: &CommonArgs) -> Result<Option<KtestFileConfig>> {
    let Some(path) = &common.config else {
        return Ok(None);
    };
    KtestFileConfig::load(path).with_context(|| format!("loading config file {}", path.display()))
}

/// Drives every requested suite against an already-constructed SUT, then
/// shuts it down and writes the JSON report if one was requested.
///
/// `start_timeout`, when given, bounds the initial `start_sut()` call — used
/// by the ssh subcommand's `--timeout` connection budget, which has no other
/// place to attach since `Channel::start` itself takes no deadline.
pub async fn run_suites<S: Sut>(
    sut: S,
    common: &CommonArgs,
    file_config: Option<&KtestFileConfig>,
) -> Result<bool> {
    run_suites_with_start_timeout(sut, common, file_config, None).await
}

pub async fn run_suites_with_start_timeout<S: Sut>(
    sut: S,
    common: &CommonArgs,
    file_config: Option<&KtestFileConfig>,
    start_timeout: Option<Duration>,
) -> Result<bool> {
    let ltp_root = resolve_ltp_root(common, file_config);
    let tmp_dir = resolve_tmp_dir(common);
    std::fs::create_dir_all(&tmp_dir)
        .with_context(|| format!("creating tmp dir {}", tmp_dir.display()))?;

    let test_timeout = resolve_timeout(common.test_timeout);
    let suite_timeout = resolve_timeout(common.suite_timeout);

    let events: Box<dyn Events> = Box::new(NullEvents);
    let mut dispatcher = Dispatcher::new(sut, ltp_root, tmp_dir, test_timeout, suite_timeout)
        .with_events(events);

    match start_timeout {
        Some(timeout) => tokio::time::timeout(timeout, dispatcher.start_sut())
            .await
            .context("starting SUT: connection timed out")?
            .context("starting SUT")?,
        None => dispatcher.start_sut().await.context("starting SUT")?,
    }

    let mut suite_results: Vec<SuiteResult> = Vec::new();
    for manifest in &common.run_suite {
        let suite = ktest_metadata::read_suite(manifest)
            .with_context(|| format!("reading suite manifest {}", manifest.display()))?;
        info!(suite = %suite.name, "running suite");
        let result = dispatcher
            .run_suite(&suite)
            .await
            .with_context(|| format!("running suite {}", suite.name))?;
        suite_results.push(result);
    }

    dispatcher
        .stop_sut(Duration::from_secs(60))
        .await
        .context("stopping SUT")?;

    if let Some(report_path) = &common.json_report {
        ktest_report::write_report(report_path, &suite_results)
            .with_context(|| format!("writing report to {}", report_path.display()))?;
    }

    let all_passed = suite_results
        .iter()
        .all(|result| result.totals().failed == 0 && result.totals().broken == 0);
    Ok(all_passed)
}
