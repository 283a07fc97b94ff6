//! JSON report writer (§6). Shapes `SuiteResult`s into the reference
//! exporter's schema and refuses to clobber an existing destination file.

use ktest_core::{KtestError, Result, SuiteResult};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct Report {
    pub suites: Vec<SuiteReport>,
}

#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub name: String,
    pub sut: SutReport,
    pub results: ResultsReport,
    pub tests: Vec<TestReport>,
}

#[derive(Debug, Serialize)]
pub struct SutReport {
    pub distro: String,
    pub distro_ver: String,
    pub kernel: String,
    pub arch: String,
}

#[derive(Debug, Serialize)]
pub struct ResultsReport {
    pub exec_time: f64,
    pub failed: u32,
    pub passed: u32,
    pub broken: u32,
    pub skipped: u32,
    pub warnings: u32,
}

#[derive(Debug, Serialize)]
pub struct TestReport {
    pub name: String,
    pub command: String,
    pub arguments: Vec<String>,
    pub stdout: String,
    pub returncode: i32,
    pub exec_time: f64,
    pub failed: u32,
    pub passed: u32,
    pub broken: u32,
    pub skipped: u32,
    pub warnings: u32,
}

impl From<&SuiteResult> for SuiteReport {
    fn from(suite_result: &SuiteResult) -> Self {
        let totals = suite_result.totals();
        SuiteReport {
            name: suite_result.suite.name.clone(),
            sut: SutReport {
                distro: suite_result.sut_info.distro.clone(),
                distro_ver: suite_result.sut_info.distro_version.clone(),
                kernel: suite_result.sut_info.kernel.clone(),
                arch: suite_result.sut_info.arch.clone(),
            },
            results: ResultsReport {
                exec_time: suite_result.exec_time_secs(),
                failed: totals.failed,
                passed: totals.passed,
                broken: totals.broken,
                skipped: totals.skipped,
                warnings: totals.warnings,
            },
            tests: suite_result
                .results
                .iter()
                .map(|result| TestReport {
                    name: result.test.name.clone(),
                    command: result.test.command.clone(),
                    arguments: result.test.arguments.clone(),
                    stdout: result.stdout.clone(),
                    returncode: result.returncode,
                    exec_time: result.exec_time_secs,
                    failed: result.counters.failed,
                    passed: result.counters.passed,
                    broken: result.counters.broken,
                    skipped: result.counters.skipped,
                    warnings: result.counters.warnings,
                })
                .collect(),
        }
    }
}

impl Report {
    pub fn from_suite_results(suite_results: &[SuiteResult]) -> Self {
        Report {
            suites: suite_results.iter().map(SuiteReport::from).collect(),
        }
    }
}

/// Write `suite_results` as a JSON report to `path`. Refuses to overwrite
/// an existing file, matching the reference exporter's behavior.
pub fn write_report(path: &Path, suite_results: &[SuiteResult]) -> Result<()> {
    if path.exists() {
        return Err(KtestError::Config(format!(
            "refusing to overwrite existing report at {}",
            path.display()
        )));
    }
    let report = Report::from_suite_results(suite_results);
    let file = std::fs::File::create(path)
        .map_err(|e| KtestError::Internal(format!("cannot create {}: {e}", path.display())))?;
    serde_json::to_writer_pretty(file, &report)
        .map_err(|e| KtestError::Internal(format!("cannot serialize report: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktest_core::{ResultCounters, Suite, SutInfo, Test, TestResult};

    fn sample_suite_result() -> SuiteResult {
        let test = Test {
            name: "abort01".into(),
            command: "abort01".into(),
            arguments: vec![],
        };
        SuiteResult {
            suite: Suite {
                name: "syscalls".into(),
                tests: vec![test.clone()],
            },
            results: vec![TestResult {
                test,
                counters: ResultCounters {
                    passed: 1,
                    ..Default::default()
                },
                returncode: 0,
                exec_time_secs: 0.5,
                stdout: "Summary:\npassed 1\n".into(),
                timed_out: false,
            }],
            sut_info: SutInfo {
                distro: "fedora".into(),
                distro_version: "40".into(),
                kernel: "6.9.0".into(),
                arch: "x86_64".into(),
            },
        }
    }

    #[test]
    fn test_write_report_creates_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report(&path, &[sample_suite_result()]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["suites"][0]["name"], "syscalls");
        assert_eq!(value["suites"][0]["tests"][0]["passed"], 1);
        assert_eq!(value["suites"][0]["sut"]["kernel"], "6.9.0");
    }

    #[test]
    fn test_write_report_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, "{}").unwrap();

        let result = write_report(&path, &[sample_suite_result()]);
        assert!(matches!(result, Err(KtestError::Config(_))));
    }

    #[test]
    fn test_report_totals_sum_from_suite_result() {
        let report = Report::from_suite_results(&[sample_suite_result()]);
        assert_eq!(report.suites[0].results.passed, 1);
        assert_eq!(report.suites[0].results.exec_time, 0.5);
    }
}
