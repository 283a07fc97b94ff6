use std::collections::HashMap;

/// One test line parsed from a suite manifest. Immutable after parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub name: String,
    pub command: String,
    pub arguments: Vec<String>,
}

/// An ordered collection of tests read from one manifest. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    pub name: String,
    pub tests: Vec<Test>,
}

/// Raw output of `Channel::execute`, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub command: String,
    pub timeout_secs: f64,
    /// `>= 0` process exit status, `128+signal` killed by that signal, `-1` timed out.
    pub returncode: i32,
    pub stdout: String,
    pub exec_time_secs: f64,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
}

impl ExecutionRecord {
    pub const SIGTERM: i32 = 143;
    pub const TIMED_OUT: i32 = -1;

    pub fn timed_out(&self) -> bool {
        self.returncode == Self::TIMED_OUT
    }
}

/// LTP result counters, always non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCounters {
    pub passed: u32,
    pub failed: u32,
    pub broken: u32,
    pub skipped: u32,
    pub warnings: u32,
}

impl ResultCounters {
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.broken + self.skipped + self.warnings
    }
}

/// A Test plus its classified outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub test: Test,
    pub counters: ResultCounters,
    pub returncode: i32,
    pub exec_time_secs: f64,
    pub stdout: String,
    pub timed_out: bool,
}

/// Environment snapshot read from the SUT after a suite completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SutInfo {
    pub distro: String,
    pub distro_version: String,
    pub kernel: String,
    pub arch: String,
}

/// A Suite plus its ordered TestResults and the SUT snapshot they ran under.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteResult {
    pub suite: Suite,
    pub results: Vec<TestResult>,
    pub sut_info: SutInfo,
}

impl SuiteResult {
    pub fn exec_time_secs(&self) -> f64 {
        self.results.iter().map(|r| r.exec_time_secs).sum()
    }

    pub fn totals(&self) -> ResultCounters {
        let mut totals = ResultCounters::default();
        for result in &self.results {
            totals.passed += result.counters.passed;
            totals.failed += result.counters.failed;
            totals.broken += result.counters.broken;
            totals.skipped += result.counters.skipped;
            totals.warnings += result.counters.warnings;
        }
        totals
    }
}

/// Environment variables and working directory threaded through a Channel::execute call.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
}

impl ExecContext {
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn as_map(&self) -> HashMap<&str, &str> {
        self.env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

/// Which pair of character devices a hypervisor SUT exposes for its console + transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialType {
    Isa,
    VirtIo,
}

impl std::str::FromStr for SerialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isa" => Ok(Self::Isa),
            "virtio" => Ok(Self::VirtIo),
            other => Err(format!(
                "invalid serial type '{other}', expected 'isa' or 'virtio'"
            )),
        }
    }
}

impl std::fmt::Display for SerialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Isa => write!(f, "isa"),
            Self::VirtIo => write!(f, "virtio"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_record_timed_out() {
        let record = ExecutionRecord {
            command: "sleep 10".into(),
            timeout_secs: 1.0,
            returncode: ExecutionRecord::TIMED_OUT,
            stdout: String::new(),
            exec_time_secs: 1.0,
            cwd: None,
            env: vec![],
        };
        assert!(record.timed_out());
    }

    #[test]
    fn test_execution_record_not_timed_out() {
        let record = ExecutionRecord {
            command: "echo ok".into(),
            timeout_secs: 30.0,
            returncode: 0,
            stdout: "ok\n".into(),
            exec_time_secs: 0.01,
            cwd: None,
            env: vec![],
        };
        assert!(!record.timed_out());
    }

    #[test]
    fn test_result_counters_total() {
        let counters = ResultCounters {
            passed: 3,
            failed: 1,
            broken: 0,
            skipped: 2,
            warnings: 0,
        };
        assert_eq!(counters.total(), 6);
    }

    #[test]
    fn test_suite_result_totals_sums_across_tests() {
        let test = Test {
            name: "t".into(),
            command: "t".into(),
            arguments: vec![],
        };
        let make_result = |passed: u32, failed: u32| TestResult {
            test: test.clone(),
            counters: ResultCounters {
                passed,
                failed,
                broken: 0,
                skipped: 0,
                warnings: 0,
            },
            returncode: 0,
            exec_time_secs: 0.1,
            stdout: String::new(),
            timed_out: false,
        };
        let suite_result = SuiteResult {
            suite: Suite {
                name: "s".into(),
                tests: vec![test.clone()],
            },
            results: vec![make_result(1, 0), make_result(0, 1)],
            sut_info: SutInfo::default(),
        };
        let totals = suite_result.totals();
        assert_eq!(totals.passed, 1);
        assert_eq!(totals.failed, 1);
    }

    #[test]
    fn test_exec_context_with_env_builder() {
        let ctx = ExecContext::default()
            .with_env("LTPROOT", "/opt/ltp")
            .with_env("PATH", "/bin");
        assert_eq!(ctx.env.len(), 2);
        assert_eq!(ctx.as_map().get("LTPROOT"), Some(&"/opt/ltp"));
    }

    #[test]
    fn test_serial_type_from_str() {
        assert_eq!("isa".parse::<SerialType>().unwrap(), SerialType::Isa);
        assert_eq!("virtio".parse::<SerialType>().unwrap(), SerialType::VirtIo);
        assert!("nope".parse::<SerialType>().is_err());
    }

    #[test]
    fn test_serial_type_display_roundtrip() {
        for variant in [SerialType::Isa, SerialType::VirtIo] {
            let s = variant.to_string();
            assert_eq!(s.parse::<SerialType>().unwrap(), variant);
        }
    }
}
