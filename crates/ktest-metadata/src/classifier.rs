//! Turns an ExecutionRecord into a TestResult (§4.6).

use ktest_core::{ExecutionRecord, ResultCounters, Result, Test, TestResult};
use regex::Regex;
use std::sync::OnceLock;

fn summary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^Summary:\r?\npassed\s+(\d+)\r?\nfailed\s+(\d+)\r?\nbroken\s+(\d+)\r?\nskipped\s+(\d+)\r?\nwarnings\s+(\d+)\r?\n?",
        )
        .expect("summary regex is always valid")
    })
}

/// Classify one execution into pass/fail/broken/skipped/warnings counters.
///
/// `ExecutionRecord::returncode` is never optional, so the "neither stdout
/// nor a returncode" case the counters fallback exists to guard against
/// cannot actually arise here; `classify_by_returncode` always terminates
/// the chain.
pub fn classify(record: &ExecutionRecord, test: &Test) -> Result<TestResult> {
    let counters = if let Some(caps) = summary_regex().captures(&record.stdout) {
        ResultCounters {
            passed: caps[1].parse().unwrap_or(0),
            failed: caps[2].parse().unwrap_or(0),
            broken: caps[3].parse().unwrap_or(0),
            skipped: caps[4].parse().unwrap_or(0),
            warnings: caps[5].parse().unwrap_or(0),
        }
    } else {
        let by_token = classify_by_tokens(&record.stdout);
        if by_token.total() > 0 {
            by_token
        } else {
            tracing::debug!(test = %test.name, "no summary block or TPASS/TFAIL tokens, classifying by returncode");
            classify_by_returncode(record.returncode)
        }
    };

    Ok(TestResult {
        test: test.clone(),
        counters,
        returncode: record.returncode,
        exec_time_secs: record.exec_time_secs,
        stdout: record.stdout.clone(),
        timed_out: record.timed_out(),
    })
}

fn classify_by_tokens(stdout: &str) -> ResultCounters {
    ResultCounters {
        passed: count_occurrences(stdout, "TPASS"),
        failed: count_occurrences(stdout, "TFAIL"),
        broken: count_occurrences(stdout, "TBROK"),
        skipped: count_occurrences(stdout, "TSKIP"),
        warnings: count_occurrences(stdout, "TWARN"),
    }
}

fn count_occurrences(haystack: &str, token: &str) -> u32 {
    haystack.matches(token).count() as u32
}

fn classify_by_returncode(returncode: i32) -> ResultCounters {
    if returncode == 0 {
        ResultCounters {
            passed: 1,
            ..Default::default()
        }
    } else {
        ResultCounters {
            failed: 1,
            ..Default::default()
        }
    }
}
