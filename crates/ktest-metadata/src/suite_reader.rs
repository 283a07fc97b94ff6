//! LTP suite-manifest parsing (§4.6, §6).

use ktest_core::{KtestError, Result, Suite, Test};
use std::path::Path;

/// Read a suite manifest: one test per line, `<name> <command> [args...]`.
/// Blank lines and `#`-prefixed (after trimming leading whitespace) lines
/// are skipped. The suite name is the manifest's file stem.
pub fn read_suite(path: &Path) -> Result<Suite> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| KtestError::Config(format!("cannot read suite manifest {}: {e}", path.display())))?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| KtestError::Config(format!("manifest path has no file stem: {}", path.display())))?;

    let mut tests = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut tokens = trimmed.split_ascii_whitespace();
        let test_name = tokens.next().unwrap().to_string();
        let command = tokens.next().ok_or_else(|| {
            KtestError::Config(format!(
                "malformed suite line {} in {}: expected at least 2 tokens",
                line_no + 1,
                path.display()
            ))
        })?;
        let arguments: Vec<String> = tokens.map(str::to_string).collect();

        tests.push(Test {
            name: test_name,
            command: command.to_string(),
            arguments,
        });
    }

    Ok(Suite { name, tests })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_suite_parses_name_command_and_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syscalls.txt");
        std::fs::write(&path, "abort01 abort01\nread01 read01 -i 3\n").unwrap();

        let suite = read_suite(&path).unwrap();
        assert_eq!(suite.name, "syscalls");
        assert_eq!(suite.tests.len(), 2);
        assert_eq!(suite.tests[1].arguments, vec!["-i".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_read_suite_skips_blank_and_comment_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.txt");
        std::fs::write(&path, "\n  # a comment\nabort01 abort01\n   \n").unwrap();

        let suite = read_suite(&path).unwrap();
        assert_eq!(suite.tests.len(), 1);
    }

    #[test]
    fn test_read_suite_rejects_single_token_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.txt");
        std::fs::write(&path, "onlyname\n").unwrap();

        let result = read_suite(&path);
        assert!(matches!(result, Err(KtestError::Config(_))));
    }
}
