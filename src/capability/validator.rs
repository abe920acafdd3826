//! Test-suite validators.
//!
//! The framework is chosen by configuration; nothing here inspects the
//! workspace to guess it. Each framework has a pure output parser so the
//! counting logic can be tested without the toolchain installed.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ValidationResult, Validator, ensure_workspace};
use crate::errors::CapabilityError;

static PYTEST_PASSED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) passed").unwrap());
static PYTEST_FAILED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) failed").unwrap());
static PYTEST_ERRORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) errors?\b").unwrap());

static CARGO_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed").unwrap()
});

/// Supported test frameworks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestFramework {
    Cargo,
    Npm,
    Pytest,
    Go,
    /// Arbitrary shell command; exit status decides the outcome.
    Command(String),
}

impl TestFramework {
    /// Program and arguments to spawn.
    fn invocation(&self) -> (String, Vec<String>) {
        let owned = |args: &[&str]| args.iter().map(|a| a.to_string()).collect();
        match self {
            TestFramework::Cargo => ("cargo".into(), owned(&["test"])),
            TestFramework::Npm => ("npm".into(), owned(&["test", "--", "--json", "--coverage"])),
            TestFramework::Pytest => ("pytest".into(), owned(&["--tb=short", "-q"])),
            TestFramework::Go => ("go".into(), owned(&["test", "-v", "./..."])),
            TestFramework::Command(cmd) => ("sh".into(), vec!["-c".into(), cmd.clone()]),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TestFramework::Cargo => "cargo",
            TestFramework::Npm => "npm",
            TestFramework::Pytest => "pytest",
            TestFramework::Go => "go",
            TestFramework::Command(_) => "command",
        }
    }

    /// Turn raw process output into a result.
    pub fn parse(&self, output: &str, exit_ok: bool, duration_ms: u64) -> ValidationResult {
        match self {
            TestFramework::Cargo => parse_cargo(output, exit_ok, duration_ms),
            TestFramework::Npm => parse_npm(output, exit_ok, duration_ms),
            TestFramework::Pytest => parse_pytest(output, exit_ok, duration_ms),
            TestFramework::Go => parse_go(output, exit_ok, duration_ms),
            TestFramework::Command(_) => parse_exit_status(output, exit_ok, duration_ms),
        }
    }
}

fn failure_errors(output: &str, exit_ok: bool) -> Vec<String> {
    if exit_ok { Vec::new() } else { vec![output.to_string()] }
}

fn capture_count(re: &Regex, output: &str) -> u32 {
    re.captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Sums every `test result:` line; a workspace prints one per test binary.
pub fn parse_cargo(output: &str, exit_ok: bool, duration_ms: u64) -> ValidationResult {
    let mut passed = 0u32;
    let mut failed = 0u32;
    for caps in CARGO_SUMMARY.captures_iter(output) {
        passed += caps[1].parse::<u32>().unwrap_or(0);
        failed += caps[2].parse::<u32>().unwrap_or(0);
    }

    ValidationResult {
        success: exit_ok,
        total_tests: passed + failed,
        passed,
        failed,
        duration_ms,
        errors: failure_errors(output, exit_ok),
        coverage: None,
    }
}

/// Jest `--json` report, falling back to the exit status when the output
/// is not JSON.
pub fn parse_npm(output: &str, exit_ok: bool, duration_ms: u64) -> ValidationResult {
    let Ok(data) = serde_json::from_str::<serde_json::Value>(output) else {
        return parse_exit_status(output, exit_ok, duration_ms);
    };

    let count = |key: &str| data.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    ValidationResult {
        success: data.get("success").and_then(|v| v.as_bool()).unwrap_or(exit_ok),
        total_tests: count("numTotalTests"),
        passed: count("numPassedTests"),
        failed: count("numFailedTests"),
        duration_ms,
        errors: Vec::new(),
        coverage: data
            .pointer("/coverageMap/total/lines/pct")
            .and_then(|v| v.as_f64()),
    }
}

pub fn parse_pytest(output: &str, exit_ok: bool, duration_ms: u64) -> ValidationResult {
    let passed = capture_count(&PYTEST_PASSED, output);
    let failed = capture_count(&PYTEST_FAILED, output);
    let errored = capture_count(&PYTEST_ERRORS, output);

    ValidationResult {
        success: exit_ok,
        total_tests: passed + failed + errored,
        passed,
        failed: failed + errored,
        duration_ms,
        errors: failure_errors(output, exit_ok),
        coverage: None,
    }
}

pub fn parse_go(output: &str, exit_ok: bool, duration_ms: u64) -> ValidationResult {
    let passed = output.matches("--- PASS:").count() as u32;
    let failed = output.matches("--- FAIL:").count() as u32;

    ValidationResult {
        success: exit_ok,
        total_tests: passed + failed,
        passed,
        failed,
        duration_ms,
        errors: failure_errors(output, exit_ok),
        coverage: None,
    }
}

fn parse_exit_status(output: &str, exit_ok: bool, duration_ms: u64) -> ValidationResult {
    ValidationResult {
        success: exit_ok,
        total_tests: 0,
        passed: u32::from(exit_ok),
        failed: u32::from(!exit_ok),
        duration_ms,
        errors: failure_errors(output, exit_ok),
        coverage: None,
    }
}

/// Runs the configured framework as a child process in the workspace.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    framework: TestFramework,
}

impl CommandValidator {
    pub fn new(framework: TestFramework) -> Self {
        Self { framework }
    }

    pub fn framework(&self) -> &TestFramework {
        &self.framework
    }
}

#[async_trait]
impl Validator for CommandValidator {
    async fn run(&self, workspace: &Path) -> Result<ValidationResult, CapabilityError> {
        ensure_workspace(workspace)?;

        let (program, args) = self.framework.invocation();
        info!(framework = self.framework.name(), workspace = %workspace.display(), "Running tests");

        let start = Instant::now();
        let spawned = Command::new(&program)
            .args(&args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ValidationResult::unavailable(
                    format!("{program} not found"),
                    start.elapsed().as_millis() as u64,
                ));
            }
            Err(e) => {
                return Err(CapabilityError::Process(format!("Failed to spawn {program}: {e}")));
            }
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CapabilityError::Process(format!("Failed to wait for {program}: {e}")))?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = if stdout.trim().is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            stdout.to_string()
        };
        debug!(bytes = text.len(), "Test output captured");

        let result = self.framework.parse(&text, output.status.success(), duration_ms);
        info!(
            passed = result.passed,
            total = result.total_tests,
            success = result.success,
            "Tests completed in {}ms",
            duration_ms
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_cargo_sums_binaries() {
        let output = "\
running 3 tests
test a ... ok
test result: ok. 3 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out

running 2 tests
test result: FAILED. 1 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out
";
        let result = parse_cargo(output, false, 10);
        assert_eq!(result.passed, 4);
        assert_eq!(result.failed, 1);
        assert_eq!(result.total_tests, 5);
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_parse_npm_json() {
        let output = r#"{"success":true,"numTotalTests":7,"numPassedTests":7,"numFailedTests":0,
            "coverageMap":{"total":{"lines":{"pct":81.5}}}}"#;
        let result = parse_npm(output, true, 5);
        assert!(result.success);
        assert_eq!(result.total_tests, 7);
        assert_eq!(result.coverage, Some(81.5));
    }

    #[test]
    fn test_parse_npm_non_json_falls_back_to_exit_status() {
        let result = parse_npm("Error: no tests", false, 5);
        assert!(!result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors, vec!["Error: no tests".to_string()]);
    }

    #[test]
    fn test_parse_pytest_summary() {
        let output = "==== 5 passed, 2 failed, 1 error in 0.42s ====";
        let result = parse_pytest(output, false, 1);
        assert_eq!(result.passed, 5);
        assert_eq!(result.failed, 3);
        assert_eq!(result.total_tests, 8);
    }

    #[test]
    fn test_parse_go_counts_markers() {
        let output = "--- PASS: TestA (0.00s)\n--- PASS: TestB (0.00s)\n--- FAIL: TestC (0.01s)\n";
        let result = parse_go(output, false, 1);
        assert_eq!(result.passed, 2);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_command_framework_uses_exit_status() {
        let dir = tempdir().unwrap();

        let ok = CommandValidator::new(TestFramework::Command("true".into()));
        assert!(ok.run(dir.path()).await.unwrap().success);

        let bad = CommandValidator::new(TestFramework::Command("echo nope; exit 3".into()));
        let result = bad.run(dir.path()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors, vec!["nope\n".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_workspace_is_an_error() {
        let validator = CommandValidator::new(TestFramework::Cargo);
        let err = validator.run(Path::new("/no/such/project")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Workspace(_)));
    }

    #[test]
    fn test_framework_names() {
        assert_eq!(TestFramework::Go.name(), "go");
        assert_eq!(TestFramework::Command("make".into()).name(), "command");
    }
}
