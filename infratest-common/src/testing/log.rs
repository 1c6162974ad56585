//! Structured scenario logging for CI debugging.
//!
//! Cloud scenarios run for minutes and fail far from where the cause is
//! visible. Every scenario writes a JSONL trail to `target/test-logs/` so a
//! failed CI run can be read back phase by phase.
//!
//! ```ignore
//! use infratest_common::testing::{ScenarioLogger, TestPhase, init_global_test_logging};
//!
//! #[test]
//! fn alb_example() {
//!     init_global_test_logging();
//!     let log = ScenarioLogger::for_scenario("alb_example");
//!     log.log(TestPhase::Execute, "applying");
//! }
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::error::HarnessError;

/// Scenario phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    /// Naming and option construction.
    Setup,
    /// Provisioning or planning.
    Execute,
    /// Output, plan and endpoint checks.
    Verify,
    /// Destroy.
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execute => write!(f, "execute"),
            Self::Verify => write!(f, "verify"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Install a process-wide subscriber for tests.
///
/// Events go to `target/test-logs/all_tests.jsonl` as JSON and to the test
/// writer in compact form. Safe to call from every test.
///
/// - `INFRATEST_TEST_LOG_FILE` overrides the JSONL path.
/// - `INFRATEST_TEST_LOG_LEVEL` sets the level (default `info`).
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = std::env::var("INFRATEST_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "infratest={level},infratest_common={level},cloud_e2e={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_global_log_file() -> Option<std::fs::File> {
    if let Ok(custom_path) = std::env::var("INFRATEST_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = test_log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("all_tests.jsonl")).ok()
}

/// `test-logs/` under the nearest `target/` directory.
fn test_log_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir).join("test-logs");
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target.join("test-logs");
        }
        if !cwd.pop() {
            return PathBuf::from("target/test-logs");
        }
    }
}

/// One line of a scenario's JSONL trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub scenario: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Milliseconds since the scenario started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl TestLogEntry {
    pub fn new(scenario: &str, phase: TestPhase, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario: scenario.to_string(),
            phase,
            message: message.into(),
            data: None,
            elapsed_ms: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }
}

/// Per-scenario JSONL logger.
///
/// Writes `target/test-logs/<scenario>.jsonl` and mirrors each entry to
/// `tracing`. Logs `SCENARIO PASS` or `SCENARIO FAIL` when dropped,
/// depending on whether the thread is panicking or a failure was recorded.
pub struct ScenarioLogger {
    scenario: String,
    start_time: Instant,
    entries: Mutex<Vec<TestLogEntry>>,
    log_file: Option<Mutex<std::fs::File>>,
    failed: Mutex<bool>,
}

impl ScenarioLogger {
    pub fn for_scenario(scenario: &str) -> Self {
        let log_file = Self::create_log_file(scenario).ok();

        let logger = Self {
            scenario: scenario.to_string(),
            start_time: Instant::now(),
            entries: Mutex::new(Vec::new()),
            log_file: log_file.map(Mutex::new),
            failed: Mutex::new(false),
        };
        logger.log(TestPhase::Setup, "SCENARIO START");
        logger
    }

    fn create_log_file(scenario: &str) -> std::io::Result<std::fs::File> {
        let log_dir = test_log_dir();
        std::fs::create_dir_all(&log_dir)?;
        let safe_name = scenario.replace("::", "_").replace(['/', '\\'], "_");
        std::fs::File::create(log_dir.join(format!("{safe_name}.jsonl")))
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        let entry = TestLogEntry::new(&self.scenario, phase, message).with_elapsed(self.elapsed_ms());
        self.write_entry(entry);
    }

    pub fn log_with_data(
        &self,
        phase: TestPhase,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        let entry = TestLogEntry::new(&self.scenario, phase, message)
            .with_elapsed(self.elapsed_ms())
            .with_data(data);
        self.write_entry(entry);
    }

    /// Record a harness failure with its error kind, marking the scenario
    /// failed.
    pub fn log_error(&self, phase: TestPhase, error: &HarnessError) {
        if let Ok(mut failed) = self.failed.lock() {
            *failed = true;
        }
        let mut data = serde_json::json!({
            "kind": error.kind().to_string(),
            "error": error.to_string(),
        });
        if error.teardown_failed() {
            data["cause_kind"] = serde_json::Value::String(error.cause().kind().to_string());
        }
        self.log_with_data(phase, "harness error", data);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Entries written so far.
    pub fn entries(&self) -> Vec<TestLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn write_entry(&self, entry: TestLogEntry) {
        if let Some(file) = &self.log_file
            && let Ok(mut f) = file.lock()
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(f, "{json}");
        }

        tracing::info!(
            scenario = %self.scenario,
            phase = %entry.phase,
            elapsed_ms = entry.elapsed_ms,
            "{}",
            entry.message
        );

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl Drop for ScenarioLogger {
    fn drop(&mut self) {
        let failed = self.failed.lock().map(|f| *f).unwrap_or(false);
        if std::thread::panicking() {
            self.log_with_data(
                TestPhase::Verify,
                "SCENARIO FAIL",
                serde_json::json!({ "reason": "panicked" }),
            );
        } else if failed {
            self.log(TestPhase::Verify, "SCENARIO FAIL");
        } else {
            self.log(TestPhase::Verify, "SCENARIO PASS");
        }
    }
}
