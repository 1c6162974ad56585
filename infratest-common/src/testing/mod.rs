//! Test support shared by unit, integration and cloud scenario tests.

mod log;

pub use log::{ScenarioLogger, TestLogEntry, TestPhase, init_global_test_logging};
