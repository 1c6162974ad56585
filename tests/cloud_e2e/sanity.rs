//! Toolchain sanity check, run before the slow scenarios so a broken
//! harness shows up as a fast, obvious failure.

use infratest_common::testing::{ScenarioLogger, TestPhase};
use infratest_common::{HarnessConfig, unique_id};

#[test]
fn test_harness_is_working() {
    let log = ScenarioLogger::for_scenario("harness_is_working");

    let config = HarnessConfig::from_env().expect("INFRATEST_* configuration must parse");
    let id = unique_id();
    assert_eq!(id.len(), 6);
    assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

    log.log_with_data(
        TestPhase::Verify,
        "If you see this, the harness is working",
        serde_json::json!({
            "terraform_binary": config.terraform_binary,
            "examples_dir": config.examples_dir.display().to_string(),
            "examples_available": config.examples_available(),
        }),
    );
}
