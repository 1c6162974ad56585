//! Cloud scenarios that provision real infrastructure.
//!
//! Each scenario provisions one example configuration under a randomized
//! name, checks it, and tears it down on every exit path. Scenarios run in
//! parallel; names never collide because each draws its own identifier.
//!
//! ```bash
//! INFRATEST_EXAMPLES_DIR=../terraform-examples \
//!     cargo test -p infratest --features cloud-e2e -- --nocapture
//! ```
//!
//! Scenarios skip when the example configurations are not present.

mod alb;
mod asg;
mod hello_world_app;
mod sanity;

use infratest_common::testing::{ScenarioLogger, TestPhase, init_global_test_logging};
use infratest_common::{HarnessConfig, HarnessResult, ProvisioningOptions};

#[ctor::ctor]
fn setup() {
    init_global_test_logging();
}

/// Options for `example`, or `None` when the configuration is absent.
pub(crate) fn example_options(example: &str, log: &ScenarioLogger) -> Option<ProvisioningOptions> {
    let config = match HarnessConfig::from_env() {
        Ok(config) => config,
        Err(e) => panic!("invalid INFRATEST_* configuration: {e}"),
    };
    let dir = config.example_dir(example);
    if !dir.is_dir() {
        log.log_with_data(
            TestPhase::Setup,
            "SKIP: example configuration not found",
            serde_json::json!({ "dir": dir.display().to_string() }),
        );
        return None;
    }
    Some(config.options_for(example))
}

/// Unwrap a scenario result, recording the failure before panicking.
pub(crate) fn expect_ok<T>(log: &ScenarioLogger, phase: TestPhase, result: HarnessResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            log.log_error(phase, &e);
            panic!("{} failed: {e}", log.scenario());
        }
    }
}
