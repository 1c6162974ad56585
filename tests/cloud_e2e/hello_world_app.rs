//! Standalone hello-world app behind an ALB. The database config is a
//! stub because only the app tier is under test.

use std::time::Duration;

use infratest_common::http::{RetryPolicy, body_contains, http_get_with_retry_with_custom_validation};
use infratest_common::testing::{ScenarioLogger, TestPhase};
use infratest_common::{Terraform, unique_id};
use serde_json::json;

use super::{example_options, expect_ok};

#[test]
fn test_hello_world_app_example() {
    let log = ScenarioLogger::for_scenario("hello_world_app_example");
    let Some(options) = example_options("hello-world-app/standalone", &log) else {
        return;
    };

    let options = options
        .with_var(
            "mysql_config",
            json!({ "address": "mock-value-for-test", "port": 3306 }),
        )
        .with_var("environment", format!("test-{}", unique_id()));
    let terraform = expect_ok(&log, TestPhase::Setup, Terraform::new(options));

    let result = terraform.provisioned(|tf| {
        let url = format!("http://{}", tf.output_required("alb_dns_name")?);
        log.log(TestPhase::Verify, format!("probing {url}"));

        let policy = RetryPolicy::new(10, Duration::from_secs(10))?;
        http_get_with_retry_with_custom_validation(&url, &policy, body_contains(200, "Hello, World"))
    });
    let outcome = expect_ok(&log, TestPhase::Verify, result);
    assert!(outcome.body.contains("Hello, World"));
}
