//! Application Load Balancer example, end to end and plan-only.

use std::time::Duration;

use infratest_common::http::{RetryPolicy, http_get_with_retry};
use infratest_common::plan::{AttributeLookup, PlanSummary};
use infratest_common::testing::{ScenarioLogger, TestPhase};
use infratest_common::{HarnessError, Terraform, unique_id};
use serde_json::json;

use super::{example_options, expect_ok};

const EXAMPLE: &str = "alb";

/// Provision the ALB and check that its default action answers 404.
#[test]
fn test_alb_example() {
    let log = ScenarioLogger::for_scenario("alb_example");
    let Some(options) = example_options(EXAMPLE, &log) else {
        return;
    };

    let alb_name = format!("test-{}", unique_id());
    let terraform = expect_ok(
        &log,
        TestPhase::Setup,
        Terraform::new(options.with_var("alb_name", alb_name.as_str())),
    );
    log.log(TestPhase::Setup, format!("alb_name={alb_name}"));

    let result = terraform.provisioned(|tf| {
        let alb_dns_name = tf.output_required("alb_dns_name")?;
        let url = format!("http://{alb_dns_name}");
        log.log(TestPhase::Verify, format!("probing {url}"));

        let policy = RetryPolicy::new(10, Duration::from_secs(10))?;
        http_get_with_retry(&url, 404, "404: page not found", &policy)
    });
    let outcome = expect_ok(&log, TestPhase::Verify, result);
    assert_eq!(outcome.status, 404);
}

/// Plan the ALB without deploying and inspect counts and planned values.
#[test]
fn test_alb_example_plan() {
    let log = ScenarioLogger::for_scenario("alb_example_plan");
    let Some(options) = example_options(EXAMPLE, &log) else {
        return;
    };

    let alb_name = format!("test-{}", unique_id());
    let terraform = expect_ok(
        &log,
        TestPhase::Setup,
        Terraform::new(options.with_var("alb_name", alb_name.as_str())),
    );

    log.log(TestPhase::Execute, "init + plan");
    let plan_text = expect_ok(&log, TestPhase::Execute, terraform.init_and_plan());
    let counts = expect_ok(&log, TestPhase::Verify, PlanSummary::parse_from_output(&plan_text));
    assert_eq!(counts, PlanSummary::new(5, 0, 0));

    let name = terraform.planned(|report| {
        let resources = report.planned_values()?;
        log.log_with_data(
            TestPhase::Verify,
            "planned resources",
            json!({ "addresses": resources.addresses().collect::<Vec<_>>() }),
        );
        match resources.lookup_attribute("module.alb.aws_lb.example", "name") {
            AttributeLookup::Found(value) => Ok(value.clone()),
            AttributeLookup::ResourceNotFound => Err(HarnessError::MalformedPlanReport(
                "aws_lb resource must exist".to_string(),
            )),
            AttributeLookup::AttributeNotFound => Err(HarnessError::MalformedPlanReport(
                "missing name parameter".to_string(),
            )),
        }
    });
    let name = expect_ok(&log, TestPhase::Verify, name);
    assert_eq!(name, json!(alb_name));
}
