//! Auto Scaling Group example: success is a clean init, apply and destroy.

use infratest_common::testing::{ScenarioLogger, TestPhase};
use infratest_common::{IdGenerator, Terraform};

use super::{example_options, expect_ok};

#[test]
fn test_asg_example() {
    let log = ScenarioLogger::for_scenario("asg_example");
    let Some(options) = example_options("asg", &log) else {
        return;
    };

    let cluster_name = IdGenerator::new().namespaced("test");
    let options = options.with_var("cluster_name", cluster_name.as_str());
    log.log(TestPhase::Setup, format!("cluster_name={cluster_name}"));

    let terraform = expect_ok(&log, TestPhase::Setup, Terraform::new(options));
    log.log(TestPhase::Execute, "init + apply");
    expect_ok(&log, TestPhase::Execute, terraform.provisioned(|_| Ok(())));
    log.log(TestPhase::Teardown, "destroyed");
}
