//! Lifecycle + inspection scenarios against a scripted engine.
//!
//! Covers the flows a cloud scenario goes through without touching a cloud:
//! - Plan-only inspection of a module-wrapped load balancer
//! - Apply, read outputs, probe the endpoint, tear down
//! - Teardown on body failure, apply failure and panic
//! - Idempotent destroy
//! - Name isolation across concurrent test cases

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use infratest_common::http::{RetryPolicy, body_contains, http_get_with_retry_with_custom_validation};
use infratest_common::plan::{AttributeLookup, PlanSummary};
use infratest_common::testing::init_global_test_logging;
use infratest_common::{
    CommandResult, CommandRunner, EngineInvocation, HarnessError, HarnessResult, IdGenerator,
    LifecycleState, ProvisioningOptions, Terraform, unique_id,
};
use serde_json::json;

#[ctor::ctor]
fn setup() {
    init_global_test_logging();
}

// ---------------------------------------------------------------------------
// Scripted engine
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct FakeEngine {
    scripted: Arc<Mutex<BTreeMap<String, VecDeque<CommandResult>>>>,
    invocations: Arc<Mutex<Vec<EngineInvocation>>>,
}

impl FakeEngine {
    fn script(&self, subcommand: &str, result: CommandResult) {
        self.scripted
            .lock()
            .unwrap()
            .entry(subcommand.to_string())
            .or_default()
            .push_back(result);
    }

    fn subcommands(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.subcommand().to_string())
            .collect()
    }

    fn invocation(&self, subcommand: &str) -> EngineInvocation {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.subcommand() == subcommand)
            .cloned()
            .unwrap()
    }
}

impl CommandRunner for FakeEngine {
    fn run(&self, invocation: &EngineInvocation) -> HarnessResult<CommandResult> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let next = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(invocation.subcommand())
            .and_then(VecDeque::pop_front);
        Ok(next.unwrap_or_else(|| CommandResult::ok("")))
    }
}

fn alb_plan_document(alb_name: &str) -> String {
    let create = |address: &str| {
        json!({
            "address": address,
            "module_address": "module.alb",
            "change": { "actions": ["create"], "after": {} }
        })
    };
    json!({
        "format_version": "1.2",
        "terraform_version": "1.9.5",
        "planned_values": {
            "outputs": { "alb_dns_name": { "sensitive": false } },
            "root_module": {
                "child_modules": [{
                    "address": "module.alb",
                    "resources": [
                        {
                            "address": "module.alb.aws_lb.example",
                            "mode": "managed",
                            "type": "aws_lb",
                            "name": "example",
                            "values": { "name": alb_name, "load_balancer_type": "application" }
                        },
                        {
                            "address": "module.alb.aws_lb_listener.http",
                            "mode": "managed",
                            "type": "aws_lb_listener",
                            "name": "http",
                            "values": { "port": 80 }
                        }
                    ]
                }]
            }
        },
        "resource_changes": [
            create("module.alb.aws_lb.example"),
            create("module.alb.aws_lb_listener.http"),
            create("module.alb.aws_security_group.alb"),
            create("module.alb.aws_security_group_rule.allow_http_inbound"),
            create("module.alb.aws_security_group_rule.allow_all_outbound"),
            {
                "address": "data.aws_vpc.default",
                "change": { "actions": ["read"] }
            }
        ]
    })
    .to_string()
}

fn orchestrator(engine: &FakeEngine, vars: &[(&str, serde_json::Value)]) -> (tempfile::TempDir, Terraform) {
    let dir = tempfile::tempdir().unwrap();
    let mut options = ProvisioningOptions::new(dir.path()).with_timeout(Duration::from_secs(60));
    for (name, value) in vars {
        options = options.with_var(*name, value.clone());
    }
    let terraform = Terraform::with_runner(options, engine.clone()).unwrap();
    (dir, terraform)
}

/// Answer each accepted connection with the next canned response.
fn serve(responses: Vec<(u16, &'static str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).is_ok_and(|n| n > 0) {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let _ = write!(
                stream,
                "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
        }
    });
    url
}

// ---------------------------------------------------------------------------
// Plan-only
// ---------------------------------------------------------------------------

#[test]
fn alb_plan_counts_and_planned_name() {
    let engine = FakeEngine::default();
    let alb_name = format!("test-{}", unique_id());
    engine.script("plan", CommandResult::with_exit_code(2, "Plan: 5 to add, 0 to change, 0 to destroy.", ""));
    engine.script("show", CommandResult::ok(alb_plan_document(&alb_name)));
    let (_dir, terraform) = orchestrator(&engine, &[("alb_name", json!(alb_name))]);

    terraform
        .planned(|report| {
            assert_eq!(report.count_resources()?, PlanSummary::new(5, 0, 0));

            let resources = report.planned_values()?;
            assert_eq!(
                resources.lookup_attribute("module.alb.aws_lb.example", "name"),
                AttributeLookup::Found(&json!(alb_name))
            );
            assert_eq!(
                resources.lookup_attribute("module.alb.aws_lb.example", "dns_name"),
                AttributeLookup::AttributeNotFound
            );
            assert_eq!(report.planned_output("alb_dns_name"), None);
            Ok(())
        })
        .unwrap();

    assert_eq!(engine.subcommands(), vec!["init", "plan", "show"]);
    assert_eq!(terraform.state(), LifecycleState::Planned);
    let plan = engine.invocation("plan");
    assert!(plan.args.contains(&format!("alb_name={alb_name}")));
}

#[test]
fn plan_text_summary_matches_structured_summary() {
    let engine = FakeEngine::default();
    engine.script(
        "plan",
        CommandResult::with_exit_code(2, "\u{1b}[1mPlan:\u{1b}[0m 5 to add, 0 to change, 0 to destroy.\n", ""),
    );
    let (_dir, terraform) = orchestrator(&engine, &[]);

    let text = terraform.init_and_plan().unwrap();
    assert_eq!(PlanSummary::parse_from_output(&text).unwrap(), PlanSummary::new(5, 0, 0));
}

#[test]
fn malformed_plan_document_is_reported() {
    let engine = FakeEngine::default();
    engine.script(
        "show",
        CommandResult::ok(json!({ "resource_changes": [{ "address": "aws_lb.x" }] }).to_string()),
    );
    let (_dir, terraform) = orchestrator(&engine, &[]);

    let err = terraform.planned(|report| report.count_resources()).unwrap_err();
    assert!(matches!(err, HarnessError::MalformedPlanReport(_)));
}

// ---------------------------------------------------------------------------
// Apply + validate + teardown
// ---------------------------------------------------------------------------

#[test]
fn apply_probe_and_teardown() {
    let url = serve(vec![
        (503, "warming up"),
        (404, "404: page not found"),
    ]);
    let engine = FakeEngine::default();
    engine.script(
        "output",
        CommandResult::ok(json!({ "url": { "value": url, "type": "string" } }).to_string()),
    );
    let (_dir, terraform) = orchestrator(&engine, &[("alb_name", json!("test-abc123"))]);

    let outcome = terraform
        .provisioned(|tf| {
            let url = tf.output_required("url")?;
            let policy = RetryPolicy::new(5, Duration::from_millis(10))?;
            http_get_with_retry_with_custom_validation(
                &url,
                &policy,
                body_contains(404, "404: page not found"),
            )
        })
        .unwrap();

    assert_eq!(outcome.status, 404);
    assert_eq!(engine.subcommands(), vec!["init", "apply", "output", "destroy"]);
    assert_eq!(terraform.state(), LifecycleState::Destroyed);

    let destroy = engine.invocation("destroy");
    assert!(destroy.args.contains(&"alb_name=test-abc123".to_string()));
}

#[test]
fn validation_timeout_still_tears_down() {
    let url = serve(vec![(500, "boom"), (500, "boom")]);
    let engine = FakeEngine::default();
    engine.script(
        "output",
        CommandResult::ok(json!({ "url": { "value": url } }).to_string()),
    );
    let (_dir, terraform) = orchestrator(&engine, &[]);

    let err = terraform
        .provisioned(|tf| {
            let url = tf.output_required("url")?;
            let policy = RetryPolicy::new(2, Duration::from_millis(5))?;
            http_get_with_retry_with_custom_validation(&url, &policy, body_contains(200, "Hello"))
        })
        .unwrap_err();

    match err {
        HarnessError::ValidationTimeout { attempts, last, .. } => {
            assert_eq!(attempts, 2);
            assert!(last.to_string().contains("500"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.subcommands().last().map(String::as_str), Some("destroy"));
}

#[test]
fn panic_in_assertion_still_tears_down() {
    let engine = FakeEngine::default();
    let (_dir, terraform) = orchestrator(&engine, &[]);

    let result = catch_unwind(AssertUnwindSafe(|| {
        terraform.provisioned(|_| -> HarnessResult<()> {
            let reachable = false;
            assert!(reachable, "deliberate assertion failure");
            Ok(())
        })
    }));

    assert!(result.is_err());
    assert_eq!(engine.subcommands(), vec!["init", "apply", "destroy"]);
}

#[test]
fn apply_failure_surfaces_engine_output_and_tears_down() {
    let engine = FakeEngine::default();
    engine.script(
        "apply",
        CommandResult::with_exit_code(1, "", "Error: creating Auto Scaling Group: ValidationError"),
    );
    engine.script(
        "destroy",
        CommandResult::with_exit_code(1, "", "Error: DependencyViolation"),
    );
    let (_dir, terraform) = orchestrator(&engine, &[]);

    let err = terraform.provisioned(|_| Ok(())).unwrap_err();
    assert!(err.teardown_failed());
    match err.cause() {
        HarnessError::Provisioning { command, output, .. } => {
            assert_eq!(command, "apply");
            assert!(output.contains("ValidationError"));
        }
        other => panic!("unexpected cause: {other}"),
    }
}

#[test]
fn nested_mapping_variable_reaches_engine() {
    let engine = FakeEngine::default();
    let (_dir, terraform) = orchestrator(
        &engine,
        &[
            ("mysql_config", json!({ "address": "mock-value-for-test", "port": 3306 })),
            ("environment", json!("test-q1w2e3")),
        ],
    );

    terraform.provisioned(|_| Ok(())).unwrap();
    let apply = engine.invocation("apply");
    assert!(apply.args.contains(&r#"mysql_config={"address" = "mock-value-for-test", "port" = 3306}"#.to_string()));
    assert!(apply.args.contains(&"environment=test-q1w2e3".to_string()));
}

// ---------------------------------------------------------------------------
// Destroy and isolation
// ---------------------------------------------------------------------------

#[test]
fn destroy_is_idempotent() {
    let engine = FakeEngine::default();
    let (_dir, terraform) = orchestrator(&engine, &[]);

    terraform.init_and_apply().unwrap();
    terraform.destroy().unwrap();
    terraform.destroy().unwrap();
    assert_eq!(engine.subcommands(), vec!["init", "apply", "destroy"]);
}

#[test]
fn concurrent_cases_get_distinct_names() {
    let handles: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(|| {
                let mut ids = IdGenerator::new();
                let engine = FakeEngine::default();
                let name = ids.namespaced("test");
                let (_dir, terraform) = orchestrator(&engine, &[("alb_name", json!(name.clone()))]);
                terraform.provisioned(|_| Ok(())).unwrap();
                name
            })
        })
        .collect();

    let names: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(names.len(), 8);
}

/// Writes provider cache, lock file and local state the way a real engine
/// does, into whatever directory it is run in.
#[derive(Clone, Default)]
struct StateWritingEngine {
    prior_state_seen: Arc<Mutex<Vec<String>>>,
}

impl CommandRunner for StateWritingEngine {
    fn run(&self, invocation: &EngineInvocation) -> HarnessResult<CommandResult> {
        let dir = &invocation.working_dir;
        let state = dir.join("terraform.tfstate");
        match invocation.subcommand() {
            "init" => {
                std::fs::create_dir_all(dir.join(".terraform/providers"))?;
                std::fs::write(dir.join(".terraform/providers/aws"), "provider")?;
                std::fs::write(dir.join(".terraform.lock.hcl"), "lock")?;
            }
            "apply" => {
                if let Ok(existing) = std::fs::read_to_string(&state) {
                    self.prior_state_seen.lock().unwrap().push(existing);
                }
                std::fs::write(&state, invocation.args.join(" "))?;
            }
            "destroy" => {
                std::fs::write(&state, "{}")?;
                std::fs::write(dir.join("terraform.tfstate.backup"), "backup")?;
            }
            _ => {}
        }
        Ok(CommandResult::ok(""))
    }
}

fn snapshot(root: &std::path::Path) -> BTreeMap<std::path::PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(Result::unwrap)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, std::fs::read(entry.path()).unwrap())
        })
        .collect()
}

#[test]
fn concurrent_cases_leave_shared_configuration_untouched() {
    let root = tempfile::tempdir().unwrap();
    let config = root.path().join("alb");
    std::fs::create_dir_all(root.path().join("modules/alb")).unwrap();
    std::fs::write(root.path().join("modules/alb/main.tf"), "resource \"aws_lb\" \"example\" {}").unwrap();
    std::fs::create_dir_all(&config).unwrap();
    std::fs::write(config.join("main.tf"), "module \"alb\" { source = \"../modules/alb\" }").unwrap();
    let before = snapshot(root.path());

    let engine = StateWritingEngine::default();
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let options = ProvisioningOptions::new(&config)
                    .with_copy_root(root.path())
                    .with_var("alb_name", format!("test-{}", unique_id()));
                let terraform = Terraform::with_runner(options, engine.clone()).unwrap();
                terraform
                    .provisioned(|tf| {
                        assert!(tf.working_dir().join("terraform.tfstate").is_file());
                        assert!(tf.working_dir().join("../modules/alb/main.tf").is_file());
                        Ok(())
                    })
                    .unwrap();
            });
        }
    });

    assert_eq!(snapshot(root.path()), before);
    assert!(engine.prior_state_seen.lock().unwrap().is_empty());
}
