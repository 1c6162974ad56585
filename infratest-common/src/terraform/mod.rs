//! Lifecycle orchestration of the provisioning engine.
//!
//! A [`Terraform`] drives one configuration directory with one set of
//! variables through `init`, `plan`/`apply` and `destroy`. Instances share
//! no state: each runs in its own working copy of the configuration, and
//! concurrent test cases isolate externally-visible names through
//! randomized variables.
//!
//! Engine failures are never retried: they are deterministic configuration
//! or permission faults and surface as [`HarnessError::Provisioning`].

mod options;
mod runner;
mod teardown;
mod workspace;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::plan::PlanReport;

pub use options::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_TERRAFORM_BINARY, ProvisioningOptions};
pub use runner::{CommandResult, CommandRunner, EngineInvocation, ProcessRunner, TIMEOUT_EXIT_CODE};
pub use teardown::TeardownGuard;

use workspace::WorkingCopy;

/// `plan -detailed-exitcode` status when changes are present.
const PLAN_CHANGES_PRESENT: i32 = 2;

/// Where an orchestrator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotInitialized,
    Initialized,
    Planned,
    Applied,
    Destroyed,
}

impl LifecycleState {
    fn label(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not initialized",
            Self::Initialized => "initialized",
            Self::Planned => "planned",
            Self::Applied => "applied",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Orchestrator for one configuration directory and variable set.
pub struct Terraform {
    options: ProvisioningOptions,
    runner: Box<dyn CommandRunner>,
    state: Mutex<LifecycleState>,
    workspace: WorkingCopy,
    /// Set once an apply has started, cleared by a successful destroy.
    may_hold_resources: AtomicBool,
}

impl fmt::Debug for Terraform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terraform")
            .field("options", &self.options)
            .field("working_dir", &self.workspace.dir())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Terraform {
    /// Orchestrator that runs the engine binary from `options`.
    pub fn new(options: ProvisioningOptions) -> HarnessResult<Self> {
        Self::with_runner(options, ProcessRunner)
    }

    /// Orchestrator with a custom engine runner.
    pub fn with_runner(
        options: ProvisioningOptions,
        runner: impl CommandRunner + 'static,
    ) -> HarnessResult<Self> {
        if !options.terraform_dir.is_dir() {
            return Err(HarnessError::ConfigDirNotFound(options.terraform_dir.clone()));
        }
        let workspace = if options.in_place {
            WorkingCopy::in_place(&options.terraform_dir)
        } else {
            let root = options
                .copy_root
                .as_deref()
                .unwrap_or(options.terraform_dir.as_path());
            WorkingCopy::copy(root, &options.terraform_dir)?
        };
        debug!(
            dir = %options.terraform_dir.display(),
            working_dir = %workspace.dir().display(),
            private = workspace.is_private(),
            "Orchestrator ready"
        );
        Ok(Self {
            options,
            runner: Box::new(runner),
            state: Mutex::new(LifecycleState::NotInitialized),
            workspace,
            may_hold_resources: AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> &ProvisioningOptions {
        &self.options
    }

    /// The configuration directory from the options.
    pub fn dir(&self) -> &Path {
        &self.options.terraform_dir
    }

    /// Where engine commands run: the private copy of [`Self::dir`], or
    /// `dir` itself for in-place options.
    pub fn working_dir(&self) -> &Path {
        self.workspace.dir()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(dir = %self.dir().display(), from = %*state, to = %next, "Lifecycle transition");
        *state = next;
    }

    fn require_initialized(&self, operation: &'static str) -> HarnessResult<()> {
        match self.state() {
            LifecycleState::NotInitialized | LifecycleState::Destroyed => {
                Err(HarnessError::InvalidState {
                    operation,
                    state: self.state().label(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Run `terraform init`.
    pub fn init(&self) -> HarnessResult<()> {
        self.run("init", &["-upgrade=false", "-input=false"], false, &[0])?;
        if matches!(
            self.state(),
            LifecycleState::NotInitialized | LifecycleState::Destroyed
        ) {
            self.set_state(LifecycleState::Initialized);
        }
        Ok(())
    }

    /// Run `terraform apply`. Requires a prior [`Self::init`].
    pub fn apply(&self) -> HarnessResult<String> {
        self.require_initialized("apply")?;
        self.may_hold_resources.store(true, Ordering::SeqCst);
        let result = self.run("apply", &["-input=false", "-auto-approve"], true, &[0])?;
        self.set_state(LifecycleState::Applied);
        Ok(result.stdout)
    }

    pub fn init_and_apply(&self) -> HarnessResult<String> {
        self.init()?;
        self.apply()
    }

    /// Run `terraform plan` and return its human-readable output.
    ///
    /// Uses `-detailed-exitcode`, so both "no changes" and "changes
    /// present" count as success.
    pub fn plan(&self) -> HarnessResult<String> {
        self.plan_with_args(&[])
    }

    fn plan_with_args(&self, extra: &[&str]) -> HarnessResult<String> {
        self.require_initialized("plan")?;
        let mut args = vec!["-input=false", "-lock=false", "-detailed-exitcode"];
        args.extend_from_slice(extra);
        let result = self.run("plan", &args, true, &[0, PLAN_CHANGES_PRESENT])?;
        if self.state() == LifecycleState::Initialized {
            self.set_state(LifecycleState::Planned);
        }
        Ok(result.stdout)
    }

    pub fn init_and_plan(&self) -> HarnessResult<String> {
        self.init()?;
        self.plan()
    }

    /// Plan into a temporary plan file and return its structured report.
    pub fn init_and_plan_and_show(&self) -> HarnessResult<PlanReport> {
        self.init()?;

        let plan_dir = tempfile::Builder::new()
            .prefix("infratest-plan-")
            .tempdir()?;
        let plan_file = plan_dir.path().join("plan.tfplan");
        let out_arg = format!("-out={}", plan_file.display());
        self.plan_with_args(&[out_arg.as_str()])?;

        self.show_plan(&plan_file)
    }

    /// Read a saved plan file as a structured report.
    pub fn show_plan(&self, plan_file: &Path) -> HarnessResult<PlanReport> {
        let plan_arg = plan_file.display().to_string();
        let result = self.run("show", &["-json", plan_arg.as_str()], false, &[0])?;
        PlanReport::from_json(&result.stdout)
    }

    /// Run `terraform destroy`.
    ///
    /// Safe to call from any state and any number of times: nothing is run
    /// when this orchestrator never initialized or has already destroyed.
    pub fn destroy(&self) -> HarnessResult<()> {
        match self.state() {
            LifecycleState::NotInitialized => {
                debug!(dir = %self.dir().display(), "Destroy skipped: never initialized");
                Ok(())
            }
            LifecycleState::Destroyed => {
                debug!(dir = %self.dir().display(), "Destroy skipped: already destroyed");
                Ok(())
            }
            _ => {
                self.run("destroy", &["-input=false", "-auto-approve"], true, &[0])?;
                self.may_hold_resources.store(false, Ordering::SeqCst);
                self.set_state(LifecycleState::Destroyed);
                Ok(())
            }
        }
    }

    /// Initialize, then destroy whatever the backend state holds.
    pub fn init_and_destroy(&self) -> HarnessResult<()> {
        self.init()?;
        self.destroy()
    }

    /// Run `terraform validate`.
    pub fn validate(&self) -> HarnessResult<()> {
        self.require_initialized("validate")?;
        self.run("validate", &[], false, &[0])?;
        Ok(())
    }

    /// Values of every root module output.
    pub fn output_all(&self) -> HarnessResult<BTreeMap<String, Value>> {
        let result = self.run("output", &["-json"], false, &[0])?;
        let stdout = result.stdout.trim();
        if stdout.is_empty() {
            return Ok(BTreeMap::new());
        }
        let raw: Value = serde_json::from_str(stdout)?;
        let Some(outputs) = raw.as_object() else {
            return Err(HarnessError::Provisioning {
                command: "output".to_string(),
                exit_code: result.exit_code,
                output: result.stdout,
            });
        };

        Ok(outputs
            .iter()
            .map(|(name, entry)| {
                let value = entry.get("value").cloned().unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect())
    }

    /// Value of the named output. Absence is an error, never an empty value.
    pub fn output(&self, name: &str) -> HarnessResult<Value> {
        self.output_all()?
            .remove(name)
            .ok_or_else(|| self.missing_output(name))
    }

    /// Named output rendered as a string (JSON text for non-strings).
    pub fn output_string(&self, name: &str) -> HarnessResult<String> {
        Ok(match self.output(name)? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Named output that must also be non-null and non-empty.
    pub fn output_required(&self, name: &str) -> HarnessResult<String> {
        match self.output(name)? {
            Value::Null => Err(self.missing_output(name)),
            Value::String(s) if s.trim().is_empty() => Err(self.missing_output(name)),
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    fn missing_output(&self, name: &str) -> HarnessError {
        HarnessError::MissingOutput {
            name: name.to_string(),
            dir: self.options.terraform_dir.clone(),
        }
    }

    /// Build the invocation for `subcommand`.
    pub fn invocation(&self, subcommand: &str, args: &[&str], with_vars: bool) -> EngineInvocation {
        let mut full = vec![subcommand.to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        if self.options.no_color {
            full.push("-no-color".to_string());
        }

        let mut display = full.clone();
        if with_vars {
            full.extend(self.options.var_args());
            display.extend(self.options.redacted_var_args());
        }

        EngineInvocation {
            binary: self.options.binary.clone(),
            display: format!("{} {}", self.options.binary, display.join(" ")),
            args: full,
            working_dir: self.workspace.dir().to_path_buf(),
            env: self.options.env_vars.clone(),
            timeout: self.options.command_timeout,
        }
    }

    fn run(
        &self,
        subcommand: &'static str,
        args: &[&str],
        with_vars: bool,
        ok_codes: &[i32],
    ) -> HarnessResult<CommandResult> {
        let invocation = self.invocation(subcommand, args, with_vars);
        info!(
            dir = %self.dir().display(),
            command = %invocation.display,
            "Running terraform {subcommand}"
        );

        let result = self.runner.run(&invocation)?;
        if result.timed_out {
            return Err(HarnessError::Timeout(invocation.timeout));
        }
        if !ok_codes.contains(&result.exit_code) {
            return Err(HarnessError::Provisioning {
                command: subcommand.to_string(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        info!(
            dir = %self.dir().display(),
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "terraform {subcommand} completed"
        );
        Ok(result)
    }
}

impl Drop for Terraform {
    fn drop(&mut self) {
        if !self.may_hold_resources.load(Ordering::SeqCst) {
            return;
        }
        if let Some(kept) = self.workspace.persist() {
            warn!(
                dir = %self.dir().display(),
                working_copy = %kept.display(),
                state = %self.state(),
                "Keeping working copy: its state may track resources that were never destroyed"
            );
        }
    }
}
