//! infratest - drive a Terraform configuration from the command line
//!
//! Useful for reproducing a failing scenario by hand: the same planning,
//! provisioning and probing code paths the test suite uses.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use infratest_common::http::{HttpProbe, RetryPolicy, validate};
use infratest_common::plan::resource_changes;
use infratest_common::{
    HarnessConfig, IdGenerator, LogConfig, PlanSummary, ProvisioningOptions, Terraform,
    init_logging,
};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "infratest")]
#[command(author, version, about = "Plan, apply, destroy and probe Terraform configurations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh randomized identifier
    Id {
        /// Prefix, printed as `<prefix>-<id>`
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Plan a configuration and summarize the changes
    Plan {
        #[command(flatten)]
        target: Target,

        /// Print the summary and per-resource actions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply a configuration, print its outputs, then destroy it
    Apply {
        #[command(flatten)]
        target: Target,

        /// Leave the infrastructure in place. Runs in the configuration
        /// directory itself so `destroy` and `output` can find the state.
        #[arg(long)]
        keep: bool,
    },

    /// Destroy whatever the configuration directory's state holds
    Destroy {
        #[command(flatten)]
        target: Target,
    },

    /// Print one output of a configuration applied with `apply --keep`
    Output {
        /// Configuration directory
        #[arg(short, long)]
        dir: PathBuf,

        /// Output name
        name: String,
    },

    /// Poll a URL until it returns the expected response
    Probe {
        url: String,

        /// Expected status code
        #[arg(long, default_value = "200")]
        status: u16,

        /// Substring the body must contain
        #[arg(long)]
        contains: Option<String>,

        /// Total attempts, including the first
        #[arg(long, default_value = "10")]
        attempts: u32,

        /// Pause between attempts, e.g. `10s` or `500ms`
        #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
        delay: Duration,
    },
}

#[derive(Args)]
struct Target {
    /// Configuration directory
    #[arg(short, long)]
    dir: PathBuf,

    /// Ancestor of `--dir` copied along with it, for configurations that
    /// reference sibling modules by relative path
    #[arg(long)]
    root: Option<PathBuf>,

    /// Input variable as `name=value`; values that parse as JSON are passed
    /// as structured values, anything else as a string
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, Value)>,
}

impl Target {
    fn options(self, config: &HarnessConfig) -> ProvisioningOptions {
        let mut options = config.options_for_dir(&self.dir);
        if let Some(root) = self.root {
            options = options.with_copy_root(root);
        }
        self.vars
            .into_iter()
            .fold(options, |options, (name, value)| options.with_var(name, value))
    }
}

fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let Some((name, value)) = raw.split_once('=') else {
        return Err(format!("expected name=value, got '{raw}'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("variable name is empty in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let config = HarnessConfig::from_env().context("reading INFRATEST_* configuration")?;

    match cli.command {
        Commands::Id { prefix } => {
            let mut ids = IdGenerator::new();
            match prefix {
                Some(prefix) => println!("{}", ids.namespaced(&prefix)),
                None => println!("{}", ids.next_id()),
            }
        }
        Commands::Plan { target, json } => {
            let terraform = Terraform::new(target.options(&config))?;
            let report = terraform.init_and_plan_and_show()?;
            let summary = report.count_resources()?;
            if json {
                print_plan_json(&summary, &report)?;
            } else {
                println!("{summary}");
            }
        }
        Commands::Apply { target, keep } => {
            if keep {
                let terraform = Terraform::new(target.options(&config).in_place())?;
                terraform.init_and_apply()?;
                print_json(&terraform.output_all()?)?;
                warn!(dir = %terraform.dir().display(), "Infrastructure kept, destroy it with `infratest destroy`");
            } else {
                let terraform = Terraform::new(target.options(&config))?;
                let outputs = terraform.provisioned(|tf| tf.output_all())?;
                print_json(&outputs)?;
            }
        }
        Commands::Destroy { target } => {
            let terraform = Terraform::new(target.options(&config).in_place())?;
            terraform.init_and_destroy()?;
            info!(dir = %terraform.dir().display(), "Destroyed");
        }
        Commands::Output { dir, name } => {
            let terraform = Terraform::new(config.options_for_dir(&dir).in_place())?;
            match terraform.output(&name)? {
                Value::String(s) => println!("{s}"),
                other => println!("{}", serde_json::to_string_pretty(&other)?),
            }
        }
        Commands::Probe {
            url,
            status,
            contains,
            attempts,
            delay,
        } => {
            let policy = RetryPolicy::new(attempts, delay)?;
            let needle = contains.unwrap_or_default();
            let mut probe = HttpProbe::new(config.http_timeout);
            let outcome = validate(
                &url,
                &mut probe,
                |outcome| outcome.status == status && outcome.body.contains(&needle),
                &policy,
            )?;
            println!("{} {}", outcome.status, outcome.body.trim_end());
        }
    }

    Ok(())
}

fn print_plan_json(summary: &PlanSummary, report: &infratest_common::PlanReport) -> Result<()> {
    let actions: BTreeMap<String, String> = resource_changes(report)?
        .into_iter()
        .map(|(address, change)| (address, change.action.to_string()))
        .collect();
    print_json(&serde_json::json!({
        "summary": summary,
        "resource_changes": actions,
    }))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
