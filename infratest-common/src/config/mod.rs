//! Harness configuration.
//!
//! Everything is read from `INFRATEST_*` environment variables so CI jobs
//! can retarget the engine binary, timeouts and configuration root without
//! code changes.

pub mod env;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};
use crate::http::DEFAULT_HTTP_TIMEOUT;
use crate::terraform::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_TERRAFORM_BINARY, ProvisioningOptions};

pub use env::{EnvError, EnvParser};

/// Directory of example configurations, relative to the workspace root.
pub const DEFAULT_EXAMPLES_DIR: &str = "terraform-examples";

/// Harness-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub terraform_binary: String,
    pub command_timeout: Duration,
    pub http_timeout: Duration,
    pub examples_dir: PathBuf,
    pub no_color: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            terraform_binary: DEFAULT_TERRAFORM_BINARY.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            examples_dir: default_examples_dir(),
            no_color: true,
        }
    }
}

impl HarnessConfig {
    /// Load from the environment, reporting every malformed variable.
    pub fn from_env() -> HarnessResult<Self> {
        let mut parser = EnvParser::new();
        let defaults = Self::default();

        let config = Self {
            terraform_binary: parser.get_string("TERRAFORM_BINARY", &defaults.terraform_binary),
            command_timeout: parser.get_secs_in(
                "COMMAND_TIMEOUT_SECS",
                defaults.command_timeout,
                1..=86_400,
            ),
            http_timeout: parser.get_secs_in("HTTP_TIMEOUT_SECS", defaults.http_timeout, 1..=600),
            examples_dir: parser.get_path("EXAMPLES_DIR", defaults.examples_dir),
            no_color: parser.get_bool("NO_COLOR", defaults.no_color),
        };

        if parser.has_errors() {
            let messages: Vec<String> = parser.take_errors().iter().map(ToString::to_string).collect();
            return Err(HarnessError::Config(messages.join("; ")));
        }
        Ok(config)
    }

    /// Directory of the named example configuration.
    pub fn example_dir(&self, example: &str) -> PathBuf {
        self.examples_dir.join(example)
    }

    /// True when the configuration root is present on this machine.
    pub fn examples_available(&self) -> bool {
        self.examples_dir.is_dir()
    }

    /// Options for the named example with harness-wide settings applied.
    ///
    /// The whole examples root is copied into the working copy so examples
    /// can reach shared modules by relative path.
    pub fn options_for(&self, example: &str) -> ProvisioningOptions {
        self.options_for_dir(self.example_dir(example))
            .with_copy_root(&self.examples_dir)
    }

    pub fn options_for_dir(&self, dir: impl AsRef<Path>) -> ProvisioningOptions {
        ProvisioningOptions::new(dir.as_ref())
            .with_binary(self.terraform_binary.clone())
            .with_timeout(self.command_timeout)
            .with_color(!self.no_color)
    }
}

/// `terraform-examples/` beside the workspace root.
fn default_examples_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(|root| root.join(DEFAULT_EXAMPLES_DIR))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EXAMPLES_DIR))
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
