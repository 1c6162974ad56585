//! End-to-end testing primitives for infrastructure-as-code.
//!
//! A test case typically:
//! 1. names its resources with [`random::unique_id`],
//! 2. provisions a configuration through [`terraform::Terraform`] with
//!    teardown registered up front,
//! 3. reads outputs or inspects the plan through [`plan::PlanReport`],
//! 4. polls the resulting endpoint with [`http::validate`].

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod plan;
pub mod random;
pub mod terraform;
pub mod testing;

pub use config::HarnessConfig;
pub use error::{ErrorKind, HarnessError, HarnessResult};
pub use http::{
    HttpProbe, LastObservation, Probe, ProbeError, ProbeOutcome, RetryPolicy, body_contains,
    http_get_with_retry, http_get_with_retry_with_custom_validation, validate,
};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use plan::{AttributeLookup, ChangeAction, PlanReport, PlanSummary, PlannedResources};
pub use random::{IdGenerator, unique_id};
pub use terraform::{
    CommandResult, CommandRunner, EngineInvocation, LifecycleState, ProcessRunner,
    ProvisioningOptions, TeardownGuard, Terraform,
};
