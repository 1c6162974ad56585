//! Guaranteed teardown of provisioned infrastructure.

use tracing::{error, info, warn};

use super::Terraform;
use crate::error::HarnessResult;
use crate::plan::PlanReport;

/// Destroys on drop unless [`TeardownGuard::finish`] already ran.
///
/// Register the guard before provisioning: the drop path also covers
/// panicking assertions and partially-applied infrastructure.
#[must_use = "dropping the guard immediately runs destroy"]
pub struct TeardownGuard<'a> {
    terraform: &'a Terraform,
    armed: bool,
}

impl<'a> TeardownGuard<'a> {
    pub(super) fn new(terraform: &'a Terraform) -> Self {
        Self {
            terraform,
            armed: true,
        }
    }

    pub fn terraform(&self) -> &'a Terraform {
        self.terraform
    }

    /// Destroy now and report the outcome.
    pub fn finish(mut self) -> HarnessResult<()> {
        self.armed = false;
        self.terraform.destroy()
    }

    /// Skip teardown, leaving resources in place.
    pub fn disarm(mut self) {
        warn!(
            dir = %self.terraform.dir().display(),
            "Teardown disarmed, resources left in place"
        );
        self.armed = false;
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            warn!(
                dir = %self.terraform.dir().display(),
                "Test body panicked, destroying infrastructure"
            );
        }
        if let Err(e) = self.terraform.destroy() {
            error!(
                dir = %self.terraform.dir().display(),
                error = %e,
                "Teardown failed, resources may be orphaned"
            );
        }
    }
}

/// Combine a body outcome with its teardown outcome. The body's error wins
/// and a teardown failure is attached to it rather than masking it.
fn settle<T>(outcome: HarnessResult<T>, teardown: HarnessResult<()>) -> HarnessResult<T> {
    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(teardown)) => Err(teardown),
        (Err(cause), Ok(())) => Err(cause),
        (Err(cause), Err(teardown)) => {
            error!(cause = %cause, teardown = %teardown, "Teardown failed after test failure");
            Err(cause.with_teardown_failure(teardown))
        }
    }
}

impl Terraform {
    /// Guard that destroys this orchestrator's infrastructure when dropped.
    pub fn teardown_guard(&self) -> TeardownGuard<'_> {
        TeardownGuard::new(self)
    }

    /// Init and apply, run `body`, then destroy on every exit path.
    ///
    /// A panic in `body` still destroys before unwinding continues.
    pub fn provisioned<T, F>(&self, body: F) -> HarnessResult<T>
    where
        F: FnOnce(&Terraform) -> HarnessResult<T>,
    {
        let guard = self.teardown_guard();
        let outcome = self.init_and_apply().and_then(|_| {
            info!(dir = %self.dir().display(), "Infrastructure provisioned");
            body(self)
        });
        settle(outcome, guard.finish())
    }

    /// Init and plan into a structured report and hand it to `body`.
    ///
    /// Nothing is applied, so no teardown runs.
    pub fn planned<T, F>(&self, body: F) -> HarnessResult<T>
    where
        F: FnOnce(&PlanReport) -> HarnessResult<T>,
    {
        let report = self.init_and_plan_and_show()?;
        body(&report)
    }
}
