//! Endpoint validation with a fixed-interval retry budget.
//!
//! Freshly provisioned endpoints take a roughly constant time to warm up, so
//! attempts are spaced by a constant delay rather than a growing backoff.
//! Connection failures during warm-up count as non-matching attempts.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Default per-request timeout for [`HttpProbe`].
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempt budget and spacing for [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total probes including the first (minimum 1).
    pub max_attempts: u32,
    /// Pause between consecutive probes.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> HarnessResult<Self> {
        let policy = Self {
            max_attempts,
            delay,
        };
        policy.check()?;
        Ok(policy)
    }

    /// A single probe with no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    fn check(&self) -> HarnessResult<()> {
        if self.max_attempts == 0 {
            return Err(HarnessError::InvalidRetryPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(10),
        }
    }
}

/// Status and body captured from one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: u16,
    pub body: String,
}

impl ProbeOutcome {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Transport-level failure of a single attempt (refused, reset, DNS, timeout).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProbeError(String);

impl ProbeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// What the final attempt observed, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastObservation {
    Outcome(ProbeOutcome),
    TransportFailure(ProbeError),
}

impl fmt::Display for LastObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outcome(outcome) => {
                write!(f, "status {} body {:?}", outcome.status, truncate(&outcome.body, 256))
            }
            Self::TransportFailure(err) => write!(f, "transport failure: {err}"),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// One synchronous attempt against an opaque target.
pub trait Probe {
    fn probe(&mut self, target: &str) -> Result<ProbeOutcome, ProbeError>;
}

impl<F> Probe for F
where
    F: FnMut(&str) -> Result<ProbeOutcome, ProbeError>,
{
    fn probe(&mut self, target: &str) -> Result<ProbeOutcome, ProbeError> {
        self(target)
    }
}

/// Probe `target` until `predicate` accepts an outcome or the policy is
/// exhausted.
///
/// Attempts are strictly sequential. The calling thread sleeps for
/// `policy.delay` between attempts, never after the last one.
pub fn validate<P, F>(
    target: &str,
    probe: &mut P,
    predicate: F,
    policy: &RetryPolicy,
) -> HarnessResult<ProbeOutcome>
where
    P: Probe + ?Sized,
    F: Fn(&ProbeOutcome) -> bool,
{
    policy.check()?;

    let start = Instant::now();
    let mut last = None;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            std::thread::sleep(policy.delay);
        }

        match probe.probe(target) {
            Ok(outcome) if predicate(&outcome) => {
                info!(
                    endpoint = target,
                    attempt,
                    status = outcome.status,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Validation passed"
                );
                return Ok(outcome);
            }
            Ok(outcome) => {
                debug!(
                    endpoint = target,
                    attempt,
                    max_attempts = policy.max_attempts,
                    status = outcome.status,
                    "Probe outcome did not match, retrying"
                );
                last = Some(LastObservation::Outcome(outcome));
            }
            Err(err) => {
                debug!(
                    endpoint = target,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "Probe transport failure, retrying"
                );
                last = Some(LastObservation::TransportFailure(err));
            }
        }
    }

    let last = last.unwrap_or_else(|| {
        LastObservation::TransportFailure(ProbeError::new("no attempt was made"))
    });
    warn!(
        endpoint = target,
        attempts = policy.max_attempts,
        last = %last,
        "Validation retry budget exhausted"
    );
    Err(HarnessError::ValidationTimeout {
        target: target.to_string(),
        attempts: policy.max_attempts,
        last,
    })
}

/// Plain HTTP GET probe. Any status code is a successful attempt.
pub struct HttpProbe {
    agent: ureq::Agent,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

impl Probe for HttpProbe {
    fn probe(&mut self, url: &str) -> Result<ProbeOutcome, ProbeError> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| ProbeError::new(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| ProbeError::new(format!("reading body: {e}")))?;
        Ok(ProbeOutcome {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// GET `url` until it returns `expected_status` with a body equal to
/// `expected_body` (surrounding whitespace ignored).
pub fn http_get_with_retry(
    url: &str,
    expected_status: u16,
    expected_body: &str,
    policy: &RetryPolicy,
) -> HarnessResult<ProbeOutcome> {
    let expected_body = expected_body.trim().to_string();
    http_get_with_retry_with_custom_validation(url, policy, move |outcome| {
        outcome.status == expected_status && outcome.body.trim() == expected_body
    })
}

/// GET `url` until `predicate` accepts the response.
pub fn http_get_with_retry_with_custom_validation<F>(
    url: &str,
    policy: &RetryPolicy,
    predicate: F,
) -> HarnessResult<ProbeOutcome>
where
    F: Fn(&ProbeOutcome) -> bool,
{
    let mut probe = HttpProbe::default();
    validate(url, &mut probe, predicate, policy)
}

/// Predicate: status matches and the body contains `needle`.
pub fn body_contains(status: u16, needle: impl Into<String>) -> impl Fn(&ProbeOutcome) -> bool {
    let needle = needle.into();
    move |outcome| outcome.status == status && outcome.body.contains(&needle)
}
