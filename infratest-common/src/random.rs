//! Short randomized identifiers for namespacing concurrently-running tests.
//!
//! Each generator owns its random source; there is no process-wide counter
//! or shared state, so test cases can build their own and stay independent.

/// Length of identifiers produced by [`IdGenerator::next_id`].
pub const ID_LEN: usize = 6;

/// Base-36 alphabet size (`0-9a-z`).
const ID_RADIX: u32 = 36;

/// Generator for short, lowercase, alphanumeric identifiers.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    rng: fastrand::Rng,
}

impl IdGenerator {
    /// Create a generator seeded from the process entropy pool.
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    /// Create a deterministic generator.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Produce the next identifier, e.g. `k3f9xq`.
    pub fn next_id(&mut self) -> String {
        (0..ID_LEN).map(|_| self.rng.digit(ID_RADIX)).collect()
    }

    /// Produce `"<prefix>-<id>"`.
    pub fn namespaced(&mut self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier from a freshly seeded generator.
pub fn unique_id() -> String {
    IdGenerator::new().next_id()
}
