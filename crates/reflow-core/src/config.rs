//! Engine configuration - seeds, variant cap and evaluation budgets
//!
//! Budgets bound the work one synchronous call may do. Exceeding the
//! iteration budget yields `Value::Unresolved`; exceeding the inverse budget
//! rejects the action.

use serde::{Deserialize, Serialize};

/// Seed used when neither the config nor the document provides one
pub const DEFAULT_DOCUMENT_SEED: u64 = 0x00C0_FFEE_D0C5_EED5;

/// Default upper bound on the number of distinct variants tracked
pub const DEFAULT_MAX_VARIANTS: u64 = 100;

/// Configuration for one engine instance
///
/// # Example
///
/// ```
/// use reflow_core::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.max_variants(), 100);
///
/// let config = EngineConfig::default().with_max_variants(0);
/// assert_eq!(config.max_variants(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seed mixed into every variant draw
    document_seed: u64,
    /// Cap on the enumerated variant space, clamped to `[1, u32::MAX]`
    max_variants: u64,
    /// Steps allowed for one inverse walk
    max_inverse_steps: usize,
    /// Steps allowed for one budgeted iteration expression
    max_iteration_steps: usize,
    /// Whether documents enumerate unique variants unless they opt out
    unique_variants: bool,
}

impl EngineConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the document seed
    pub fn with_document_seed(mut self, seed: u64) -> Self {
        self.document_seed = seed;
        self
    }

    /// Set the variant cap; clamped to `[1, u32::MAX]`
    pub fn with_max_variants(mut self, cap: u64) -> Self {
        self.max_variants = cap.clamp(1, u32::MAX as u64);
        self
    }

    /// Set the inverse step budget (at least 1)
    pub fn with_max_inverse_steps(mut self, steps: usize) -> Self {
        self.max_inverse_steps = steps.max(1);
        self
    }

    /// Set the iteration step budget (at least 1)
    pub fn with_max_iteration_steps(mut self, steps: usize) -> Self {
        self.max_iteration_steps = steps.max(1);
        self
    }

    /// Set whether unique variants are enumerated by default
    pub fn with_unique_variants(mut self, unique: bool) -> Self {
        self.unique_variants = unique;
        self
    }

    pub fn document_seed(&self) -> u64 {
        self.document_seed
    }

    /// Cap on the enumerated variant space
    ///
    /// Values loaded from scripts bypass the setters, so the clamp is
    /// re-applied here.
    pub fn max_variants(&self) -> u64 {
        self.max_variants.clamp(1, u32::MAX as u64)
    }

    pub fn max_inverse_steps(&self) -> usize {
        self.max_inverse_steps.max(1)
    }

    pub fn max_iteration_steps(&self) -> usize {
        self.max_iteration_steps.max(1)
    }

    pub fn unique_variants(&self) -> bool {
        self.unique_variants
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            document_seed: DEFAULT_DOCUMENT_SEED,
            max_variants: DEFAULT_MAX_VARIANTS,
            max_inverse_steps: 1024,
            max_iteration_steps: 10_000,
            unique_variants: true,
        }
    }
}
