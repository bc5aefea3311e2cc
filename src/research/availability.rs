//! Availability precondition run before each agent generates.
//!
//! The check models transient upstream unavailability. It is retried in place
//! by the agent task's [`RetryPolicy`](crate::research::substrate::RetryPolicy);
//! once retries are exhausted the task fails instead of substituting empty
//! output. Production uses [`AlwaysAvailable`]; tests and demos inject
//! deterministic failures with [`InjectedFailures`].

use crate::research::provider::ProviderError;
use crate::research::role::RoleKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Fallible precondition for one generation attempt.
#[async_trait]
pub trait AvailabilityCheck: Send + Sync {
    /// `attempt` starts at 1 and increases with every retry of the same task.
    async fn check(&self, role: RoleKind, attempt: u32) -> Result<(), ProviderError>;
}

/// Check that never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAvailable;

#[async_trait]
impl AvailabilityCheck for AlwaysAvailable {
    async fn check(&self, _role: RoleKind, _attempt: u32) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePlan {
    Times(u32),
    Always,
}

/// Deterministic failure injection keyed by role.
///
/// Counters are shared across every check this value performs, so one instance
/// should be used per run when a "fail N times" plan is meant per task.
///
/// # Example
///
/// ```rust
/// use fanout_research::availability::{AvailabilityCheck, InjectedFailures};
/// use fanout_research::role::RoleKind;
///
/// # #[tokio::main]
/// # async fn main() {
/// let hook = InjectedFailures::new().fail_times(RoleKind::Analyst, 1);
///
/// assert!(hook.check(RoleKind::Analyst, 1).await.is_err());
/// assert!(hook.check(RoleKind::Analyst, 2).await.is_ok());
/// assert!(hook.check(RoleKind::Summarizer, 1).await.is_ok());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InjectedFailures {
    plans: HashMap<RoleKind, FailurePlan>,
    failures: Mutex<HashMap<RoleKind, u32>>,
}

impl InjectedFailures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `times` checks for `role`.
    pub fn fail_times(mut self, role: RoleKind, times: u32) -> Self {
        self.plans.insert(role, FailurePlan::Times(times));
        self
    }

    /// Fail every check for `role`.
    pub fn fail_always(mut self, role: RoleKind) -> Self {
        self.plans.insert(role, FailurePlan::Always);
        self
    }

    /// How many checks have failed so far for `role`.
    pub fn failures_for(&self, role: RoleKind) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&role)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AvailabilityCheck for InjectedFailures {
    async fn check(&self, role: RoleKind, attempt: u32) -> Result<(), ProviderError> {
        let Some(plan) = self.plans.get(&role) else {
            return Ok(());
        };
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(role).or_insert(0);
        let should_fail = match plan {
            FailurePlan::Always => true,
            FailurePlan::Times(limit) => *count < *limit,
        };
        if should_fail {
            *count += 1;
            return Err(ProviderError::Unavailable(format!(
                "{} model temporarily unavailable (attempt {})",
                role, attempt
            )));
        }
        Ok(())
    }
}
