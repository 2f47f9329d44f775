use async_trait::async_trait;
use quantarun_core::AppResult;
use quantarun_domain::{Lease, TaskQuantum};

/// Distributed coordination port for lease claims.
///
/// Implementations arbitrate through a shared key-value store offering
/// atomic set-if-absent, expiry reset, and guarded delete.
#[async_trait]
pub trait LeaseCoordinator: Send + Sync {
    /// Attempts one non-blocking acquisition for the given resource key.
    ///
    /// Returns `None` when an unexpired lease already exists; a failed
    /// acquisition is a void action, never an error.
    async fn try_acquire(
        &self,
        resource_key: &str,
        holder_id: &str,
        ttl_seconds: u32,
    ) -> AppResult<Option<Lease>>;

    /// Releases one lease using token compare-and-delete semantics.
    ///
    /// Releasing an expired or absent key is not an error.
    async fn release(&self, lease: &Lease) -> AppResult<()>;

    /// Resets the expiry window of one held lease.
    ///
    /// Returns `false` when the key is absent or owned by another token.
    async fn extend(&self, lease: &Lease, ttl_seconds: u32) -> AppResult<bool>;
}

/// Work port invoked while a quantum's lease is held.
#[async_trait]
pub trait QuantumHandler: Send + Sync {
    /// Executes one quantum's side effects.
    async fn execute(&self, quantum: &TaskQuantum) -> AppResult<()>;
}

/// Terminal outcome of one quantum invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantumOutcome {
    /// Another holder owns the lease; the quantum was skipped.
    Denied,
    /// The handler finished within the work budget.
    Completed,
    /// The work budget elapsed before the handler finished.
    TimedOut,
    /// Lease ownership was lost mid-run and the handler was cancelled.
    LeaseLost,
}

impl QuantumOutcome {
    /// Returns stable outcome value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::LeaseLost => "lease_lost",
        }
    }
}
