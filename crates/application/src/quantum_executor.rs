use std::sync::Arc;
use std::time::Duration;

use quantarun_core::{AppError, AppResult, NonEmptyString};
use quantarun_domain::{Lease, TaskQuantum};
use tracing::{debug, warn};

use crate::quantum_ports::{LeaseCoordinator, QuantumHandler, QuantumOutcome};

#[cfg(test)]
mod tests;

enum QuantumExit {
    Finished(AppResult<()>),
    BudgetExhausted,
    LeaseLost,
}

/// Lease-guarded executor for bounded task quanta.
///
/// Each invocation walks one state machine:
/// idle -> lease requested -> (granted -> running -> released) | denied.
/// The lease is released on every exit path, and work never continues on a
/// lease this executor no longer holds.
pub struct QuantumExecutor {
    lease_coordinator: Arc<dyn LeaseCoordinator>,
    handler: Arc<dyn QuantumHandler>,
    holder_id: NonEmptyString,
    lease_seconds: u32,
}

impl QuantumExecutor {
    /// Creates one executor bound to a holder identity and lease window.
    pub fn new(
        lease_coordinator: Arc<dyn LeaseCoordinator>,
        handler: Arc<dyn QuantumHandler>,
        holder_id: impl Into<String>,
        lease_seconds: u32,
    ) -> AppResult<Self> {
        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "executor lease_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            lease_coordinator,
            handler,
            holder_id: NonEmptyString::new(holder_id)?,
            lease_seconds,
        })
    }

    /// Runs one quantum under mutual exclusion for its task/run pair.
    ///
    /// A contested or unreachable lease store yields `Denied` (fail
    /// closed). Handler errors propagate to the caller, but only after the
    /// lease has been released.
    pub async fn execute_quantum(&self, mut quantum: TaskQuantum) -> AppResult<QuantumOutcome> {
        let resource_key = quantum.resource_key();

        let lease = match self
            .lease_coordinator
            .try_acquire(
                resource_key.as_str(),
                self.holder_id.as_str(),
                self.lease_seconds,
            )
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(
                    resource_key = %resource_key,
                    holder_id = %self.holder_id.as_str(),
                    "quantum lease held elsewhere"
                );
                return Ok(QuantumOutcome::Denied);
            }
            Err(error) => {
                warn!(
                    resource_key = %resource_key,
                    holder_id = %self.holder_id.as_str(),
                    error = %error,
                    "lease acquisition failed, treating quantum as denied"
                );
                return Ok(QuantumOutcome::Denied);
            }
        };

        quantum.mark_started();
        let budget = Duration::from_secs(u64::from(quantum.quantum_seconds()));

        let exit = tokio::select! {
            result = tokio::time::timeout(budget, self.handler.execute(&quantum)) => {
                match result {
                    Ok(handler_result) => QuantumExit::Finished(handler_result),
                    Err(_) => QuantumExit::BudgetExhausted,
                }
            }
            () = self.keep_lease_alive(&lease) => QuantumExit::LeaseLost,
        };

        if let Err(error) = self.lease_coordinator.release(&lease).await {
            warn!(
                resource_key = %lease.resource_key(),
                error = %error,
                "failed to release quantum lease"
            );
        }

        match exit {
            QuantumExit::Finished(Ok(())) => Ok(QuantumOutcome::Completed),
            QuantumExit::Finished(Err(error)) => Err(error),
            QuantumExit::BudgetExhausted => Ok(QuantumOutcome::TimedOut),
            QuantumExit::LeaseLost => Ok(QuantumOutcome::LeaseLost),
        }
    }

    /// Extends the lease at half its TTL until ownership is lost.
    ///
    /// Resolves only on lost ownership; extension transport errors are
    /// retried on the next tick because the lease may still be valid.
    async fn keep_lease_alive(&self, lease: &Lease) {
        let period = Duration::from_secs(u64::from(self.lease_seconds / 2).max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            ticker.tick().await;

            match self
                .lease_coordinator
                .extend(lease, self.lease_seconds)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        resource_key = %lease.resource_key(),
                        holder_id = %lease.holder_id(),
                        "quantum lease ownership lost, cancelling work"
                    );
                    return;
                }
                Err(error) => {
                    warn!(
                        resource_key = %lease.resource_key(),
                        error = %error,
                        "quantum lease extension failed, retrying on next tick"
                    );
                }
            }
        }
    }
}
