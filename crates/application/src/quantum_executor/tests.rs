use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use quantarun_core::{AppError, AppResult};
use quantarun_domain::{Lease, TaskQuantum, TaskQuantumInput};

use crate::quantum_ports::{LeaseCoordinator, QuantumHandler, QuantumOutcome};

use super::QuantumExecutor;

#[derive(Default)]
struct FakeLeaseCoordinator {
    entries: Mutex<HashMap<String, String>>,
    acquisitions: Mutex<u32>,
    fail_acquire: bool,
    lose_ownership_on_extend: bool,
}

impl FakeLeaseCoordinator {
    async fn seed_foreign_lease(&self, resource_key: &str) {
        self.entries
            .lock()
            .await
            .insert(resource_key.to_owned(), "other-worker:1".to_owned());
    }

    async fn holds_key(&self, resource_key: &str) -> bool {
        self.entries.lock().await.contains_key(resource_key)
    }
}

#[async_trait]
impl LeaseCoordinator for FakeLeaseCoordinator {
    async fn try_acquire(
        &self,
        resource_key: &str,
        holder_id: &str,
        ttl_seconds: u32,
    ) -> AppResult<Option<Lease>> {
        if self.fail_acquire {
            return Err(AppError::Unavailable("lease store offline".to_owned()));
        }

        let mut entries = self.entries.lock().await;
        if entries.contains_key(resource_key) {
            return Ok(None);
        }

        let mut acquisitions = self.acquisitions.lock().await;
        *acquisitions = acquisitions.saturating_add(1);
        let token = format!("{holder_id}:{acquisitions}");
        entries.insert(resource_key.to_owned(), token.clone());

        Lease::new(resource_key, holder_id, token, ttl_seconds).map(Some)
    }

    async fn release(&self, lease: &Lease) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        if entries
            .get(lease.resource_key())
            .is_some_and(|token| token == lease.token())
        {
            entries.remove(lease.resource_key());
        }

        Ok(())
    }

    async fn extend(&self, lease: &Lease, _ttl_seconds: u32) -> AppResult<bool> {
        if self.lose_ownership_on_extend {
            return Ok(false);
        }

        let entries = self.entries.lock().await;
        Ok(entries
            .get(lease.resource_key())
            .is_some_and(|token| token == lease.token()))
    }
}

enum HandlerBehavior {
    Succeed,
    Fail,
    NeverFinish,
}

struct FakeQuantumHandler {
    behavior: HandlerBehavior,
    executions: Mutex<u32>,
}

impl FakeQuantumHandler {
    fn new(behavior: HandlerBehavior) -> Self {
        Self {
            behavior,
            executions: Mutex::new(0),
        }
    }

    async fn executions(&self) -> u32 {
        *self.executions.lock().await
    }
}

#[async_trait]
impl QuantumHandler for FakeQuantumHandler {
    async fn execute(&self, _quantum: &TaskQuantum) -> AppResult<()> {
        {
            let mut executions = self.executions.lock().await;
            *executions = executions.saturating_add(1);
        }

        match self.behavior {
            HandlerBehavior::Succeed => Ok(()),
            HandlerBehavior::Fail => Err(AppError::Internal("handler exploded".to_owned())),
            HandlerBehavior::NeverFinish => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

fn test_quantum(quantum_seconds: u32) -> TaskQuantum {
    TaskQuantum::new(TaskQuantumInput {
        task_id: "T1".to_owned(),
        run_id: "R1".to_owned(),
        quantum_seconds,
        payload: json!({"endpoint": "https://dispatch.example/hooks/t1"}),
    })
    .unwrap_or_else(|_| unreachable!())
}

fn executor(
    coordinator: &Arc<FakeLeaseCoordinator>,
    handler: &Arc<FakeQuantumHandler>,
    lease_seconds: u32,
) -> QuantumExecutor {
    QuantumExecutor::new(
        Arc::clone(coordinator) as Arc<dyn LeaseCoordinator>,
        Arc::clone(handler) as Arc<dyn QuantumHandler>,
        "worker-1",
        lease_seconds,
    )
    .unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn completed_quantum_releases_lease() {
    let coordinator = Arc::new(FakeLeaseCoordinator::default());
    let handler = Arc::new(FakeQuantumHandler::new(HandlerBehavior::Succeed));
    let executor = executor(&coordinator, &handler, 30);

    let outcome = executor.execute_quantum(test_quantum(30)).await;

    assert_eq!(outcome.unwrap_or(QuantumOutcome::Denied), QuantumOutcome::Completed);
    assert_eq!(handler.executions().await, 1);
    assert!(!coordinator.holds_key("lease:T1:R1").await);
}

#[tokio::test]
async fn denied_quantum_never_invokes_handler() {
    let coordinator = Arc::new(FakeLeaseCoordinator::default());
    coordinator.seed_foreign_lease("lease:T1:R1").await;
    let handler = Arc::new(FakeQuantumHandler::new(HandlerBehavior::Succeed));
    let executor = executor(&coordinator, &handler, 30);

    let outcome = executor.execute_quantum(test_quantum(30)).await;

    assert_eq!(outcome.unwrap_or(QuantumOutcome::Completed), QuantumOutcome::Denied);
    assert_eq!(handler.executions().await, 0);
    assert!(coordinator.holds_key("lease:T1:R1").await);
}

#[tokio::test]
async fn handler_error_propagates_after_release() {
    let coordinator = Arc::new(FakeLeaseCoordinator::default());
    let handler = Arc::new(FakeQuantumHandler::new(HandlerBehavior::Fail));
    let executor = executor(&coordinator, &handler, 30);

    let outcome = executor.execute_quantum(test_quantum(30)).await;

    assert!(outcome.is_err());
    assert!(!coordinator.holds_key("lease:T1:R1").await);
}

#[tokio::test]
async fn unreachable_store_fails_closed() {
    let coordinator = Arc::new(FakeLeaseCoordinator {
        fail_acquire: true,
        ..FakeLeaseCoordinator::default()
    });
    let handler = Arc::new(FakeQuantumHandler::new(HandlerBehavior::Succeed));
    let executor = executor(&coordinator, &handler, 30);

    let outcome = executor.execute_quantum(test_quantum(30)).await;

    assert_eq!(outcome.unwrap_or(QuantumOutcome::Completed), QuantumOutcome::Denied);
    assert_eq!(handler.executions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_times_out_and_releases() {
    let coordinator = Arc::new(FakeLeaseCoordinator::default());
    let handler = Arc::new(FakeQuantumHandler::new(HandlerBehavior::NeverFinish));
    let executor = executor(&coordinator, &handler, 60);

    let outcome = executor.execute_quantum(test_quantum(5)).await;

    assert_eq!(outcome.unwrap_or(QuantumOutcome::Denied), QuantumOutcome::TimedOut);
    assert_eq!(handler.executions().await, 1);
    assert!(!coordinator.holds_key("lease:T1:R1").await);
}

#[tokio::test(start_paused = true)]
async fn lost_ownership_cancels_running_handler() {
    let coordinator = Arc::new(FakeLeaseCoordinator {
        lose_ownership_on_extend: true,
        ..FakeLeaseCoordinator::default()
    });
    let handler = Arc::new(FakeQuantumHandler::new(HandlerBehavior::NeverFinish));
    let executor = executor(&coordinator, &handler, 60);

    let outcome = executor.execute_quantum(test_quantum(600)).await;

    assert_eq!(outcome.unwrap_or(QuantumOutcome::Denied), QuantumOutcome::LeaseLost);
    assert_eq!(handler.executions().await, 1);
}

#[tokio::test]
async fn zero_lease_window_is_rejected() {
    let coordinator = Arc::new(FakeLeaseCoordinator::default());
    let handler = Arc::new(FakeQuantumHandler::new(HandlerBehavior::Succeed));

    let executor = QuantumExecutor::new(
        Arc::clone(&coordinator) as Arc<dyn LeaseCoordinator>,
        Arc::clone(&handler) as Arc<dyn QuantumHandler>,
        "worker-1",
        0,
    );

    assert!(executor.is_err());
}
