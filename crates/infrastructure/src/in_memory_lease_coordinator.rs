use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use quantarun_application::LeaseCoordinator;
use quantarun_core::{AppError, AppResult};
use quantarun_domain::Lease;
use tokio::sync::RwLock;
use tokio::time::Instant;


#[derive(Debug, Clone)]
struct LeaseEntry {
    token: String,
    expires_at: Instant,
}

/// In-memory lease coordinator for tests and single-process deployments.
///
/// Expired entries are overwritten lazily on the next acquisition attempt;
/// nothing sweeps the map in the background.
#[derive(Default)]
pub struct InMemoryLeaseCoordinator {
    entries: RwLock<HashMap<String, LeaseEntry>>,
}

impl InMemoryLeaseCoordinator {
    /// Creates an empty in-memory coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseCoordinator for InMemoryLeaseCoordinator {
    async fn try_acquire(
        &self,
        resource_key: &str,
        holder_id: &str,
        ttl_seconds: u32,
    ) -> AppResult<Option<Lease>> {
        if resource_key.trim().is_empty() {
            return Err(AppError::Validation(
                "lease resource_key must not be empty".to_owned(),
            ));
        }

        if holder_id.trim().is_empty() {
            return Err(AppError::Validation(
                "lease holder_id must not be empty".to_owned(),
            ));
        }

        if ttl_seconds == 0 {
            return Err(AppError::Validation(
                "lease ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if entries
            .get(resource_key)
            .is_some_and(|entry| entry.expires_at > now)
        {
            return Ok(None);
        }

        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
        entries.insert(
            resource_key.to_owned(),
            LeaseEntry {
                token: token.clone(),
                expires_at: now + Duration::from_secs(u64::from(ttl_seconds)),
            },
        );

        Lease::new(resource_key, holder_id, token, ttl_seconds).map(Some)
    }

    async fn release(&self, lease: &Lease) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        if entries
            .get(lease.resource_key())
            .is_some_and(|entry| entry.token == lease.token())
        {
            entries.remove(lease.resource_key());
        }

        Ok(())
    }

    async fn extend(&self, lease: &Lease, ttl_seconds: u32) -> AppResult<bool> {
        if ttl_seconds == 0 {
            return Err(AppError::Validation(
                "lease ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        let now = Instant::now();
        let mut entries = self.entries.write().await;

        match entries.get_mut(lease.resource_key()) {
            Some(entry) if entry.token == lease.token() && entry.expires_at > now => {
                entry.expires_at = now + Duration::from_secs(u64::from(ttl_seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
