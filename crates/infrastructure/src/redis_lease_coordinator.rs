//! Redis-backed distributed lease coordinator.

use async_trait::async_trait;
use quantarun_application::LeaseCoordinator;
use quantarun_core::{AppError, AppResult};
use quantarun_domain::Lease;
use redis::{AsyncCommands, Script};

// Guarded mutations compare the stored token so a stale holder can never
// delete or extend a lease that was re-acquired after its TTL lapsed.
const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const EXTEND_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Redis implementation of the lease coordination port.
#[derive(Clone)]
pub struct RedisLeaseCoordinator {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLeaseCoordinator {
    /// Creates one coordinator adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, resource_key: &str) -> String {
        format!("{}:{resource_key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to connect to lease store: {error}"))
            })
    }
}

fn validate_acquisition(resource_key: &str, holder_id: &str, ttl_seconds: u32) -> AppResult<()> {
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

    Ok(())
}

#[async_trait]
impl LeaseCoordinator for RedisLeaseCoordinator {
    async fn try_acquire(
        &self,
        resource_key: &str,
        holder_id: &str,
        ttl_seconds: u32,
    ) -> AppResult<Option<Lease>> {
        validate_acquisition(resource_key, holder_id, ttl_seconds)?;

        let key = self.key_for(resource_key);
        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
        let mut connection = self.connection().await?;

        let acquired: bool = connection
            .set_nx(key.as_str(), token.as_str())
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to acquire lease: {error}")))?;

        if !acquired {
            return Ok(None);
        }

        connection
            .expire::<_, ()>(key.as_str(), i64::from(ttl_seconds))
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to set lease ttl: {error}")))?;

        Lease::new(resource_key, holder_id, token, ttl_seconds).map(Some)
    }

    async fn release(&self, lease: &Lease) -> AppResult<()> {
        let key = self.key_for(lease.resource_key());
        let script = Script::new(RELEASE_LEASE_SCRIPT);
        let mut connection = self.connection().await?;

        script
            .key(key)
            .arg(lease.token())
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to release lease: {error}")))?;

        Ok(())
    }

    async fn extend(&self, lease: &Lease, ttl_seconds: u32) -> AppResult<bool> {
        if ttl_seconds == 0 {
            return Err(AppError::Validation(
                "lease ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        let key = self.key_for(lease.resource_key());
        let script = Script::new(EXTEND_LEASE_SCRIPT);
        let mut connection = self.connection().await?;

        let extended = script
            .key(key)
            .arg(lease.token())
            .arg(i64::from(ttl_seconds))
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to extend lease: {error}")))?;

        Ok(extended > 0)
    }
}
