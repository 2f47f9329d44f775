use chrono::{DateTime, Duration, Utc};
use quantarun_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Exclusive, time-bounded claim on one resource key.
///
/// At most one unexpired lease may exist per resource key; the backing
/// store enforces that invariant at acquisition time. The token is unique
/// per acquisition and guards release and extension against stale holders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    resource_key: NonEmptyString,
    holder_id: NonEmptyString,
    token: NonEmptyString,
    acquired_at: DateTime<Utc>,
    ttl_seconds: u32,
}

impl Lease {
    /// Creates a validated lease record for one successful acquisition.
    pub fn new(
        resource_key: impl Into<String>,
        holder_id: impl Into<String>,
        token: impl Into<String>,
        ttl_seconds: u32,
    ) -> AppResult<Self> {
        if ttl_seconds == 0 {
            return Err(AppError::Validation(
                "lease ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            resource_key: NonEmptyString::new(resource_key)?,
            holder_id: NonEmptyString::new(holder_id)?,
            token: NonEmptyString::new(token)?,
            acquired_at: Utc::now(),
            ttl_seconds,
        })
    }

    /// Returns the contested resource key.
    #[must_use]
    pub fn resource_key(&self) -> &str {
        self.resource_key.as_str()
    }

    /// Returns the owning process identity.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        self.holder_id.as_str()
    }

    /// Returns the per-acquisition fencing token.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Returns the acquisition timestamp.
    #[must_use]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Returns the lease validity window in seconds.
    #[must_use]
    pub fn ttl_seconds(&self) -> u32 {
        self.ttl_seconds
    }

    /// Returns the expiry deadline implied by the last known TTL.
    ///
    /// The backing store owns the authoritative deadline; this value is
    /// only a local estimate for logging and diagnostics.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + Duration::seconds(i64::from(self.ttl_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::Lease;

    #[test]
    fn lease_rejects_zero_ttl() {
        let lease = Lease::new("lease:T1:R1", "worker-1", "worker-1:token", 0);
        assert!(lease.is_err());
    }

    #[test]
    fn lease_rejects_blank_resource_key() {
        let lease = Lease::new("  ", "worker-1", "worker-1:token", 30);
        assert!(lease.is_err());
    }

    #[test]
    fn lease_expiry_follows_ttl() {
        let Ok(lease) = Lease::new("lease:T1:R1", "worker-1", "worker-1:token", 120) else {
            panic!("lease construction failed");
        };
        let window = lease.expires_at() - lease.acquired_at();
        assert_eq!(window.num_seconds(), 120);
    }
}
