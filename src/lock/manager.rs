use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::LockError;
use crate::storage::keys::LockName;
use crate::storage::store::StockStore;

/// Acquisition budget and lease duration.
#[derive(Debug, Clone)]
pub struct LockSettings {
    /// Maximum time a holder can keep others out.
    pub ttl: Duration,
    /// Number of set-if-absent attempts before giving up.
    pub attempts: u32,
    pub min_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(200),
            attempts: 32,
            min_retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_millis(50),
        }
    }
}

/// Proof of a (possibly) held lock: the name and the owner token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub name: LockName,
    pub token: String,
    pub ttl: Duration,
    pub minted_at: Instant,
}

impl LockLease {
    /// True once the TTL has run out, after which another owner may hold the lock.
    pub fn is_expired(&self) -> bool {
        self.minted_at.elapsed() >= self.ttl
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn StockStore>,
    settings: LockSettings,
}

impl LockManager {
    pub fn new(store: Arc<dyn StockStore>, settings: LockSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Creates a fresh owner token for `name` without touching the store.
    ///
    /// Callers that must release on every path record the lease before acquiring it:
    /// releasing a lease that was never granted is a harmless no-op.
    pub fn mint(&self, name: &LockName, ttl: Duration) -> LockLease {
        LockLease {
            name: name.clone(),
            token: Uuid::new_v4().to_string(),
            ttl,
            minted_at: Instant::now(),
        }
    }

    /// Acquires `name` for at most `ttl`.
    pub async fn acquire(&self, name: &LockName, ttl: Duration) -> Result<LockLease, LockError> {
        let mut lease = self.mint(name, ttl);
        self.acquire_lease(&mut lease).await?;
        Ok(lease)
    }

    /// Acquires with the default TTL.
    pub async fn lock(&self, name: &LockName) -> Result<LockLease, LockError> {
        self.acquire(name, self.settings.ttl).await
    }

    /// Tries to take a previously minted lease within the attempt budget.
    pub async fn acquire_lease(&self, lease: &mut LockLease) -> Result<(), LockError> {
        let attempts = self.settings.attempts.max(1);

        for attempt in 0..attempts {
            // The store starts the TTL no earlier than this.
            let requested_at = Instant::now();
            if self
                .store
                .try_lease(&lease.name, &lease.token, lease.ttl)
                .await?
            {
                lease.minted_at = requested_at;
                tracing::trace!("Acquired {} on attempt {}", lease.name, attempt + 1);
                return Ok(());
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }

        tracing::warn!("Gave up on {} after {} attempts", lease.name, attempts);
        Err(LockError::Contended {
            name: lease.name.clone(),
            attempts,
        })
    }

    /// Releases `lease`. Releasing a lease that expired or was never granted succeeds.
    pub async fn release(&self, lease: &LockLease) -> Result<(), LockError> {
        self.release_token(&lease.name, &lease.token).await
    }

    pub async fn release_token(&self, name: &LockName, token: &str) -> Result<(), LockError> {
        let released = self.store.release_lease(name, token).await?;
        if released {
            tracing::trace!("Released {}", name);
        } else {
            tracing::trace!("Release of {} was a no-op", name);
        }
        Ok(())
    }

    fn retry_delay(&self) -> Duration {
        let min = self.settings.min_retry_delay;
        let max = self.settings.max_retry_delay.max(min);
        if min == max {
            return min;
        }
        let mut rng = rand::thread_rng();
        Duration::from_micros(rng.gen_range(min.as_micros() as u64..=max.as_micros() as u64))
    }
}
