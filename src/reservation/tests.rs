//! Reservation Module Tests
//!
//! ## Test Scopes
//! - **Selection**: weighted pick math, weighted and deterministic selectors, custom selectors.
//! - **Simple flow**: success, insufficient stock, exact success counts under contention.
//! - **Global fallback**: refill batch sizing, reserve exhaustion.
//! - **Failure paths**: lock contention, deadline, expired lease, declined transfer, store
//!   errors. Every failure must leave stock untouched and release every lock.

#[cfg(test)]
mod tests {
    use crate::error::{LockError, ReservationError, StoreError};
    use crate::lock::LockSettings;
    use crate::reservation::coordinator::ReservationCoordinator;
    use crate::reservation::selector::{
        DeterministicSelector, ShardSelector, WeightedSelector, pick_weighted,
    };
    use crate::reservation::types::*;
    use crate::storage::keys::{CounterKey, LockName, ShardId};
    use crate::storage::memory::MemoryStore;
    use crate::storage::partitioner::select_shard;
    use crate::storage::script::{AtomicScript, TRANSFER_DECLINED};
    use crate::storage::shard_store::ShardStore;
    use crate::storage::store::{MAX_LEASE_TTL, StockStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    const PRODUCT: &str = "product_1";

    // ============================================================
    // TEST HELPERS
    // ============================================================

    fn fast_lock() -> LockSettings {
        LockSettings {
            ttl: Duration::from_secs(1),
            attempts: 10_000,
            min_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(3),
        }
    }

    fn policy(selection: SelectionStrategy, global_fallback: bool, batch_size: i64) -> ReservationPolicy {
        ReservationPolicy {
            selection,
            global_fallback,
            batch_size,
            lock: fast_lock(),
            attempt_deadline: Duration::from_secs(5),
        }
    }

    async fn seeded(shards: &[i64], global: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut entries: Vec<(CounterKey, i64)> = shards
            .iter()
            .enumerate()
            .map(|(i, stock)| (CounterKey::shard(PRODUCT, ShardId(i as u32 + 1)), *stock))
            .collect();
        entries.push((CounterKey::global(PRODUCT), global));
        store.init_all(&entries).await.unwrap();
        store
    }

    async fn counter(store: &MemoryStore, key: CounterKey) -> i64 {
        store.get(&key).await.unwrap()
    }

    /// Always picks the same shard.
    struct FixedSelector(ShardId);

    #[async_trait]
    impl ShardSelector for FixedSelector {
        async fn select(
            &self,
            _requester_id: &str,
            _shards: &ShardStore,
        ) -> Result<Option<ShardId>, StoreError> {
            Ok(Some(self.0))
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    /// Delegates to a `MemoryStore`, optionally slowing reads or declining every transfer.
    struct FaultyStore {
        inner: Arc<MemoryStore>,
        read_delay: Duration,
        decline_transfers: bool,
    }

    #[async_trait]
    impl StockStore for FaultyStore {
        async fn get(&self, key: &CounterKey) -> Result<i64, StoreError> {
            if !self.read_delay.is_zero() {
                tokio::time::sleep(self.read_delay).await;
            }
            self.inner.get(key).await
        }

        async fn init_all(&self, entries: &[(CounterKey, i64)]) -> Result<(), StoreError> {
            self.inner.init_all(entries).await
        }

        async fn incr_by(&self, key: &CounterKey, delta: i64) -> Result<i64, StoreError> {
            self.inner.incr_by(key, delta).await
        }

        async fn eval(&self, script: &AtomicScript, keys: &[CounterKey]) -> Result<i64, StoreError> {
            if self.decline_transfers {
                return Ok(TRANSFER_DECLINED);
            }
            self.inner.eval(script, keys).await
        }

        async fn try_lease(
            &self,
            name: &LockName,
            token: &str,
            ttl: Duration,
        ) -> Result<bool, StoreError> {
            self.inner.try_lease(name, token, ttl).await
        }

        async fn release_lease(&self, name: &LockName, token: &str) -> Result<bool, StoreError> {
            self.inner.release_lease(name, token).await
        }
    }

    // ============================================================
    // SELECTION
    // ============================================================

    #[test]
    fn test_pick_weighted_walks_cumulative_ranges() {
        let candidates = vec![(ShardId(1), 2), (ShardId(3), 5), (ShardId(7), 1)];

        assert_eq!(pick_weighted(&candidates, 0), Some(ShardId(1)));
        assert_eq!(pick_weighted(&candidates, 1), Some(ShardId(1)));
        assert_eq!(pick_weighted(&candidates, 2), Some(ShardId(3)));
        assert_eq!(pick_weighted(&candidates, 6), Some(ShardId(3)));
        assert_eq!(pick_weighted(&candidates, 7), Some(ShardId(7)));
        assert_eq!(pick_weighted(&candidates, 99), Some(ShardId(7)));
        assert_eq!(pick_weighted(&[], 0), None);
    }

    #[tokio::test]
    async fn test_weighted_selector_only_picks_shards_with_stock() {
        let store = seeded(&[0, 5, 0], 0).await;
        let shards = ShardStore::new(store, PRODUCT, 3);

        for _ in 0..50 {
            let pick = WeightedSelector.select("anyone", &shards).await.unwrap();
            assert_eq!(pick, Some(ShardId(2)));
        }
    }

    #[tokio::test]
    async fn test_weighted_selector_reports_all_empty() {
        let store = seeded(&[0, 0], 3).await;
        let shards = ShardStore::new(store, PRODUCT, 2);

        assert_eq!(WeightedSelector.select("anyone", &shards).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_weighted_selector_fails_when_nothing_readable() {
        let shards = ShardStore::new(Arc::new(MemoryStore::new()), PRODUCT, 2);

        assert!(matches!(
            WeightedSelector.select("anyone", &shards).await,
            Err(StoreError::MissingKey(_))
        ));
    }

    #[tokio::test]
    async fn test_deterministic_selector_follows_hash() {
        let shards = ShardStore::new(Arc::new(MemoryStore::new()), PRODUCT, 10);

        let pick = DeterministicSelector.select("user_7", &shards).await.unwrap();

        assert_eq!(pick, Some(select_shard("user_7", 10)));
        assert_eq!(DeterministicSelector.name(), "deterministic");
    }

    #[tokio::test]
    async fn test_custom_selector_is_used() {
        let store = seeded(&[3, 3, 3], 0).await;
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            3,
            policy(SelectionStrategy::Deterministic, false, 5),
        )
        .with_selector(Arc::new(FixedSelector(ShardId(2))));

        for i in 0..3 {
            let reservation = coordinator.reserve(&format!("user_{}", i)).await.unwrap();
            assert_eq!(reservation.shard, Some(ShardId(2)));
        }

        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(1))).await, 3);
        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(2))).await, 0);
        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(3))).await, 3);
    }

    // ============================================================
    // SIMPLE FLOW
    // ============================================================

    #[tokio::test]
    async fn test_reserve_takes_one_unit() {
        // ARRANGE
        let store = seeded(&[4], 0).await;
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            1,
            ReservationPolicy::simple(),
        );

        // ACT
        let reservation = coordinator.reserve("user_1").await.unwrap();

        // ASSERT
        assert!(reservation.is_success());
        assert_eq!(reservation.shard, Some(ShardId(1)));
        assert_eq!(reservation.remaining, Some(3));
        assert_eq!(reservation.refilled, None);
        assert_eq!(store.live_lease_count(), 0, "Locks must be released");
    }

    #[tokio::test]
    async fn test_empty_shard_without_fallback_is_insufficient() {
        let store = seeded(&[0], 50).await;
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            1,
            ReservationPolicy::simple(),
        );

        let attempt = coordinator.attempt("user_1").await;

        assert_eq!(attempt.outcome, Outcome::InsufficientStock);
        assert!(attempt.error.is_none());
        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(1))).await, 0);
        assert_eq!(counter(&store, CounterKey::global(PRODUCT)).await, 50, "Reserve untouched");
        assert_eq!(store.live_lease_count(), 0);
    }

    #[tokio::test]
    async fn test_weighted_all_empty_without_fallback_skips_locking() {
        let store = seeded(&[0, 0, 0], 0).await;
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            3,
            policy(SelectionStrategy::Weighted, false, 5),
        );

        let attempt = coordinator.attempt("user_1").await;

        assert_eq!(attempt.outcome, Outcome::InsufficientStock);
        assert_eq!(attempt.chosen_shard, None);
        assert_eq!(attempt.last_state, AttemptState::Start);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_contended_shard_sells_exactly_its_stock() {
        // ARRANGE: 50 concurrent requesters against one shard holding 10 units
        let store = seeded(&[10], 0).await;
        let coordinator = Arc::new(ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            1,
            policy(SelectionStrategy::Deterministic, false, 5),
        ));

        // ACT
        let mut handles = Vec::new();
        for i in 0..50 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.attempt(&format!("user_{}", i)).await.outcome
            }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        // ASSERT
        let success = outcomes.iter().filter(|o| **o == Outcome::Success).count();
        let insufficient = outcomes
            .iter()
            .filter(|o| **o == Outcome::InsufficientStock)
            .count();
        assert_eq!(success, 10);
        assert_eq!(insufficient, 40);
        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(1))).await, 0);
        assert_eq!(store.live_lease_count(), 0);
    }

    // ============================================================
    // GLOBAL FALLBACK
    // ============================================================

    #[tokio::test]
    async fn test_depleted_shard_refills_one_batch() {
        let store = seeded(&[0], 7).await;
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            1,
            policy(SelectionStrategy::Deterministic, true, 5),
        );

        let attempt = coordinator.attempt("user_1").await;

        assert_eq!(attempt.outcome, Outcome::Success);
        assert_eq!(attempt.refilled, Some(5));
        assert_eq!(attempt.last_state, AttemptState::Decremented);
        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(1))).await, 4);
        assert_eq!(counter(&store, CounterKey::global(PRODUCT)).await, 2);
        assert_eq!(store.live_lease_count(), 0, "Shard and global locks released");
    }

    #[tokio::test]
    async fn test_refill_is_clamped_to_what_the_reserve_holds() {
        let store = seeded(&[0], 2).await;
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            1,
            policy(SelectionStrategy::Deterministic, true, 5),
        );

        let reservation = coordinator.reserve("user_1").await.unwrap();

        assert!(reservation.is_success());
        assert_eq!(reservation.refilled, Some(2));
        assert_eq!(reservation.remaining, Some(1));
        assert_eq!(counter(&store, CounterKey::global(PRODUCT)).await, 0);
    }

    #[tokio::test]
    async fn test_exhausted_reserve_is_insufficient() {
        let store = seeded(&[0, 0], 0).await;
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            2,
            ReservationPolicy::with_global_fallback(5),
        );

        let attempt = coordinator.attempt("user_1").await;

        // All shards looked empty, so the requester's hashed shard was tried.
        assert_eq!(attempt.outcome, Outcome::InsufficientStock);
        assert_eq!(attempt.chosen_shard, Some(select_shard("user_1", 2)));
        assert_eq!(attempt.last_state, AttemptState::LockedGlobal);
        assert_eq!(counter(&store, CounterKey::global(PRODUCT)).await, 0);
        assert_eq!(store.live_lease_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fallback_sells_shard_and_reserve_exactly() {
        // ARRANGE: 3 units in the shard plus 10 in the reserve, 30 requesters
        let store = seeded(&[3], 10).await;
        let coordinator = Arc::new(ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            1,
            policy(SelectionStrategy::Deterministic, true, 4),
        ));

        // ACT
        let mut handles = Vec::new();
        for i in 0..30 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.attempt(&format!("user_{}", i)).await
            }));
        }
        let mut success = 0;
        let mut refilled_units = 0;
        for handle in handles {
            let attempt = handle.await.unwrap();
            if attempt.outcome == Outcome::Success {
                success += 1;
            } else {
                assert_eq!(attempt.outcome, Outcome::InsufficientStock);
            }
            refilled_units += attempt.refilled.unwrap_or(0);
        }

        // ASSERT
        assert_eq!(success, 13);
        assert_eq!(refilled_units, 10, "The whole reserve moved in batches");
        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(1))).await, 0);
        assert_eq!(counter(&store, CounterKey::global(PRODUCT)).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_weighted_fallback_conserves_stock() {
        let store = seeded(&[2, 2, 2], 9).await;
        let coordinator = Arc::new(ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            3,
            policy(SelectionStrategy::Weighted, true, 3),
        ));

        let mut handles = Vec::new();
        for i in 0..40 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.attempt(&format!("user_{}", i)).await.outcome
            }));
        }
        let mut success = 0i64;
        for handle in handles {
            if handle.await.unwrap() == Outcome::Success {
                success += 1;
            }
        }

        let snapshot = coordinator.shards().snapshot().await.unwrap();
        assert!(success <= 15);
        assert_eq!(15 - success, snapshot.total());
        assert!(snapshot.min_counter() >= 0);
        assert_eq!(store.live_lease_count(), 0);
    }

    // ============================================================
    // FAILURE PATHS
    // ============================================================

    #[tokio::test]
    async fn test_held_shard_lock_is_lock_failure() {
        // ARRANGE: someone else holds the shard lock for a long time
        let store = seeded(&[5], 0).await;
        let mut quick = policy(SelectionStrategy::Deterministic, false, 5);
        quick.lock.attempts = 3;
        let coordinator = ReservationCoordinator::new(store.clone(), PRODUCT, 1, quick);
        let other = LockName::shard(PRODUCT, ShardId(1));
        assert!(store.try_lease(&other, "other-owner", Duration::from_secs(30)).await.unwrap());

        // ACT
        let attempt = coordinator.attempt("user_1").await;

        // ASSERT
        assert_eq!(attempt.outcome, Outcome::LockFailure);
        assert!(matches!(
            attempt.error,
            Some(ReservationError::Lock(LockError::Contended { .. }))
        ));
        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(1))).await, 5);
        assert_eq!(store.live_lease_count(), 1, "Only the other owner's lease remains");
    }

    #[tokio::test]
    async fn test_deadline_bounds_lock_wait() {
        let store = seeded(&[5], 0).await;
        let mut tight = policy(SelectionStrategy::Deterministic, false, 5);
        tight.attempt_deadline = Duration::from_millis(50);
        let coordinator = ReservationCoordinator::new(store.clone(), PRODUCT, 1, tight);
        let other = LockName::shard(PRODUCT, ShardId(1));
        assert!(store.try_lease(&other, "other-owner", Duration::from_secs(30)).await.unwrap());

        let attempt = coordinator.attempt("user_1").await;

        assert_eq!(attempt.outcome, Outcome::LockFailure);
        assert!(matches!(
            attempt.error,
            Some(ReservationError::DeadlineExceeded(_))
        ));
        assert!(attempt.elapsed < Duration::from_secs(2));
        assert_eq!(counter(&store, CounterKey::shard(PRODUCT, ShardId(1))).await, 5);
        assert_eq!(store.live_lease_count(), 1);
    }

    #[tokio::test]
    async fn test_lease_expired_before_decrement_is_not_applied() {
        // ARRANGE: reads outlast the lock TTL
        let inner = seeded(&[5], 0).await;
        let store = Arc::new(FaultyStore {
            inner: inner.clone(),
            read_delay: Duration::from_millis(60),
            decline_transfers: false,
        });
        let mut short = policy(SelectionStrategy::Deterministic, false, 5);
        short.lock.ttl = Duration::from_millis(20);
        let coordinator = ReservationCoordinator::new(store, PRODUCT, 1, short);

        // ACT
        let attempt = coordinator.attempt("user_1").await;

        // ASSERT
        assert_eq!(attempt.outcome, Outcome::LockFailure);
        assert!(matches!(
            attempt.error,
            Some(ReservationError::Lock(LockError::Expired { .. }))
        ));
        assert_eq!(counter(&inner, CounterKey::shard(PRODUCT, ShardId(1))).await, 5);
    }

    #[tokio::test]
    async fn test_declined_transfer_is_transfer_failure() {
        let inner = seeded(&[0], 10).await;
        let store = Arc::new(FaultyStore {
            inner: inner.clone(),
            read_delay: Duration::ZERO,
            decline_transfers: true,
        });
        let coordinator = ReservationCoordinator::new(
            store,
            PRODUCT,
            1,
            policy(SelectionStrategy::Deterministic, true, 5),
        );

        let attempt = coordinator.attempt("user_1").await;

        assert_eq!(attempt.outcome, Outcome::TransferFailure);
        assert!(matches!(
            attempt.error,
            Some(ReservationError::TransferDeclined { amount: 5, .. })
        ));
        assert_eq!(attempt.refilled, None);
        assert_eq!(counter(&inner, CounterKey::shard(PRODUCT, ShardId(1))).await, 0);
        assert_eq!(counter(&inner, CounterKey::global(PRODUCT)).await, 10);
        assert_eq!(inner.live_lease_count(), 0, "Both locks released");
    }

    #[tokio::test]
    async fn test_uninitialized_product_fails_under_lock() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            PRODUCT,
            4,
            ReservationPolicy::simple(),
        );

        let attempt = coordinator.attempt("user_1").await;

        assert_eq!(attempt.outcome, Outcome::TransferFailure);
        assert_eq!(attempt.last_state, AttemptState::LockedShard);
        match attempt.error {
            Some(ReservationError::Store { locked, source }) => {
                assert!(locked);
                assert!(matches!(source, StoreError::MissingKey(_)));
            }
            other => panic!("Expected store error, got {:?}", other),
        }
        assert_eq!(store.live_lease_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_fails_before_locking() {
        let coordinator = ReservationCoordinator::new(
            Arc::new(MemoryStore::new()),
            PRODUCT,
            2,
            ReservationPolicy::weighted(),
        );

        let attempt = coordinator.attempt("user_1").await;

        assert_eq!(attempt.outcome, Outcome::LockFailure);
        assert_eq!(attempt.last_state, AttemptState::Start);
        assert!(matches!(
            attempt.error,
            Some(ReservationError::Store { locked: false, .. })
        ));
    }

    // ============================================================
    // ERROR CLASSIFICATION
    // ============================================================

    #[test]
    fn test_error_outcomes() {
        let key = CounterKey::global(PRODUCT);
        let contended = ReservationError::Lock(LockError::Contended {
            name: LockName::global(PRODUCT),
            attempts: 3,
        });
        let declined = ReservationError::TransferDeclined {
            from: key.clone(),
            to: CounterKey::shard(PRODUCT, ShardId(1)),
            amount: 5,
        };
        let down_locked = ReservationError::Store {
            locked: true,
            source: StoreError::Unavailable("down".to_string()),
        };
        let down_unlocked = ReservationError::Store {
            locked: false,
            source: StoreError::MissingKey(key),
        };

        assert_eq!(contended.outcome(), Outcome::LockFailure);
        assert_eq!(
            ReservationError::DeadlineExceeded(Duration::from_secs(1)).outcome(),
            Outcome::LockFailure
        );
        assert_eq!(declined.outcome(), Outcome::TransferFailure);
        assert_eq!(down_locked.outcome(), Outcome::TransferFailure);
        assert_eq!(down_unlocked.outcome(), Outcome::LockFailure);

        assert!(contended.is_retryable());
        assert!(declined.is_retryable());
        assert!(!down_locked.is_retryable());

        assert!(down_locked.is_store_unavailable());
        assert!(!down_unlocked.is_store_unavailable());
        assert!(
            ReservationError::Lock(LockError::Store(StoreError::Unavailable("x".into())))
                .is_store_unavailable()
        );
    }

    #[test]
    fn test_policy_validation() {
        assert!(ReservationPolicy::simple().validate().is_ok());
        assert!(ReservationPolicy::with_global_fallback(0).validate().is_err());

        let mut no_attempts = ReservationPolicy::weighted();
        no_attempts.lock.attempts = 0;
        assert!(no_attempts.validate().is_err());

        let mut no_ttl = ReservationPolicy::simple();
        no_ttl.lock.ttl = Duration::ZERO;
        assert!(no_ttl.validate().is_err());

        let mut endless = ReservationPolicy::simple();
        endless.lock.ttl = MAX_LEASE_TTL + Duration::from_secs(1);
        assert!(endless.validate().is_err());
        endless.lock.ttl = MAX_LEASE_TTL;
        assert!(endless.validate().is_ok());

        let fallback = ReservationPolicy::with_global_fallback(5);
        assert!(fallback.global_fallback);
        assert_eq!(fallback.selection, SelectionStrategy::Weighted);
    }
}
