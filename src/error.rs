//! Error taxonomy shared by the store, lock and reservation layers.
//!
//! Business outcomes (`Success`, `InsufficientStock`) are not errors; they travel in
//! [`crate::reservation::types::Reservation`]. Everything here is a failed attempt.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::reservation::types::Outcome;
use crate::storage::keys::{CounterKey, LockName};

/// Failures raised by a [`crate::storage::store::StockStore`] implementation.
///
/// Serializable so the store node can hand the exact failure back to a remote client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (network, timeout, node down).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A counter that should have been initialized does not exist.
    #[error("missing key: {0}")]
    MissingKey(CounterKey),

    /// The store refused the request (bad credential, invalid arguments).
    #[error("store rejected request: {0}")]
    Rejected(String),

    /// The store answered with something the client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failures of the distributed lock manager.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    /// Every acquisition attempt found the lock held by someone else.
    #[error("lock {name} still held after {attempts} attempts")]
    Contended { name: LockName, attempts: u32 },

    /// The lease ran out before the protected work finished; another owner may hold it now.
    #[error("lease on {name} expired before the critical section finished")]
    Expired { name: LockName },

    #[error("lock store failure: {0}")]
    Store(#[from] StoreError),
}

/// Why a reservation attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReservationError {
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The attempt ran past its overall deadline and was abandoned.
    #[error("attempt abandoned after {0:?}")]
    DeadlineExceeded(Duration),

    /// The atomic transfer script found the source short and moved nothing.
    #[error("transfer of {amount} from {from} to {to} declined")]
    TransferDeclined {
        from: CounterKey,
        to: CounterKey,
        amount: i64,
    },

    /// A store call failed. `locked` tells whether a lock was held at the time.
    #[error("store failure (lock held: {locked}): {source}")]
    Store {
        locked: bool,
        #[source]
        source: StoreError,
    },
}

impl ReservationError {
    /// Terminal outcome this failure is reported as.
    pub fn outcome(&self) -> Outcome {
        match self {
            ReservationError::Lock(_) | ReservationError::DeadlineExceeded(_) => {
                Outcome::LockFailure
            }
            ReservationError::TransferDeclined { .. } => Outcome::TransferFailure,
            ReservationError::Store { locked: true, .. } => Outcome::TransferFailure,
            ReservationError::Store { locked: false, .. } => Outcome::LockFailure,
        }
    }

    /// True for failures that left stock untouched and may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReservationError::Lock(_)
            | ReservationError::DeadlineExceeded(_)
            | ReservationError::TransferDeclined { .. } => true,
            ReservationError::Store { .. } => false,
        }
    }

    /// True when the store itself was unreachable, as opposed to a business or lock outcome.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            ReservationError::Store {
                source: StoreError::Unavailable(_),
                ..
            } | ReservationError::Lock(LockError::Store(StoreError::Unavailable(_)))
        )
    }
}
