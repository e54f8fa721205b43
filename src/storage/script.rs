//! Server-side atomic scripts.
//!
//! A script reads and writes counters through a [`ScriptContext`] that the store hands out
//! only while it excludes every other client, so the balance check and both halves of a
//! transfer are never interleaved with another operation.

use serde::{Deserialize, Serialize};

use super::keys::CounterKey;
use crate::error::StoreError;

/// Returned by [`AtomicScript::Transfer`] when stock moved.
pub const TRANSFER_MOVED: i64 = 1;
/// Returned by [`AtomicScript::Transfer`] when the source was short and nothing changed.
pub const TRANSFER_DECLINED: i64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "script", rename_all = "snake_case")]
pub enum AtomicScript {
    /// `KEYS = [from, to]`. Moves `amount` only if `from` holds at least `amount`.
    Transfer { amount: i64 },
}

/// Counter access granted to a running script.
pub trait ScriptContext {
    fn read(&self, key: &CounterKey) -> Option<i64>;
    fn write(&mut self, key: &CounterKey, value: i64);
}

impl AtomicScript {
    pub fn arity(&self) -> usize {
        match self {
            AtomicScript::Transfer { .. } => 2,
        }
    }

    /// Executes the script. Validation happens before the first write, so a script that
    /// returns an error has not mutated anything.
    pub fn execute<C: ScriptContext>(
        &self,
        keys: &[CounterKey],
        ctx: &mut C,
    ) -> Result<i64, StoreError> {
        if keys.len() != self.arity() {
            return Err(StoreError::Rejected(format!(
                "script expects {} keys, got {}",
                self.arity(),
                keys.len()
            )));
        }

        match self {
            AtomicScript::Transfer { amount } => {
                let amount = *amount;
                let (from, to) = (&keys[0], &keys[1]);
                if amount <= 0 {
                    return Err(StoreError::Rejected(format!(
                        "transfer amount must be positive, got {}",
                        amount
                    )));
                }
                if from == to {
                    return Err(StoreError::Rejected(format!(
                        "transfer source and destination are both {}",
                        from
                    )));
                }

                let from_balance = ctx
                    .read(from)
                    .ok_or_else(|| StoreError::MissingKey(from.clone()))?;
                let to_balance = ctx
                    .read(to)
                    .ok_or_else(|| StoreError::MissingKey(to.clone()))?;

                if from_balance < amount {
                    return Ok(TRANSFER_DECLINED);
                }

                let credited = to_balance.checked_add(amount).ok_or_else(|| {
                    StoreError::Rejected(format!("transfer would overflow {}", to))
                })?;
                ctx.write(from, from_balance - amount);
                ctx.write(to, credited);
                Ok(TRANSFER_MOVED)
            }
        }
    }
}
