//! HTTP client for a [`super::node::StoreNode`].
//!
//! Transport failures are retried with exponential backoff and jitter. Mutating requests
//! reuse the same `op_id` across retries, so the node applies each of them at most once.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use super::keys::{CounterKey, LockName};
use super::memory::duration_ms;
use super::protocol::*;
use super::script::AtomicScript;
use super::store::StockStore;
use crate::error::StoreError;

pub struct RemoteStore {
    http_client: reqwest::Client,
    base_url: String,
    db: u32,
    auth_token: Option<String>,
    timeout: Duration,
    attempts: usize,
}

impl RemoteStore {
    pub fn new(
        endpoint: &str,
        db: u32,
        auth_token: Option<String>,
        timeout: Duration,
        attempts: usize,
    ) -> Self {
        let cleaned = endpoint.trim_end_matches('/');
        let base_url = if cleaned.starts_with("http://") || cleaned.starts_with("https://") {
            cleaned.to_string()
        } else {
            format!("http://{}", cleaned)
        };

        Self {
            http_client: reqwest::Client::new(),
            base_url,
            db,
            auth_token,
            timeout,
            attempts: attempts.max(1),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        endpoint: &str,
        payload: &T,
    ) -> Result<reqwest::Response, StoreError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut delay_ms = 50u64;

        for attempt in 0..self.attempts {
            let mut request = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout);
            if let Some(token) = &self.auth_token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(StoreError::Unavailable(e.to_string()));
                    }
                    tracing::debug!("Store request to {} failed ({}), retrying", url, e);
                    let jitter = rand::random::<u64>() % 25;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(800);
                }
            }
        }

        Err(StoreError::Unavailable("retry attempts exhausted".to_string()))
    }

    async fn call<T: Serialize>(&self, endpoint: &str, payload: &T) -> Result<i64, StoreError> {
        let response = self.post_with_retry(endpoint, payload).await?;
        let status = response.status();

        match response.json::<StoreReply>().await {
            Ok(reply) => reply.result,
            Err(e) => Err(StoreError::Protocol(format!(
                "undecodable reply from {} (status {}): {}",
                endpoint, status, e
            ))),
        }
    }
}

fn new_op_id() -> String {
    Uuid::new_v4().to_string()
}

#[async_trait]
impl StockStore for RemoteStore {
    async fn get(&self, key: &CounterKey) -> Result<i64, StoreError> {
        let payload = GetRequest {
            db: self.db,
            key: key.clone(),
        };
        self.call(ENDPOINT_GET, &payload).await
    }

    async fn init_all(&self, entries: &[(CounterKey, i64)]) -> Result<(), StoreError> {
        let payload = InitRequest {
            db: self.db,
            op_id: new_op_id(),
            entries: entries
                .iter()
                .map(|(key, value)| CounterEntry {
                    key: key.clone(),
                    value: *value,
                })
                .collect(),
        };
        self.call(ENDPOINT_INIT, &payload).await.map(|_| ())
    }

    async fn incr_by(&self, key: &CounterKey, delta: i64) -> Result<i64, StoreError> {
        let payload = IncrRequest {
            db: self.db,
            op_id: new_op_id(),
            key: key.clone(),
            delta,
        };
        self.call(ENDPOINT_INCR, &payload).await
    }

    async fn eval(&self, script: &AtomicScript, keys: &[CounterKey]) -> Result<i64, StoreError> {
        let payload = EvalRequest {
            db: self.db,
            op_id: new_op_id(),
            script: script.clone(),
            keys: keys.to_vec(),
        };
        self.call(ENDPOINT_EVAL, &payload).await
    }

    async fn try_lease(
        &self,
        name: &LockName,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let payload = LeaseAcquireRequest {
            db: self.db,
            name: name.clone(),
            token: token.to_string(),
            ttl_ms: duration_ms(ttl),
        };
        self.call(ENDPOINT_LEASE_ACQUIRE, &payload)
            .await
            .map(|granted| granted == 1)
    }

    async fn release_lease(&self, name: &LockName, token: &str) -> Result<bool, StoreError> {
        let payload = LeaseReleaseRequest {
            db: self.db,
            name: name.clone(),
            token: token.to_string(),
        };
        self.call(ENDPOINT_LEASE_RELEASE, &payload)
            .await
            .map(|released| released == 1)
    }
}
