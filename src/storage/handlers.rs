use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
};
use std::sync::Arc;
use std::time::Duration;

use super::node::StoreNode;
use super::protocol::{
    EvalRequest, GetRequest, IncrRequest, InitRequest, LeaseAcquireRequest, LeaseReleaseRequest,
    StoreReply,
};
use super::store::StockStore;
use crate::error::StoreError;
use crate::storage::keys::CounterKey;

fn reply(result: Result<i64, StoreError>) -> (StatusCode, Json<StoreReply>) {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(StoreError::MissingKey(_)) => StatusCode::NOT_FOUND,
        Err(StoreError::Rejected(_)) => StatusCode::BAD_REQUEST,
        Err(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Err(StoreError::Protocol(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(StoreReply { result }))
}

fn check_auth(node: &StoreNode, headers: &HeaderMap) -> Result<(), (StatusCode, Json<StoreReply>)> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    node.authorize(header).map_err(|e| {
        tracing::warn!("Rejected unauthenticated store request");
        (StatusCode::UNAUTHORIZED, Json(StoreReply { result: Err(e) }))
    })
}

pub async fn handle_get(
    Extension(node): Extension<Arc<StoreNode>>,
    headers: HeaderMap,
    Json(req): Json<GetRequest>,
) -> (StatusCode, Json<StoreReply>) {
    if let Err(denied) = check_auth(&node, &headers) {
        return denied;
    }
    reply(node.database(req.db).get(&req.key).await)
}

pub async fn handle_init(
    Extension(node): Extension<Arc<StoreNode>>,
    headers: HeaderMap,
    Json(req): Json<InitRequest>,
) -> (StatusCode, Json<StoreReply>) {
    if let Err(denied) = check_auth(&node, &headers) {
        return denied;
    }

    let InitRequest { db, op_id, entries } = req;
    let entries: Vec<(CounterKey, i64)> = entries
        .into_iter()
        .map(|entry| (entry.key, entry.value))
        .collect();
    let store = node.database(db);
    let result = node
        .apply_once(&op_id, || async move {
            store
                .init_all(&entries)
                .await
                .map(|_| entries.len() as i64)
        })
        .await;

    if let Err(e) = &result {
        tracing::error!("Batch init failed: {}", e);
    }
    reply(result)
}

pub async fn handle_incr(
    Extension(node): Extension<Arc<StoreNode>>,
    headers: HeaderMap,
    Json(req): Json<IncrRequest>,
) -> (StatusCode, Json<StoreReply>) {
    if let Err(denied) = check_auth(&node, &headers) {
        return denied;
    }

    let IncrRequest {
        db,
        op_id,
        key,
        delta,
    } = req;
    let store = node.database(db);
    let result = node
        .apply_once(&op_id, || async move { store.incr_by(&key, delta).await })
        .await;
    reply(result)
}

pub async fn handle_eval(
    Extension(node): Extension<Arc<StoreNode>>,
    headers: HeaderMap,
    Json(req): Json<EvalRequest>,
) -> (StatusCode, Json<StoreReply>) {
    if let Err(denied) = check_auth(&node, &headers) {
        return denied;
    }

    let EvalRequest {
        db,
        op_id,
        script,
        keys,
    } = req;
    let store = node.database(db);
    let result = node
        .apply_once(&op_id, || async move { store.eval(&script, &keys).await })
        .await;
    reply(result)
}

pub async fn handle_lease_acquire(
    Extension(node): Extension<Arc<StoreNode>>,
    headers: HeaderMap,
    Json(req): Json<LeaseAcquireRequest>,
) -> (StatusCode, Json<StoreReply>) {
    if let Err(denied) = check_auth(&node, &headers) {
        return denied;
    }
    // The store rejects a zero or oversized TTL.
    match node
        .database(req.db)
        .try_lease(&req.name, &req.token, Duration::from_millis(req.ttl_ms))
        .await
    {
        Ok(granted) => (StatusCode::OK, Json(StoreReply::flag(granted))),
        Err(e) => reply(Err(e)),
    }
}

pub async fn handle_lease_release(
    Extension(node): Extension<Arc<StoreNode>>,
    headers: HeaderMap,
    Json(req): Json<LeaseReleaseRequest>,
) -> (StatusCode, Json<StoreReply>) {
    if let Err(denied) = check_auth(&node, &headers) {
        return denied;
    }

    match node.database(req.db).release_lease(&req.name, &req.token).await {
        Ok(released) => (StatusCode::OK, Json(StoreReply::flag(released))),
        Err(e) => reply(Err(e)),
    }
}
