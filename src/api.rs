use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use log::{error, info};
use serde_json::{json, Value};
use tokio::sync::mpsc::Sender;

use crate::{
    allocator::AllocatorError,
    service::{get_free_port, lookup_port, port_owner, AllocatorCommand},
};

type Reply = (StatusCode, Json<Value>);

pub fn router(tx: Sender<AllocatorCommand>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/users/:user/port", get(lookup).put(allocate))
        .route("/ports/:port", get(owner))
        .with_state(tx)
}

async fn allocate(
    State(tx): State<Sender<AllocatorCommand>>,
    Path(user): Path<String>,
) -> Reply {
    info!("Received port request for '{}'", user);
    match get_free_port(&user, &tx).await {
        Ok(port) => (StatusCode::OK, Json(json!({ "user": user, "port": port }))),
        Err(e) => error_reply(e),
    }
}

async fn lookup(
    State(tx): State<Sender<AllocatorCommand>>,
    Path(user): Path<String>,
) -> Reply {
    match lookup_port(&user, &tx).await {
        Ok(Some(port)) => (StatusCode::OK, Json(json!({ "user": user, "port": port }))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no port allocated for '{}'", user) })),
        ),
        Err(e) => error_reply(e),
    }
}

async fn owner(State(tx): State<Sender<AllocatorCommand>>, Path(port): Path<u16>) -> Reply {
    match port_owner(port, &tx).await {
        Ok(Some(user)) => (StatusCode::OK, Json(json!({ "user": user, "port": port }))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("port {} is not allocated", port) })),
        ),
        Err(e) => error_reply(e),
    }
}

fn status_for(e: &AllocatorError) -> StatusCode {
    match e {
        AllocatorError::EmptyUser => StatusCode::BAD_REQUEST,
        AllocatorError::PoolExhausted | AllocatorError::Unavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AllocatorError::Store(_) | AllocatorError::Record { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_reply(e: AllocatorError) -> Reply {
    let status = status_for(&e);
    if status.is_server_error() {
        error!("{}", e);
    }
    (status, Json(json!({ "error": e.to_string() })))
}
