use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info_span;
use uuid::Uuid;

use crate::api::handler_utils::{
    into_json, map_body_rejection, map_join_error, map_json_error, map_preview_error, ApiObject,
};
use crate::api::server::AppState;
use crate::preview::{ChainRequest, ProcessRequest};
use crate::registry::NodeSummary;

#[derive(Debug, Clone, Serialize)]
struct ApplyResponse {
    success: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ListNodesResponse {
    success: bool,
    count: usize,
    nodes: Vec<NodeSummary>,
}

pub async fn apply_handler() -> ApiObject<Value> {
    (StatusCode::OK, into_json(ApplyResponse { success: true }))
}

pub async fn process_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> ApiObject<Value> {
    let request = match parse_request::<ProcessRequest>(body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let request_id = Uuid::new_v4();
    let span = info_span!(
        "image_preview.process",
        %request_id,
        node_type = %request.node_type,
    );
    let service = state.preview.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        service.process(&request)
    })
    .await;

    match result {
        Ok(Ok(response)) => (StatusCode::OK, into_json(response)),
        Ok(Err(error)) => map_preview_error(error),
        Err(join_error) => map_join_error("preview processing task failed", join_error),
    }
}

pub async fn process_chain_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> ApiObject<Value> {
    let request = match parse_request::<ChainRequest>(body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let request_id = Uuid::new_v4();
    let span = info_span!(
        "image_preview.process_chain",
        %request_id,
        stages = request.chain.len(),
    );
    let service = state.preview.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        service.process_chain(&request)
    })
    .await;

    match result {
        Ok(Ok(response)) => (StatusCode::OK, into_json(response)),
        Ok(Err(error)) => map_preview_error(error),
        Err(join_error) => map_join_error("chain processing task failed", join_error),
    }
}

pub async fn list_nodes_handler(State(state): State<AppState>) -> ApiObject<Value> {
    let service = state.preview.clone();
    let result = tokio::task::spawn_blocking(move || service.resolver().list_nodes()).await;

    match result {
        Ok(nodes) => (
            StatusCode::OK,
            into_json(ListNodesResponse {
                success: true,
                count: nodes.len(),
                nodes,
            }),
        ),
        Err(join_error) => map_join_error("node listing task failed", join_error),
    }
}

// The body is read as JSON whatever Content-Type the client sent.
fn parse_request<T: DeserializeOwned>(
    body: Result<Bytes, BytesRejection>,
) -> Result<T, ApiObject<Value>> {
    let bytes = body.map_err(map_body_rejection)?;
    serde_json::from_slice::<T>(&bytes).map_err(map_json_error)
}
