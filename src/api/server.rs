use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::routes::{route_catalog, RouteDefinition};
use crate::config::BridgeSettings;
use crate::contract::HttpMethod;
use crate::host::SharedHostEnvironment;
use crate::notify::BroadcastNotifier;
use crate::preview::{preview_module, PreviewService};
use crate::registry::NodeResolver;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub route_count: usize,
    pub preview: Arc<PreviewService>,
    pub notifier: BroadcastNotifier,
}

impl AppState {
    pub fn new(route_count: usize, preview: Arc<PreviewService>, notifier: BroadcastNotifier) -> Self {
        Self {
            service_name: "preview-bridge",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            route_count,
            preview,
            notifier,
        }
    }
}

pub fn build_router(host: SharedHostEnvironment, settings: &BridgeSettings) -> Router {
    let notifier = BroadcastNotifier::new(settings.push.channel_capacity);
    host.load_module(preview_module(Arc::new(notifier.clone()), settings));

    let preview = Arc::new(PreviewService::new(NodeResolver::new(host), settings));
    build_router_with_service(preview, notifier, settings.max_body_bytes)
}

pub fn build_router_with_service(
    preview: Arc<PreviewService>,
    notifier: BroadcastNotifier,
    max_body_bytes: usize,
) -> Router {
    let catalog = route_catalog();
    let state = AppState::new(catalog.len(), preview, notifier);
    build_router_with_catalog(catalog, state, max_body_bytes)
}

fn build_router_with_catalog(
    catalog: Vec<RouteDefinition>,
    state: AppState,
    max_body_bytes: usize,
) -> Router {
    let mut router = Router::new();

    for route in catalog {
        let path = route.spec.path.clone();
        let Some(method_router) = method_router_for(&route) else {
            warn!(route = %route.spec, handler_id = %route.handler_id, "route has no handler; skipping");
            continue;
        };
        router = router.route(path.as_str(), method_router);
    }

    router
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    addr: SocketAddr,
    host: SharedHostEnvironment,
    settings: BridgeSettings,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(host, &settings);
    info!(bind = %addr, "starting preview-bridge HTTP surface");
    axum::serve(listener, app).await
}

fn method_router_for(route: &RouteDefinition) -> Option<MethodRouter<AppState>> {
    let method_router = match (route.spec.method, route.spec.path.as_str()) {
        (HttpMethod::Get, "/health") => get(health_handler),
        (HttpMethod::Post, "/image_preview/apply") => {
            post(crate::api::image_preview::apply_handler)
        }
        (HttpMethod::Post, "/image_preview/process") => {
            post(crate::api::image_preview::process_handler)
        }
        (HttpMethod::Post, "/image_preview/process_chain") => {
            post(crate::api::image_preview::process_chain_handler)
        }
        (HttpMethod::Get, "/image_preview/nodes") => {
            get(crate::api::image_preview::list_nodes_handler)
        }
        (HttpMethod::Get, "/image_preview/ws") => get(crate::api::ws::preview_ws_handler),
        _ => return None,
    };
    Some(method_router)
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "success": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "route_count": state.route_count,
            "preview_subscribers": state.notifier.subscriber_count(),
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
