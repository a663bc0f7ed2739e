//! HTTP status surface.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/components` | Registered workers and their published endpoint counts |
//! | GET | `/api/v1/components/{namespace}/{name}/endpoints` | Published endpoints of one component |
//! | GET | `/metrics` | Prometheus exposition |

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use outpost_controller::{Controller, WorkerState, render_prometheus};
use outpost_core::{ComponentId, DiscoveryKind};
use outpost_publish::{ComponentSummary, ServiceTable};

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<Controller>,
    pub table: Arc<ServiceTable>,
}

pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/components", get(list_components))
        .route("/components/{namespace}/{name}/endpoints", get(component_endpoints))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(prometheus_metrics).with_state(state))
}

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

#[derive(Debug, Serialize)]
struct ComponentView {
    component: String,
    kind: DiscoveryKind,
    state: WorkerState,
    generation: u64,
    probes: usize,
    endpoints: usize,
    routable: usize,
    revision: u64,
}

/// GET /api/v1/components
async fn list_components(State(state): State<ApiState>) -> impl IntoResponse {
    let mut published: HashMap<String, ComponentSummary> = state
        .table
        .list_components()
        .into_iter()
        .map(|s| (s.component.clone(), s))
        .collect();

    let views: Vec<ComponentView> = state
        .controller
        .status()
        .into_iter()
        .map(|status| {
            let summary = published.remove(&status.component);
            ComponentView {
                endpoints: summary.as_ref().map_or(0, |s| s.endpoints),
                routable: summary.as_ref().map_or(0, |s| s.routable),
                revision: summary.as_ref().map_or(0, |s| s.revision),
                component: status.component,
                kind: status.kind,
                state: status.state,
                generation: status.generation,
                probes: status.probes,
            }
        })
        .collect();

    ApiResponse::ok(views)
}

/// GET /api/v1/components/{namespace}/{name}/endpoints
async fn component_endpoints(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let id = ComponentId::new(namespace, name);
    match state.table.endpoints(&id) {
        Some(endpoints) => ApiResponse::ok(endpoints).into_response(),
        // Registered but nothing published yet.
        None if state.controller.contains(&id) => ApiResponse::ok(Vec::<()>::new()).into_response(),
        None => error_response("component not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// GET /metrics
async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = render_prometheus(&state.controller.metrics());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
