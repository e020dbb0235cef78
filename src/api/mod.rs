pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::db::store::SnapshotStore;
use crate::gateway::GatewayService;
use handlers::ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
    pub gateway: Arc<GatewayService>,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/devices/latest", get(handlers::get_latest_snapshots))
        .route(
            "/devices/{device_id}/history",
            get(handlers::get_device_history),
        )
        .route(
            "/devices/{device_id}/control",
            post(handlers::override_device),
        )
        .route("/devices/{device_id}/auto", post(handlers::resume_auto))
        .with_state(state)
        .split_for_parts();

    router.route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}
