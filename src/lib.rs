pub mod bkt;
pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::bkt::KnowledgeTracer;
use crate::state::AppState;

pub fn create_app(tracer: Arc<KnowledgeTracer>) -> Router {
    routes::router(AppState::new(tracer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
