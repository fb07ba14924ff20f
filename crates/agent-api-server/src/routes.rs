use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use std::any::Any;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::error;

use crate::config::CorsConfig;
use crate::handlers;
use crate::state::AppState;
use crate::utils::error::ApiError;

/// Multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.settings.upload.max_file_size_bytes + MULTIPART_OVERHEAD_BYTES;

    let agent_routes = Router::new()
        .route("/invoke", post(handlers::agent::invoke_handler))
        .route("/stream", get(handlers::agent::stream_handler))
        .route("/session/{sessionId}", delete(handlers::agent::clear_session_handler))
        .route("/session/{sessionId}/history", get(handlers::agent::history_handler))
        .route("/config", get(handlers::agent::config_handler));

    let rag_routes = Router::new()
        .route("/search", post(handlers::rag::search_handler))
        .route("/documents/search", post(handlers::rag::documents_search_handler))
        .route("/session/{sessionId}", delete(handlers::rag::clear_session_handler))
        .route("/session/{sessionId}/history", get(handlers::rag::history_handler));

    let document_routes = Router::new()
        .route("/upload", post(handlers::documents::upload_handler))
        .route("/{documentId}", delete(handlers::documents::delete_handler))
        .route("/{documentId}/reindex", post(handlers::documents::reindex_handler));

    Router::new()
        .route("/", get(handlers::health::index))
        .route("/api/health", get(handlers::health::health_check))
        .nest("/api/agent", agent_routes)
        .nest("/api/rag", rag_routes)
        .nest("/api/documents", document_routes)
        .fallback(not_found)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(build_cors_layer(&state.settings.cors))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CatchPanicLayer::custom(panic_response))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Endpoint not found".to_string())
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", detail);

    ApiError::Internal {
        message: "Internal server error".to_string(),
        details: None,
    }
    .into_response()
}

/// `*` allows any origin without credentials; a comma separated list enables credentials.
pub fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("data-tracking"),
            HeaderName::from_static("form-name"),
        ]);

    let origins: Vec<HeaderValue> = config
        .origin
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty() && *origin != "*")
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if config.origin.trim() == "*" || origins.is_empty() {
        layer.allow_origin(AnyOrigin)
    } else {
        layer
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}
