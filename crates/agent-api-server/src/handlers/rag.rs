use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use tracing::info;

use super::agent::{
    agent_session_history, body_rejection, clear_agent_session, invoke_agent, non_blank,
    parse_options,
};
use crate::models::{
    AgentInvokeData, ApiResponse, DocumentSearchData, DocumentSearchRequest, MessageResponse,
    RagSearchRequest, SessionHistoryData,
};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// RAG search and answer generation
pub async fn search_handler(
    State(state): State<AppState>,
    payload: Result<Json<RagSearchRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AgentInvokeData>>, ApiError> {
    let Json(request) = payload.map_err(body_rejection)?;

    let query = non_blank(request.query)
        .ok_or_else(|| ApiError::BadRequest("Query is required".to_string()))?;
    let options = parse_options(request.options)?;
    let session_id = non_blank(request.session_id);

    info!("RAG search request: session={:?}, query_len={}", session_id, query.len());

    invoke_agent(
        &state,
        &state.rag_agent,
        query,
        session_id,
        request.context,
        options,
    )
    .await
}

/// Vector similarity only, no agent involved
pub async fn documents_search_handler(
    State(state): State<AppState>,
    payload: Result<Json<DocumentSearchRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<DocumentSearchData>>, ApiError> {
    let Json(request) = payload.map_err(body_rejection)?;

    let query = non_blank(request.query)
        .ok_or_else(|| ApiError::BadRequest("Query is required".to_string()))?;
    if request.k == 0 {
        return Err(ApiError::BadRequest("k must be at least 1".to_string()));
    }

    let results = state
        .retrieval
        .similarity_search(&query, request.k, request.filter)
        .await
        .map_err(|e| ApiError::from_service(e, state.expose_error_details()))?;

    info!("Document search returned {} results", results.len());

    Ok(Json(ApiResponse::ok(DocumentSearchData {
        query,
        count: results.len(),
        results,
    })))
}

pub async fn clear_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<MessageResponse> {
    clear_agent_session(&state.rag_agent, session_id).await
}

pub async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ApiResponse<SessionHistoryData>> {
    agent_session_history(&state, &state.rag_agent, session_id).await
}
