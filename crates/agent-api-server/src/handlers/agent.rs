use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::models::{
    AgentConfigData, AgentConfigResponse, AgentInvokeData, ApiResponse, InvokeRequest,
    MessageResponse, SessionHistoryData, StreamQuery,
};
use crate::services::agent::{AgentEvent, AgentOptions, AgentRequest, AgentService};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// Blank strings count as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn parse_options(options: Option<Value>) -> Result<AgentOptions, ApiError> {
    match options {
        None | Some(Value::Null) => Ok(AgentOptions::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| ApiError::BadRequest(format!("Invalid options: {}", e))),
    }
}

fn parse_json_param(name: &str, raw: Option<String>) -> Result<Option<Value>, ApiError> {
    match non_blank(raw) {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ApiError::BadRequest(format!("Invalid {} parameter: {}", name, e))),
    }
}

pub(crate) fn body_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
}

/// Shared by the general and RAG invoke routes.
pub(crate) async fn invoke_agent(
    state: &AppState,
    agent: &AgentService,
    input: String,
    session_id: Option<String>,
    context: Option<Value>,
    options: AgentOptions,
) -> Result<Json<ApiResponse<AgentInvokeData>>, ApiError> {
    let start = Instant::now();
    let request = AgentRequest {
        input,
        session_id: session_id.clone(),
        context: context.clone(),
        options,
    };

    let reply = agent
        .invoke(request)
        .await
        .map_err(|e| ApiError::from_service(e, state.expose_error_details()))?;

    info!(
        "{} agent invoke completed in {}ms ({} steps)",
        agent.name(),
        start.elapsed().as_millis(),
        reply.steps.len()
    );

    Ok(Json(ApiResponse::ok(AgentInvokeData {
        response: reply.output,
        context: context.unwrap_or_else(|| json!({})),
        steps: reply.steps,
        has_memory: session_id.is_some(),
        session_id,
        memory_info: reply.memory_info,
    })))
}

pub(crate) async fn clear_agent_session(agent: &AgentService, session_id: String) -> Json<MessageResponse> {
    let removed = agent.clear_session(&session_id).await;
    debug!("Clear session {} on {} agent (existed: {})", session_id, agent.name(), removed);
    Json(MessageResponse::ok(format!("Session {} memory cleared", session_id)))
}

pub(crate) async fn agent_session_history(
    state: &AppState,
    agent: &AgentService,
    session_id: String,
) -> Json<ApiResponse<SessionHistoryData>> {
    let snapshot = agent.history(&session_id).await;
    let max_recent_messages = agent.recent_messages_target(state.settings.memory.token_budget());

    Json(ApiResponse::ok(SessionHistoryData {
        session_id,
        recent_messages: snapshot.recent_messages,
        summary: snapshot.summary,
        total_messages: snapshot.total_messages,
        max_recent_messages,
    }))
}

pub async fn invoke_handler(
    State(state): State<AppState>,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AgentInvokeData>>, ApiError> {
    let Json(request) = payload.map_err(body_rejection)?;

    let message = non_blank(request.message)
        .ok_or_else(|| ApiError::BadRequest("Message is required".to_string()))?;
    let options = parse_options(request.options)?;
    let session_id = non_blank(request.session_id);

    info!(
        "Agent invoke request: session={:?}, message_len={}",
        session_id,
        message.len()
    );

    invoke_agent(
        &state,
        &state.general_agent,
        message,
        session_id,
        request.context,
        options,
    )
    .await
}

fn sse_json(value: Value) -> Event {
    Event::default().data(value.to_string())
}

pub async fn stream_handler(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let message = non_blank(query.message)
        .ok_or_else(|| ApiError::BadRequest("Message is required".to_string()))?;
    let context = parse_json_param("context", query.context)?;
    let options = parse_options(parse_json_param("options", query.options)?)?;
    let session_id = non_blank(query.session_id);

    info!(
        "Agent stream request: session={:?}, message_len={}",
        session_id,
        message.len()
    );

    let events = state.general_agent.stream(AgentRequest {
        input: message,
        session_id: session_id.clone(),
        context,
        options,
    });

    let stream = async_stream::stream! {
        let start = Instant::now();
        let mut events = Box::pin(events);

        while let Some(event) = events.next().await {
            match event {
                Ok(AgentEvent::Token(chunk)) => {
                    yield Ok(sse_json(json!({ "chunk": chunk })));
                }
                Ok(AgentEvent::Step(step)) => {
                    debug!("Stream step: {} -> {} chars", step.tool, step.observation.len());
                }
                Ok(AgentEvent::Finished(outcome)) => {
                    info!(
                        "Agent stream completed in {}ms ({} steps)",
                        start.elapsed().as_millis(),
                        outcome.steps.len()
                    );
                    yield Ok(sse_json(json!({ "done": true, "sessionId": session_id })));
                }
                Err(e) => {
                    error!("Agent stream error: {:#}", e);
                    yield Ok(sse_json(json!({ "error": format!("{:#}", e) })));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn clear_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<MessageResponse> {
    clear_agent_session(&state.general_agent, session_id).await
}

pub async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ApiResponse<SessionHistoryData>> {
    agent_session_history(&state, &state.general_agent, session_id).await
}

pub async fn config_handler(State(state): State<AppState>) -> Json<AgentConfigResponse> {
    let llm = &state.settings.llm;
    Json(AgentConfigResponse {
        success: true,
        config: AgentConfigData {
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            model: llm.model.clone(),
            max_iterations: llm.max_iterations,
        },
    })
}
