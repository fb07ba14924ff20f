use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use agent_api_server::config::{Settings, VectorStoreProvider};
use agent_api_server::logging::init_tracing;
use agent_api_server::services::{
    EmbeddingService, InMemoryIndex, LlmService, PineconeIndex, VectorIndex,
};
use agent_api_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&settings.logging)?;

    info!("🚀 Starting Agent API Server...");
    info!(
        "✅ Configuration loaded (environment={}, model={}, vector_store={:?})",
        settings.server.environment, settings.llm.model, settings.vector_store.provider
    );

    if settings.llm.api_key.is_empty() {
        warn!("LLM API key is empty; requests are sent without authorization");
    }

    let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);
    let embedding_service = Arc::new(EmbeddingService::new(settings.embedding.clone())?);

    let index: Arc<dyn VectorIndex> = match settings.vector_store.provider {
        VectorStoreProvider::Pinecone => {
            Arc::new(PineconeIndex::new(settings.vector_store.clone())?)
        }
        VectorStoreProvider::Memory => Arc::new(InMemoryIndex::new()),
    };
    info!("✅ Services initialized");

    let addr = SocketAddr::from((
        settings
            .server
            .host
            .parse::<std::net::IpAddr>()
            .context("Invalid server host")?,
        settings.server.port,
    ));
    let cleanup_interval = Duration::from_secs(settings.memory.cleanup_interval_seconds.max(1));

    let state = AppState::build(
        settings,
        llm_service.clone(),
        llm_service,
        embedding_service,
        index,
    )?;

    spawn_session_sweeper(&state, cleanup_interval);

    let app = build_router(state);

    info!("🎯 Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Periodically evict idle sessions from both agents' stores.
fn spawn_session_sweeper(state: &AppState, every: Duration) {
    let stores = state.session_stores();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted: usize = stores.iter().map(|store| store.cleanup_expired()).sum();
            if evicted > 0 {
                info!("Evicted {} idle sessions", evicted);
            } else {
                debug!("Session sweep found nothing to evict");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
