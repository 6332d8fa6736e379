//! olmOCR Studio - a small web front-end for an external PDF OCR pipeline.

mod config;
mod error;
mod ocr;
mod preview;
mod processor;
mod workspace;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use config::AppConfig;
use ocr::pipeline::CommandPipeline;
use ocr::viewer::CommandViewer;
use processor::{ProcessOutput, Processor};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workspace::Workspace;

const INDEX_HTML: &str = include_str!("index.html");

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    processor: Arc<Processor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "olmocr_studio=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Pipeline: `{}`, viewer: `{}`, workspace: {:?}",
        config.pipeline.display(),
        config.viewer.display(),
        config.workspace_dir
    );

    let workspace = Workspace::new(&config.workspace_dir)?;
    info!("Workspace ready at {:?}", workspace.root());
    if let Some(ttl) = config.retention {
        spawn_retention_sweeper(workspace.clone(), ttl);
    }

    let processor = Processor::new(
        workspace,
        Arc::new(CommandPipeline::new(config.pipeline.clone(), config.pipeline_timeout)),
        Arc::new(CommandViewer::new(config.viewer.clone(), config.viewer_timeout)),
    );
    let state = AppState {
        processor: Arc::new(processor),
    };

    let app = router(state, config.max_upload_bytes);

    // Run server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/process", post(process_pdf))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodically delete job directories older than `ttl`.
fn spawn_retention_sweeper(workspace: Workspace, ttl: Duration) {
    let period = ttl.min(Duration::from_secs(3600));
    info!("Job retention: {}s (sweeping every {}s)", ttl.as_secs(), period.as_secs());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = workspace.sweep_expired(ttl, now) {
                warn!("Workspace sweep failed: {}", e);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

// ============================================================================
// Handlers
// ============================================================================

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Run the full pipeline over the uploaded `file` field.
///
/// Processing failures are reported inside the response body; only a
/// malformed multipart request is an HTTP error.
async fn process_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessOutput>, (StatusCode, String)> {
    let mut file_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("document").to_string();
            let data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?;
            info!("Received file: {} ({} bytes)", filename, data.len());
            if !filename.to_lowercase().ends_with(".pdf") {
                warn!("Upload {} does not have a .pdf extension", filename);
            }
            file_data = Some(data.to_vec());
            break;
        }
    }

    let output = state.processor.process(file_data.as_deref()).await;
    Ok(Json(output))
}
