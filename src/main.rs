//! Guardian Core - Process Host
//!
//! Wires the pipeline from its leaf adapters and serves the HTTP surface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       GUARDIAN CORE                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌─────────────────────────┐  ┌───────────┐  │
//! │  │  Intake   │ → │  Worker Pool            │→ │ Incident  │  │
//! │  │  (Axum)   │   │  Quality/Threat/Anomaly │  │ Synthesis │  │
//! │  └───────────┘   └─────────────────────────┘  └─────┬─────┘  │
//! │        injected: AI client · metrics sink · store   ▼        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exit codes: 0 normal, 1 configuration error, 2 fatal startup,
//! 3 unrecoverable internal error.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guardian_core::api::{self, AppState};
use guardian_core::logic::ai::OfflineAiClient;
use guardian_core::logic::emitter::TracingSink;
use guardian_core::logic::pipeline::Pipeline;
use guardian_core::logic::store::MemoryStore;
use guardian_core::PipelineConfig;

const EXIT_CONFIG: u8 = 1;
const EXIT_STARTUP: u8 = 2;
const EXIT_INTERNAL: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guardian_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = match PipelineConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    tracing::info!(
        model = %config.model_name,
        workers = config.max_concurrent_analyses,
        "guardian core starting"
    );

    // Leaf adapters. Production embeddings link the library and inject real
    // vendor clients; the binary ships self-contained defaults.
    let ai = Arc::new(OfflineAiClient);
    let sink = Arc::new(TracingSink);
    let store = Arc::new(MemoryStore::new());

    if config.require_on_startup {
        if let Err(e) = guardian_core::logic::ai::AiClient::healthcheck(ai.as_ref()).await {
            tracing::error!(error = %e, "ai adapter unavailable at startup");
            return ExitCode::from(EXIT_STARTUP);
        }
    }

    let pipeline = Pipeline::new(config.clone(), ai, sink, store);
    let state = AppState::new(pipeline);
    let app = api::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind {}", addr);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    match axum::serve(listener, app).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server terminated");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}
