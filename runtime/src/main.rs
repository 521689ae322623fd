use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relmap::{
    AppState,
    ai::{GenerationService, GenerationSettings, ResponsesClient, Summarizer},
    config::load_config,
    pipeline::{
        BroadcastProgressSink, CommandRenderer, DiagramRenderer, NomnomlValidator, Pipeline,
        ProgressSink, SessionSnapshot,
        utils::{CharEstimateTokenizer, TiktokenTokenizer, Tokenizer},
    },
    routes,
    storage::{JsonStateConfig, JsonStateStorage, StateStorage, StorageManager},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "Backend crashed");
        eprintln!("Backend crashed: {err:#}");
    }
}

async fn run() -> Result<()> {
    init_tracing();
    if let Err(err) = dotenv() {
        warn!(error = %err, "No .env file loaded");
    }
    let api_key = env::var("OPENAI_API_KEY")
        .ok()
        .filter(|value| !value.trim().is_empty());
    if api_key.is_none() {
        warn!("OPENAI_API_KEY not set; requests go out unauthenticated");
    }

    let config = load_config()
        .await
        .context("Failed to load application configuration")?;
    let working_dir = PathBuf::from(&config.working_dir);
    let workspace = env::var("WORKSPACE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let session_store = Arc::new(JsonStateStorage::<SessionSnapshot>::new(JsonStateConfig {
        working_dir: working_dir.clone(),
        namespace: "session".into(),
        workspace: workspace.clone(),
    }));
    let settings_store = Arc::new(JsonStateStorage::<GenerationSettings>::new(JsonStateConfig {
        working_dir: working_dir.clone(),
        namespace: "settings".into(),
        workspace: workspace.clone(),
    }));

    let mut storage_manager = StorageManager::new();
    storage_manager.register(session_store.clone());
    storage_manager.register(settings_store.clone());
    storage_manager.initialize_all().await?;

    let tokenizer: Arc<dyn Tokenizer> = match TiktokenTokenizer::new() {
        Ok(tokenizer) => Arc::new(tokenizer),
        Err(err) => {
            warn!(error = %err, "Falling back to character-based token estimates");
            Arc::new(CharEstimateTokenizer)
        }
    };

    let client = Arc::new(ResponsesClient::new(
        api_key,
        config.generation.base_url.clone(),
        config.generation.client_options(),
        tokenizer,
    )?);

    let renderer: Arc<dyn DiagramRenderer> = match config.renderer.command.as_deref() {
        Some(program) if !program.trim().is_empty() => {
            info!(program, "Rendering diagrams with external command");
            Arc::new(CommandRenderer::new(program, config.renderer.args.clone()))
        }
        _ => Arc::new(NomnomlValidator),
    };

    let events = BroadcastProgressSink::new(EVENT_CHANNEL_CAPACITY);
    let settings = settings_store
        .get()
        .await?
        .unwrap_or_else(|| config.generation.default_settings());

    let generator: Arc<dyn GenerationService> = client.clone();
    let summarizer: Arc<dyn Summarizer> = client;
    let sink: Arc<dyn ProgressSink> = Arc::new(events.clone());
    let pipeline = Arc::new(Pipeline::new(
        generator,
        Some(summarizer),
        renderer,
        sink,
        settings,
        config.pipeline.pipeline_config(),
    ));

    if let Some(snapshot) = session_store.get().await? {
        info!(
            records = snapshot.records.len(),
            "Restoring previous session"
        );
        pipeline.import(snapshot).await;
    }

    let addr_string = format!("{}:{}", config.server.host, config.server.port);
    let addr = addr_string
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid server address: {addr_string}"))?;
    info!(host = %config.server.host, port = config.server.port, "Loaded configuration");

    let state = Arc::new(AppState {
        config: Arc::new(config),
        pipeline: pipeline.clone(),
        events,
        session_store,
        settings_store,
        storages_status: storage_manager.status(),
    });

    let app = Router::new()
        .merge(routes::health_routes())
        .merge(routes::analysis_routes())
        .merge(routes::graph_routes())
        .merge(routes::session_routes())
        .merge(routes::event_routes())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {addr}"))?;
    info!(%addr, "Backend server listening");

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    pipeline.cancel_current().await;
    pipeline.shutdown().await;
    if let Err(err) = storage_manager.finalize_all().await {
        warn!(error = %err, "Failed to finalize storages");
    }

    server_result.context("Server encountered a fatal error")?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                if stream.recv().await.is_some() {
                    info!("Received SIGTERM");
                }
            }
            Err(err) => warn!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received termination signal (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received termination signal (SIGTERM)");
        }
    }
}
