use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use rt_analyzer::{Analyzer, OpenAiClient};
use rt_bus::{EventBus, InProcessBus};
use rt_domain::config::{Config, ConfigSeverity, LogStoreKind};
use rt_gateway::api;
use rt_gateway::cli::{Cli, Command, ConfigCommand};
use rt_gateway::fanout::hub::FanoutHub;
use rt_gateway::state::AppState;
use rt_logstore::{LogStore, LokiStore, MemoryStore};
use rt_store::MetadataStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = rt_gateway::cli::load_config(config_path)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = rt_gateway::cli::load_config(config_path)?;
            let valid = rt_gateway::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = rt_gateway::cli::load_config(config_path)?;
            rt_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("runtrail {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rt_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("RunTrail starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Root cancellation token ──────────────────────────────────────
    let shutdown = CancellationToken::new();

    // ── Metadata store ───────────────────────────────────────────────
    let store = Arc::new(
        MetadataStore::open(&config.metadata.db_path).context("opening metadata store")?,
    );

    // ── Log store ────────────────────────────────────────────────────
    let logstore: Arc<dyn LogStore> = match config.logstore.kind {
        LogStoreKind::Memory => {
            Arc::new(MemoryStore::new(config.logstore.query_limit))
        }
        LogStoreKind::Loki => Arc::new(
            LokiStore::from_config(&config.logstore).context("initializing Loki client")?,
        ),
    };
    tracing::info!(kind = ?config.logstore.kind, "log store ready");

    // ── Event bus ────────────────────────────────────────────────────
    let bus: Arc<dyn EventBus> = Arc::new(
        InProcessBus::open(&config.bus.state_path, config.bus.live_capacity)
            .context("initializing event bus")?,
    );
    tracing::info!(
        queued_tasks = bus.queue_length(),
        "event bus ready"
    );

    // ── Fan-out hub + dispatcher ─────────────────────────────────────
    let hub = Arc::new(FanoutHub::new(config.fanout.subscriber_buffer));
    let dispatcher = hub.spawn_dispatcher(bus.clone(), shutdown.clone());
    tracing::info!("fan-out hub ready");

    // ── Analyzer worker pool ─────────────────────────────────────────
    let model = Arc::new(OpenAiClient::new().context("initializing model client")?);
    let analyzer = Arc::new(Analyzer::new(
        store.clone(),
        logstore.clone(),
        bus.clone(),
        model,
        config.analyzer.clone(),
    ));
    let workers = analyzer.spawn_workers(shutdown.clone());
    tracing::info!(
        workers = config.analyzer.clamped().workers,
        "analyzer pool ready"
    );

    // ── App state ────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        store,
        logstore,
        bus,
        hub,
        shutdown: shutdown.clone(),
    };

    // ── Layers ───────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent = config.server.max_concurrent_requests;
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router()
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "RunTrail listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        })
        .await
        .context("axum server error")?;

    // ── Drain: bounded grace period for in-flight work ───────────────
    shutdown.cancel();
    let grace = Duration::from_secs(10);
    let drain = async {
        for handle in workers {
            let _ = handle.await;
        }
        let _ = dispatcher.await;
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "grace period elapsed, exiting");
    }

    tracing::info!("RunTrail stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). A literal `"*"` allows all origins
/// (not recommended for production).
fn build_cors_layer(cors: &rt_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    let methods = [Method::GET, Method::POST, Method::OPTIONS];

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin = origin.to_str().unwrap_or("");
            // The remainder after the prefix must be digits only, so
            // "http://localhost:3000.evil.com" cannot slip through.
            wildcard_prefixes.iter().any(|prefix| {
                origin
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
