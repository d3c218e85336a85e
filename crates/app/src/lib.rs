use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use vidugate_core::config::{
    self, api_key_from_env, config_path, data_dir, initialize_data_dir, AppConfig,
};
use vidugate_core::forwarder::CallbackForwarder;
use vidugate_core::logging::{
    self, LogFilterInputs, DEFAULT_LOG_FILTER, DEFAULT_LOG_RETENTION_FILES,
};
use vidugate_core::registry::TaskRegistry;
use vidugate_core::server::{app_router, edge_router, AppState};
use vidugate_core::vidu::ViduClient;

#[derive(Parser)]
#[command(
    name = "vidugate",
    about = "Generation-task orchestration for Vidu image/video workflows",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the public edge forwarder instead of the application server.
    Edge(EdgeArgs),
}

#[derive(Args)]
struct EdgeArgs {
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    host: Option<String>,

    #[arg(
        long,
        value_name = "URL",
        help = "Override the private upstream origin callbacks are relayed to"
    )]
    upstream: Option<String>,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_startup_metadata(&resolved_data_dir);

    let config = load_config(&resolved_data_dir);

    match cli.command {
        Some(Commands::Edge(edge)) => run_edge(edge, config).await,
        None => run_server(cli.port, cli.host, config).await,
    }
}

fn load_config(data_dir: &Path) -> AppConfig {
    if let Err(e) = initialize_data_dir(data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }

    let cfg_path = config_path(data_dir);
    match AppConfig::load_from_path(&cfg_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config file, using defaults");
            AppConfig::default()
        }
    }
}

async fn run_server(
    port_override: Option<u16>,
    host_override: Option<String>,
    config: AppConfig,
) -> Result<()> {
    let port = port_override
        .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(config.server.port);
    let host = host_override.unwrap_or_else(|| config.server.host.clone());

    let registry = TaskRegistry::new(config.registry.retention());
    let vidu = match api_key_from_env() {
        Some(key) => Some(
            ViduClient::new(&config.vidu.api_base_url, &key)
                .context("failed to construct Vidu client")?,
        ),
        None => {
            warn!(
                env = config::ENV_API_KEY,
                "Vidu API key not set; /api/generate is disabled"
            );
            None
        }
    };

    let state = AppState::new(registry, vidu, config);
    let app = app_router(state);

    let addr = format!("{host}:{port}");
    info!(%addr, "Starting vidugate server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_edge(args: EdgeArgs, config: AppConfig) -> Result<()> {
    let port = args.port.unwrap_or(config.edge.port);
    let host = args.host.unwrap_or_else(|| config.edge.host.clone());
    let upstream = args
        .upstream
        .unwrap_or_else(|| config.edge.upstream_url.clone());

    let forwarder = CallbackForwarder::new(
        &upstream,
        config.edge.max_attempts,
        config.edge.retry_base_delay(),
    )
    .context("failed to construct callback forwarder")?;
    let app = edge_router(Arc::new(forwarder));

    let addr = format!("{host}:{port}");
    info!(%addr, upstream = %upstream, "Starting vidugate edge forwarder");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let filter = logging::select_log_filter(&LogFilterInputs {
        cli_filter: cli_log_filter.map(ToString::to_string),
        rust_log: std::env::var("RUST_LOG").ok(),
        verbose,
    });

    let console_env_filter = parse_env_filter_with_fallback(&filter, "console");
    let file_sink = data_dir.map(|dir| logging::file_appender(dir, DEFAULT_LOG_RETENTION_FILES));

    match file_sink {
        Some(Ok(appender)) => {
            let file_env_filter = parse_env_filter_with_fallback(&filter, "file");
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(console_env_filter),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(logging::redacting_make_writer(appender))
                        .with_filter(file_env_filter),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        fallback => {
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(console_env_filter),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            if let Some(Err(err)) = fallback {
                warn!(
                    error = %format!("{err:#}"),
                    "Persistent file logging unavailable; continuing with console-only logging"
                );
            }
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    let pid = std::process::id();
    info!(
        pid,
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}
