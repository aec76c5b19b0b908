//! iotc-edge-bridge - IoT Edge module forwarding telemetry to IoT Central
//!
//! Usage:
//!   iotc-edge-bridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path (env: IOTC_BRIDGE_CONFIG)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help
//!
//! Identity normally comes from the IoT Edge runtime environment
//! (`IOTEDGE_DEVICEID`, `IOTEDGE_MODULEID`, ...) plus `ID_SCOPE` and `IOTC_KEY`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use iotc_edge_bridge::client::EdgeHubClient;
use iotc_edge_bridge::config::Config;
use iotc_edge_bridge::context::{InvocationContext, TracingLog};
use iotc_edge_bridge::credential::PassthroughResolver;
use iotc_edge_bridge::invoker;
use iotc_edge_bridge::listener::{Listener, ListenerConfig};
use iotc_edge_bridge::metrics::{Metrics, MetricsServer};
use iotc_edge_bridge::router::Router;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// IoT Edge module forwarding telemetry to IoT Central
#[derive(Parser, Debug)]
#[command(name = "iotc-edge-bridge")]
#[command(version)]
#[command(about = "Forwards IoT Edge telemetry to an IoT Central bridge")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, env = "IOTC_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // A missing file falls back to defaults and the environment
    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    info!("Starting IoT Central edge bridge");
    info!(
        "  Module: {} (hub {}:{})",
        config.edge.client_id(),
        config.edge.host,
        config.edge.port
    );
    info!("  Input channel: {}", config.router.input_channel);
    info!("  Invoker: {}", config.invoker.kind());

    let shutdown = CancellationToken::new();

    let invoker = match invoker::from_config(&config.invoker) {
        Ok(invoker) => invoker,
        Err(e) => {
            error!("Error creating bridge invoker: {}", e);
            std::process::exit(1);
        }
    };

    let client = EdgeHubClient::new(config.edge.clone());
    let status = client.status();

    // Setup metrics if configured
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        info!("  Metrics: enabled (http://{})", config.metrics.bind);

        let metrics_server =
            MetricsServer::new(metrics.clone(), config.metrics.bind).with_status(status.clone());
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run(server_shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
        Some(metrics)
    } else {
        info!("  Metrics: disabled");
        None
    };

    let (acknowledger, connection) = match client.open().await {
        Ok(opened) => opened,
        Err(e) => {
            error!("Error connecting to edge hub: {}", e);
            std::process::exit(1);
        }
    };
    info!("IoT Edge module client initialized");

    let mut router = Router::new(
        config.router.input_channel.clone(),
        Arc::new(acknowledger),
        invoker,
    );
    if let Some(metrics) = metrics {
        router = router.with_metrics(metrics);
    }

    let ctx = InvocationContext::new(
        config.iotc.id_scope.clone(),
        config.iotc.key_locator.clone(),
        Arc::new(TracingLog),
        Arc::new(PassthroughResolver),
    );

    let listener = Listener::new(
        Arc::new(router),
        Arc::new(ctx),
        ListenerConfig {
            max_in_flight: config.router.max_in_flight,
            shutdown_grace: config.router.shutdown_grace,
        },
    );

    let (events_tx, events_rx) = mpsc::channel(config.edge.event_capacity);
    let connection_task = tokio::spawn(connection.run(events_tx, shutdown.clone()));
    let listener_shutdown = shutdown.clone();
    let listener_task = tokio::spawn(async move { listener.run(events_rx, listener_shutdown).await });

    // Ctrl+C and SIGTERM both cancel the shared token
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C signal");
            ctrl_c_token.cancel();
        }
    });

    #[cfg(unix)]
    {
        let sigterm_token = shutdown.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM signal");
                    sigterm_token.cancel();
                }
                Err(e) => error!("Failed to set up SIGTERM handler: {}", e),
            }
        });
    }

    let mut exit_code = 0;
    match connection_task.await {
        Ok(Ok(())) => info!("Edge hub connection closed"),
        Ok(Err(e)) => {
            error!("Edge hub connection error: {}", e);
            exit_code = 1;
        }
        Err(e) => {
            error!("Edge hub connection task failed: {}", e);
            exit_code = 1;
        }
    }
    shutdown.cancel();

    if let Ok(abandoned) = listener_task.await {
        if abandoned > 0 {
            error!("{} routing calls did not finish before shutdown", abandoned);
        }
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    info!("Shutdown complete");
    Ok(())
}
