//! SleepAsHA bridge - Main Entry Point
//!
//! Connects one MQTT session and publishes the exported alarm list, either
//! once or continuously until SIGINT/SIGTERM.

use clap::{Parser, Subcommand};
use sleepasha::config::BridgeConfig;
use sleepasha::observability::{init_logging, LogSettings};
use sleepasha::publisher::{AlarmPublisher, JsonFileAlarmSource};
use sleepasha::transport::mqtt::{ConnectRequest, MqttError, MqttSession};
use sleepasha::transport::MqttConnector;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};

/// Republish Sleep as Android alarms to MQTT
#[derive(Parser)]
#[command(name = "sleepasha")]
#[command(about = "Republishes Sleep as Android alarms to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SLEEPASHA_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); ignored when LOG_LEVEL is set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, publish the alarm list once, and disconnect
    Publish,
    /// Keep the session up and republish on reconnect and on an interval
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = LogSettings::from_env();
    if std::env::var("LOG_LEVEL").is_err() {
        match cli.verbose {
            0 => {}
            1 => settings.level = Level::DEBUG,
            _ => settings.level = Level::TRACE,
        }
    }
    init_logging(&settings);

    info!("Starting sleepasha v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Publish => publish_once(config).await,
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(BridgeConfig::load_from_file(path)?);
    }

    for path_str in ["sleepasha.toml", "config/sleepasha.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(BridgeConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create sleepasha.toml".into())
}

/// Bootstrap: session, publisher and alarm source from configuration
fn build_bridge(
    config: &BridgeConfig,
) -> Result<(AlarmPublisher, JsonFileAlarmSource, ConnectRequest), Box<dyn std::error::Error>> {
    let session = MqttSession::new(config.connection_config()?, MqttConnector::new());
    let publisher = AlarmPublisher::new(session, &config.publisher.topic_name)?;
    let source = JsonFileAlarmSource::new(&config.publisher.alarms_file);
    Ok((publisher, source, config.connect_request()?))
}

async fn publish_once(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (publisher, source, request) = build_bridge(&config)?;
    let session = publisher.session().clone();

    let conn_ack = session.connect(Some(request)).await?;
    info!(session_present = conn_ack.session_present, "Connected");

    let result = publisher.sync_once(&source).await;
    session.stop().await?;

    let published = result?;
    info!(topic = %published.topic, "Alarms published");
    Ok(())
}

async fn run_bridge(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (publisher, source, request) = build_bridge(&config)?;
    let session = publisher.session().clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let sync = {
        let session = session.clone();
        let interval = config.publish_interval();
        async move {
            if session.connect_with_retry(Some(request), shutdown_rx.clone()).await? {
                publisher.run(&source, interval, shutdown_rx).await;
            }
            Ok::<_, MqttError>(())
        }
    };
    tokio::pin!(sync);

    info!(topic = %config.publisher.topic_name, "Bridge is running");

    // Wait for shutdown signals or a fatal connection error
    let finished = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            None
        }
        result = &mut sync => Some(result),
    };

    info!("Application shutdown initiated");
    let _ = shutdown_tx.send(true);
    let stopped = session.stop().await;
    let result = match finished {
        Some(result) => result,
        None => sync.await,
    };

    result?;
    stopped?;
    Ok(())
}

fn handle_config_command(
    config: BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Loading skips the environment, so resolve credentials as well
    config.connection_config()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
