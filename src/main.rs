//! mqtt-bridge-adapter - platform to secondary broker MQTT bridge
//!
//! Usage:
//!   mqtt-bridge-adapter [OPTIONS] --system-key <KEY> --system-secret <SECRET>
//!       --password <ACTIVE_KEY> --adapter-config-collection-id <ID>
//!
//! Options:
//!   --platform-url <URL>    Platform REST endpoint (default: http://localhost:9000)
//!   --messaging-url <ADDR>  Platform MQTT broker (default: localhost:1883)
//!   --device-name <NAME>    Device name, also the adapter name (default: mqttBridgeAdapter)
//!   -c, --config <FILE>     Local tuning file (TOML)
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mqtt_bridge_adapter::bridge::{
    BridgeSupervisor, PlatformEndpointSource, SecondaryEndpointSource, TopicMapper,
};
use mqtt_bridge_adapter::config::{BrokerAddress, Config};
use mqtt_bridge_adapter::error::BridgeError;
use mqtt_bridge_adapter::platform::{
    authenticate_with_retry, load_adapter_config, Authenticator, PlatformClient,
    PlatformCredentials,
};

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

/// Bridge a platform MQTT broker with a secondary MQTT broker
#[derive(Parser, Debug)]
#[command(name = "mqtt-bridge-adapter")]
#[command(version)]
#[command(about = "Bidirectional MQTT v3.1.1 bridge between a platform broker and an external broker")]
struct Args {
    /// System key of the platform system
    #[arg(long, alias = "systemKey")]
    system_key: String,

    /// System secret of the platform system
    #[arg(long, alias = "systemSecret")]
    system_secret: String,

    /// Device name the adapter authenticates as; also names the adapter record
    #[arg(long, alias = "deviceName", default_value = "mqttBridgeAdapter")]
    device_name: String,

    /// Active key of the device
    #[arg(long)]
    password: String,

    /// Platform REST endpoint
    #[arg(long, alias = "platformURL", default_value = "http://localhost:9000")]
    platform_url: String,

    /// Platform MQTT broker address
    #[arg(long, alias = "messagingURL", default_value = "localhost:1883")]
    messaging_url: String,

    /// Collection holding the adapter configuration records
    #[arg(long, alias = "adapterConfigCollectionID")]
    adapter_config_collection_id: String,

    /// Local tuning file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, alias = "logLevel", value_enum, ignore_case = true)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Tuning file is optional; environment overrides apply either way
    let file_config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let file_config = match file_config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
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

    let platform_address: BrokerAddress = match args.messaging_url.parse() {
        Ok(address) => address,
        Err(e) => {
            error!("Invalid platform messaging URL '{}': {}", args.messaging_url, e);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        signal.cancel();
    });

    info!("Starting mqtt-bridge-adapter");
    info!("  Device: {}", args.device_name);
    info!("  Platform: {} (MQTT {})", args.platform_url, platform_address);

    let platform = Arc::new(PlatformClient::new(PlatformCredentials {
        platform_url: args.platform_url.clone(),
        system_key: args.system_key.clone(),
        system_secret: args.system_secret.clone(),
        device_name: args.device_name.clone(),
        active_key: args.password.clone(),
    }));

    let token = match authenticate_with_retry(
        platform.as_ref(),
        file_config.auth.retry_interval,
        &shutdown,
    )
    .await
    {
        Ok(token) => token,
        Err(BridgeError::Shutdown) => {
            info!("Shutdown requested during authentication");
            return Ok(());
        }
    };
    info!("Authenticated with the platform");

    let adapter = match load_adapter_config(
        platform.as_ref(),
        &token,
        &args.adapter_config_collection_id,
        &args.device_name,
    )
    .await
    {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to load adapter configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("  Topic root: {}", adapter.topic_root);
    info!("  Secondary: {}", adapter.broker.messaging_url);
    if adapter.broker.topics.is_empty() {
        info!("  Secondary topics: # (all)");
    } else {
        info!("  Secondary topics: {}", adapter.broker.topics.join(", "));
    }

    let mapper = TopicMapper::new(adapter.topic_root.clone());
    let platform_source = PlatformEndpointSource::new(
        platform.clone() as Arc<dyn Authenticator>,
        platform_address,
        args.device_name.clone(),
        mapper.platform_subscription(),
    )
    .with_initial_token(token);

    let secondary_source = match SecondaryEndpointSource::new(adapter.broker, args.device_name) {
        Ok(source) => source,
        Err(e) => {
            error!("Invalid secondary broker settings: {}", e);
            std::process::exit(1);
        }
    };

    let supervisor = Arc::new(BridgeSupervisor::new(
        &file_config,
        mapper,
        Arc::new(platform_source),
        Arc::new(secondary_source),
    ));

    supervisor.run(shutdown).await;

    Ok(())
}
