// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of the FluxION DLMS/COSEM bridge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod config;
mod connection;
mod entities;
mod error;
mod flagids;
mod identity;
mod poller;
mod publisher;

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use config::AppConfig;
use connection::DlmsConnection;
use dlms_client::DlmsClient;
use dlms_ha::HomeAssistantClient;
use dlms_types::{CosemAttribute, CosemInterface, Obis};
use flagids::FlagIdDatabase;
use identity::DeviceInfo;
use poller::MeterPoller;
use publisher::HaStatePublisher;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

const DEFAULT_LOG_FILTER: &str = "info,dlms_client=warn";
const DEBUG_LOG_FILTER: &str = "debug";
const VERSION: &str = env!("CARGO_PKG_VERSION");

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, Parser)]
#[command(
    name = "dlms-cosem",
    version,
    about = "DLMS/COSEM electricity meter bridge for Home Assistant"
)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the meter and publish its readings (default)
    Run,
    /// Test the meter connection
    Check,
    /// Print the meter identity as JSON
    Identify,
    /// Read a single attribute
    Read {
        /// Logical name, e.g. 1.0.32.7.0.255
        obis: String,

        /// COSEM interface class id
        #[arg(long, default_value_t = 3)]
        interface: u16,

        #[arg(long, default_value_t = dlms_types::DEFAULT_ATTRIBUTE)]
        attribute: i8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter_handle = init_tracing()?;

    let config = AppConfig::load(cli.config.as_deref())?;
    if config.system.debug_mode {
        set_debug_logging(&filter_handle)?;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => check(&config).await,
        Command::Identify => print_identity(&config).await,
        Command::Read {
            obis,
            interface,
            attribute,
        } => read(&config, &obis, interface, attribute).await,
    }
}

/// Respects `RUST_LOG`; the filter can be raised to debug once the config is known
fn init_tracing() -> Result<FilterHandle> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(DEFAULT_LOG_FILTER),
    };
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(handle)
}

fn set_debug_logging(handle: &FilterHandle) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        return Ok(());
    }
    handle
        .reload(EnvFilter::new(DEBUG_LOG_FILTER))
        .context("Failed to switch to debug logging")?;
    info!("🐛 Debug logging enabled");
    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    info!("🚀 Starting DLMS/COSEM bridge v{VERSION}");
    info!("📋 Configuration Summary:");
    info!(
        "   Meter: {}:{} (physical address {:?})",
        config.meter.host, config.meter.port, config.meter.physical_address
    );
    info!("   Scan interval: {}s", config.system.scan_interval_secs);
    info!("   Entity prefix: {}", config.home_assistant.entity_prefix);
    info!("   Debug mode: {}", config.system.debug_mode);

    let db = FlagIdDatabase::load(config.system.flag_ids_path.as_deref())?;

    let ha_client = Arc::new(HomeAssistantClient::detect(
        config.home_assistant.base_url.clone(),
        config.home_assistant.token.clone(),
    )?);
    info!("🏠 Home Assistant API at {}", ha_client.base_url());
    let timezone = fetch_timezone(&ha_client).await;

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(forward_signals(Arc::clone(&shutdown)));

    let connection = DlmsConnection::new(config.client_settings(), config.reconnect_delay());
    let device = tokio::select! {
        () = shutdown.notified() => {
            info!("Shutdown requested before the meter was ready");
            connection.close().await;
            return Ok(());
        }
        device = connect_until_ready(&connection, &db, &config) => device,
    };

    let prefix = &config.home_assistant.entity_prefix;
    let publisher = Arc::new(HaStatePublisher::new(ha_client, device, prefix));
    let entities = entities::enabled_entities(config.system.enable_all_entities);
    let poller = MeterPoller::new(
        connection.clone(),
        publisher,
        entities,
        config.scan_interval(),
        timezone,
    );

    poller.run(shutdown).await;
    connection.close().await;
    info!("👋 Shutting down");
    Ok(())
}

/// Retry setup and identification until the meter answers
async fn connect_until_ready(
    connection: &DlmsConnection,
    db: &FlagIdDatabase,
    config: &AppConfig,
) -> DeviceInfo {
    loop {
        match connection.setup().await {
            Ok(()) => match connection.identify(db, config.identify_timeout()).await {
                Ok(device) => return device,
                Err(e) => {
                    warn!("⚠️ Meter identification failed: {}", e);
                    connection.close().await;
                }
            },
            Err(e) => {
                let settings = connection.settings();
                warn!(
                    "⚠️ Cannot connect to meter at {}:{}: {}",
                    settings.host, settings.port, e
                );
            }
        }
        tokio::time::sleep(config.reconnect_delay()).await;
    }
}

async fn fetch_timezone(client: &HomeAssistantClient) -> Option<Tz> {
    match client.get_timezone().await {
        Ok(name) => match name.parse::<Tz>() {
            Ok(tz) => {
                info!("🌍 Using Home Assistant timezone: {}", tz);
                Some(tz)
            }
            Err(e) => {
                warn!("⚠️ Unknown timezone '{}': {}", name, e);
                None
            }
        },
        Err(e) => {
            warn!("⚠️ Failed to fetch timezone from HA, falling back to UTC: {e}");
            None
        }
    }
}

async fn forward_signals(shutdown: Arc<Notify>) {
    wait_for_signal().await;
    shutdown.notify_one();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Cannot listen for Ctrl-C: {}", e);
            }
            info!("Ctrl-C received");
        }
        _ = terminate.recv() => info!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
    }
}

async fn check(config: &AppConfig) -> Result<()> {
    match DlmsConnection::check(&config.client_settings()).await {
        Ok(association) => {
            info!(
                "✅ Meter at {}:{} accepted the association (max PDU {:?})",
                config.meter.host, config.meter.port, association.server_max_receive_pdu
            );
            println!("success");
            Ok(())
        }
        Err(e) => {
            error!("❌ Cannot connect to meter: {}", e);
            println!("cannot_connect");
            bail!("connection test failed: {e}")
        }
    }
}

async fn print_identity(config: &AppConfig) -> Result<()> {
    let db = FlagIdDatabase::load(config.system.flag_ids_path.as_deref())?;
    let connection = DlmsConnection::new(config.client_settings(), config.reconnect_delay());
    connection
        .setup()
        .await
        .context("Failed to connect to the meter")?;
    let identity = connection.identify(&db, config.identify_timeout()).await;
    connection.close().await;

    let device = identity?;
    println!("{}", serde_json::to_string_pretty(&device)?);
    Ok(())
}

async fn read(config: &AppConfig, obis: &str, interface: u16, attribute: i8) -> Result<()> {
    let obis: Obis = obis.parse()?;
    let interface = CosemInterface::from_class_id(interface)?;
    let target = CosemAttribute::new(interface, obis, attribute);

    let mut client = DlmsClient::new(config.client_settings());
    client
        .connect()
        .await
        .context("Failed to connect to the meter")?;
    let result = match client.associate().await {
        Ok(_) => client.get_value(&target).await,
        Err(e) => Err(e),
    };
    client.disconnect().await;

    let value = result.with_context(|| format!("Failed to read {target}"))?;
    println!("{target} = {value:?}");
    Ok(())
}
