//! Mote gateway entry point.
//!
//! Connects to the base station's serial forwarder, decodes its messages on
//! a [`Multiplexer`], writes records of the configured types as JSON lines,
//! and offers a serial-forwarder port to TCP clients.
//!
//! # Usage
//!
//! ```text
//! mote-gateway [OPTIONS]
//!
//! Options:
//!   --config      <PATH>   Gateway config file [default: gateway.toml]
//!   --schemas     <PATH>   Schema description file (overrides the config)
//!   --sf-port     <PORT>   Serial-forwarder listener port (overrides the config)
//!   --device-addr <ADDR>   Base station host:port (overrides the config)
//!   --log-level   <LEVEL>  Log level when RUST_LOG is unset (overrides the config)
//! ```
//!
//! | Variable              | Option          |
//! |-----------------------|-----------------|
//! | `MOTE_GATEWAY_CONFIG` | `--config`      |
//! | `MOTE_SCHEMAS`        | `--schemas`     |
//! | `MOTE_SF_PORT`        | `--sf-port`     |
//! | `MOTE_DEVICE_ADDR`    | `--device-addr` |
//! | `MOTE_LOG_LEVEL`      | `--log-level`   |

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mote_bus::{MigMessagePlugin, Multiplexer, MultiplexerConfig, RecordSink, Transport};
use mote_core::SchemaRegistry;
use mote_gateway::domain::GatewayConfig;
use mote_gateway::infrastructure::{run_device_link, JsonLinesSink, LinkTransport, SfServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serial-forwarder gateway for a mote network.
#[derive(Debug, Parser)]
#[command(name = "mote-gateway", about = "Serial-forwarder gateway for a mote network", version)]
struct Cli {
    /// Gateway configuration file.  Missing files mean all defaults.
    #[arg(long, default_value = "gateway.toml", env = "MOTE_GATEWAY_CONFIG")]
    config: PathBuf,

    /// Schema description file.
    #[arg(long, env = "MOTE_SCHEMAS")]
    schemas: Option<PathBuf>,

    /// TCP port offered to serial-forwarder clients.
    #[arg(long, env = "MOTE_SF_PORT")]
    sf_port: Option<u16>,

    /// `host:port` of the base station's serial forwarder.
    #[arg(long, env = "MOTE_DEVICE_ADDR")]
    device_addr: Option<String>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "MOTE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let mut config = GatewayConfig::load(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?;

        if let Some(schemas) = self.schemas {
            config.schemas = schemas;
        }
        if let Some(port) = self.sf_port {
            config.gateway.sf_port = port;
        }
        if let Some(address) = self.device_addr {
            config.device.address = address;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_gateway_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let schemas = SchemaRegistry::load(&config.schemas)
        .with_context(|| format!("failed to load schemas from {}", config.schemas.display()))?;
    info!(
        "loaded {} schemas from {}",
        schemas.len(),
        config.schemas.display()
    );

    let link_config = config.device_link_config()?;
    let server_config = config.sf_server_config()?;

    let transport = Arc::new(LinkTransport::new(&link_config));
    let bus = Arc::new(Multiplexer::new(
        link_config.name.clone(),
        Arc::new(schemas),
        Arc::clone(&transport) as Arc<dyn Transport>,
        MultiplexerConfig {
            wire_format: link_config.wire_format,
            send_timeout: config.send_timeout(),
        },
    ));

    let sink: Arc<dyn RecordSink> = match &config.device.record_file {
        Some(path) => Arc::new(
            JsonLinesSink::append_to(path)
                .with_context(|| format!("failed to open record file {}", path.display()))?,
        ),
        None => Arc::new(JsonLinesSink::stdout()),
    };
    for &message_type in &config.device.record_types {
        if !bus.schemas().contains(message_type) {
            warn!("no schema for record type 0x{message_type:02X}; not recording it");
            continue;
        }
        let plugin = MigMessagePlugin::new(
            format!("{}/0x{message_type:02X}", link_config.name),
            message_type,
            link_config.wire_format,
            link_config.device_id,
            link_config.priority,
            Arc::clone(&sink),
        );
        bus.register_listener(message_type, Arc::new(plugin));
    }

    info!(
        "mote gateway starting: device={}, sf={}",
        link_config.address, server_config.bind_addr
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let link = tokio::spawn(run_device_link(
        link_config,
        Arc::clone(&bus),
        Arc::clone(&transport),
        Arc::clone(&running),
    ));

    let server = Arc::new(SfServer::new(server_config));
    server.add_source(Arc::clone(&bus));
    let served = server.run(Arc::clone(&running)).await;

    running.store(false, Ordering::Relaxed);
    transport.close();
    if let Err(e) = link.await {
        warn!("device link task ended abnormally: {e}");
    }
    served?;

    info!("mote gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
