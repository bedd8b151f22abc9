pub mod config;
pub mod mqtt;
pub mod port;

use crate::config::BridgeConfig;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use mqtt::message_manager::MsgManager;
use mqtt::mqtt_handler::Bridge;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Relays a Traze MQTT broker to a front-end speaking JSON lines on stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "traze-bridge", version)]
struct Cli {
    /// Config file to use instead of the one in the user config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broker URL, overrides the config file
    #[arg(long)]
    broker: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.verbose)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(cli));
    // a pending stdin read cannot be cancelled and would hold the runtime open
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BridgeConfig::load_or_init(cli.config.as_deref()).await?;
    if let Some(url) = cli.broker {
        config.broker.url = url;
    }

    let cancel = CancellationToken::new();

    let (inbound_tx, inbound_rx) = mpsc::channel(config.broker.channel_capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(config.broker.channel_capacity);

    let bridge = Bridge::spawn(
        &config.broker,
        config.topics.clone(),
        MsgManager {
            inbound: inbound_tx,
            outbound: outbound_rx,
        },
        cancel.clone(),
    )
    .map_err(|e| eyre!("Failed to start bridge: {}", e))?;

    let (reader, writer) = port::stdio::spawn(outbound_tx, inbound_rx, cancel.clone());

    let summary = bridge.status();
    let mut status = bridge.status();
    // ends once the bridge task drops its status sender
    let mut status_log = tokio::spawn(async move {
        let mut last = status.borrow().connection_state;
        while status.changed().await.is_ok() {
            let state = status.borrow().connection_state;
            if state != last {
                info!("Bridge state: {:?}", state);
                last = state;
            }
        }
    });

    info!("Bridge running, press Ctrl-C to stop");
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Unable to listen for Ctrl-C: {}", e);
            }
            info!("Ctrl-C received");
        }
        _ = &mut status_log => warn!("Bridge stopped on its own"),
    }

    let result = bridge.shutdown().await;
    cancel.cancel();

    match reader.await {
        Ok(Ok(count)) => info!("{} commands forwarded", count),
        Ok(Err(e)) => error!("Command reader failed: {}", e),
        Err(e) => error!("Command reader panicked: {}", e),
    }
    match writer.await {
        Ok(Ok(count)) => info!("{} messages written", count),
        Ok(Err(e)) => error!("Message writer failed: {}", e),
        Err(e) => error!("Message writer panicked: {}", e),
    }
    status_log.abort();

    let summary = summary.borrow().clone();
    info!(
        "Relayed {} messages ({} undecodable, {} dropped), issued {} subscriptions, rejected {} commands, last activity {}",
        summary.messages_relayed,
        summary.decode_failures,
        summary.messages_dropped,
        summary.subscriptions_issued,
        summary.commands_rejected,
        summary
            .last_activity
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );

    result.map_err(|e| eyre!("Bridge failed: {}", e))
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(if verbose { Level::DEBUG } else { Level::INFO });
    Ok(())
}

fn setup_logging_env(level: Level) {
    // stdout carries the message stream
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
