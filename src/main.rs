// src/main.rs
//
// Options alert bot: streams or polls option quotes per asset, follows the
// daily expiry rollover and sends arbitrage / strike alerts.

use clap::Parser;
use log::{error, info};
use options_alert_bot::catalog::DeltaCatalog;
use options_alert_bot::config::{default_config_template, AssetConfig, Config, FeedKind};
use options_alert_bot::connectors::{DeltaPoller, DeltaStream};
use options_alert_bot::dashboard::DashboardServer;
use options_alert_bot::engine::{AssetMonitor, Engine, MonitorHandle, MonitorSettings};
use options_alert_bot::snapshot::SnapshotStore;
use options_alert_bot::state::MonitorState;
use options_alert_bot::traits::{SharedDirectory, SharedNotifier};
use std::sync::Arc;
use url::Url;

#[derive(Parser)]
#[command(name = "options-alert-bot")]
#[command(about = "Options arbitrage and strike alert monitor with automatic expiry rollover")]
struct Args {
    /// Path to configuration file (TOML). Defaults are used when omitted.
    #[arg(long, short)]
    config: Option<String>,

    /// Override the dashboard port from the config file
    #[arg(long)]
    port: Option<u16>,

    /// Print a default configuration file and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.generate_config {
        println!("{}", default_config_template());
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                eprintln!("Use --generate-config to create a template.");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    }
    .with_env_overrides();

    let settings = match config.settings() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid config: {}", e);
            std::process::exit(1);
        }
    };

    let catalog = match DeltaCatalog::new(&config.global.rest_url) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Invalid config: {}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(MonitorState::new(config.cooldown()));
    let notifier = config.build_notifier();

    info!("{}", "=".repeat(60));
    info!("OPTIONS ALERT BOT");
    for asset_cfg in &config.assets {
        info!(
            "  {} via {:?}, arbitrage threshold ${:.2}",
            asset_cfg.asset,
            asset_cfg.feed,
            asset_cfg.threshold()
        );
    }
    info!(
        "  Expiry cutover {} {}",
        config.global.cutover, config.global.timezone
    );
    info!("{}", "=".repeat(60));

    let mut engine = Engine::new(state.clone(), notifier.clone(), settings.clock);
    for asset_cfg in &config.assets {
        if let Err(e) = state.set_threshold(asset_cfg.asset, asset_cfg.threshold()) {
            error!("Skipping {}: {}", asset_cfg.asset, e);
            continue;
        }
        match build_monitor(asset_cfg, catalog.clone(), &state, &notifier, settings) {
            Ok(monitor) => engine = engine.add_monitor(monitor),
            Err(e) => error!("Skipping {}: {}", asset_cfg.asset, e),
        }
    }

    let engine = Arc::new(engine);
    engine.start_all().await;

    let port = args.port.or(config.global.dashboard_port);
    match port {
        Some(port) => {
            let server = DashboardServer::new(engine.clone(), port);
            tokio::select! {
                result = server.run() => {
                    if let Err(e) = result {
                        error!("Dashboard server error: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }
    }

    engine.stop_all().await;
}

fn build_monitor(
    cfg: &AssetConfig,
    catalog: Arc<DeltaCatalog>,
    state: &Arc<MonitorState>,
    notifier: &SharedNotifier,
    settings: MonitorSettings,
) -> Result<Arc<dyn MonitorHandle>, Box<dyn std::error::Error>> {
    let store = Arc::new(SnapshotStore::new(cfg.asset));
    let health = state.health(cfg.asset);
    let directory: SharedDirectory = catalog.clone();

    let monitor: Arc<dyn MonitorHandle> = match cfg.feed {
        FeedKind::Websocket => {
            let stream = DeltaStream::new(
                Url::parse(&cfg.ws_url)?,
                store.clone(),
                health,
                cfg.reconnect_delay(),
            );
            Arc::new(AssetMonitor::new(
                Arc::new(stream),
                store,
                directory,
                state.clone(),
                notifier.clone(),
                settings,
            ))
        }
        FeedKind::Rest => {
            let poller = DeltaPoller::new(catalog, store.clone(), health, cfg.poll_interval());
            Arc::new(AssetMonitor::new(
                Arc::new(poller),
                store,
                directory,
                state.clone(),
                notifier.clone(),
                settings,
            ))
        }
    };
    Ok(monitor)
}
