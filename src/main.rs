//! StageCue Gateway - Rust implementation
//!
//! Stage cue controller: N button/LED/OLED channels with a REST + WebSocket
//! control surface and a Wi-Fi captive-portal fallback.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagecue_gw::config::AppConfig;
use stagecue_gw::cues::{
    now_ms, open_database, CueBroadcaster, CueController, CueRegistry, KvStore, SledStore,
    CUE_NAMESPACE, WIFI_NAMESPACE,
};
use stagecue_gw::hw::{ConsoleButtonBank, ConsoleDisplayBank, ConsoleLedBank};
use stagecue_gw::net::{NmcliBackend, WifiManager};
use stagecue_gw::paths::AppPaths;
use stagecue_gw::server::{start_server, ApiState};

/// StageCue Gateway - drive stage cue lights over the network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Override the configured HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Skip Wi-Fi management (development hosts on wired networks)
    #[arg(long)]
    skip_wifi: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = AppPaths::detect(&args.config);
    paths.ensure_directories().ok();

    let _log_guard = init_logging(&args.log_level, &paths)?;

    info!("Starting StageCue Gateway...");
    info!("Configuration file: {}", args.config);

    // Load configuration; a missing file runs on compiled-in defaults.
    let config = if Path::new(&args.config).exists() {
        AppConfig::load(&args.config).await?
    } else {
        warn!("⚠️  {} not found, using default configuration", args.config);
        AppConfig::default()
    };
    let config = Arc::new(config);
    info!(
        "Configuration loaded: {} cue channels, device '{}'",
        config.cues.len(),
        config.device_name
    );

    // Open the state database. Persistence failures are never fatal: the
    // controller runs on in-memory defaults without a store.
    let (cue_store, wifi_store) = match open_database(paths.sled_db_path()) {
        Ok(db) => {
            let cues = SledStore::open(&db, CUE_NAMESPACE)
                .map(|s| Arc::new(s) as Arc<dyn KvStore>)
                .ok();
            let wifi = SledStore::open(&db, WIFI_NAMESPACE)
                .map(|s| Arc::new(s) as Arc<dyn KvStore>)
                .ok();
            (cues, wifi)
        }
        Err(e) => {
            warn!("⚠️  State database unavailable ({}), using defaults", e);
            (None, None)
        }
    };

    // Build the controller around the configured channels.
    let channel_count = config.cues.len();
    let broadcaster = CueBroadcaster::new();
    let registry = CueRegistry::new(config.default_texts(), config.max_text_length);
    let mut controller = CueController::new(
        registry,
        config.control_settings(),
        Box::new(ConsoleLedBank::new(channel_count)),
        Box::new(ConsoleButtonBank),
        Box::new(ConsoleDisplayBank::new(channel_count)),
        cue_store,
        broadcaster.clone(),
    );
    controller.initialize();
    let controller = Arc::new(Mutex::new(controller));

    // Wi-Fi: saved credentials with bounded retries, portal fallback.
    let wifi = Arc::new(WifiManager::new(
        Box::new(NmcliBackend::new(config.wifi.interface.clone())),
        wifi_store,
        config.wifi.clone(),
    ));
    if args.skip_wifi {
        info!("Skipping Wi-Fi management (--skip-wifi)");
    } else if wifi.start().await {
        info!("✅ Wi-Fi station connected");
    } else {
        info!("📶 Running in portal mode");
    }

    let (restart_tx, mut restart_rx) = mpsc::channel::<()>(1);

    let state = Arc::new(ApiState {
        controller: controller.clone(),
        broadcaster,
        wifi,
        config: config.clone(),
        started_at: Instant::now(),
        restart_tx,
    });

    // Control loop: debounce sampling, auto-clear, housekeeping.
    let tick_interval = config.timing.tick_interval_ms;
    let loop_controller = controller.clone();
    let control_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(tick_interval));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            loop_controller.lock().tick(now_ms());
        }
    });

    let port = args.port.unwrap_or(config.http_port);
    let server_task = tokio::spawn(start_server(state, port));

    info!("Ready: http://0.0.0.0:{}", port);

    let mut restart_requested = false;
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping");
        }
        _ = restart_rx.recv() => {
            info!("♻️  Restart requested after credential save");
            restart_requested = true;
        }
        result = server_task => {
            match result {
                Ok(Err(e)) => warn!("❌ Web server failed: {}", e),
                Err(e) => warn!("❌ Web server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    control_task.abort();
    if restart_requested {
        // Exit cleanly and let the service supervisor start us again with
        // the new credentials.
        info!("StageCue Gateway exiting for restart");
    } else {
        info!("StageCue Gateway shutdown complete");
    }
    Ok(())
}

fn init_logging(
    level: &str,
    paths: &AppPaths,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    if paths.logs_dir.exists() {
        let appender = tracing_appender::rolling::daily(&paths.logs_dir, "stagecue.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        Ok(None)
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
}
