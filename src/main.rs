pub mod models {
    pub mod ariston;
    pub mod domoticz;
}

pub mod client;
pub mod config;
pub mod domoticz;
pub mod envfile;
pub mod error;
pub mod host;
pub mod slots;
pub mod services {
    pub mod plugin;
    pub mod runtime;
    pub mod worker;
}

use crate::client::AristonClient;
use crate::config::Config;
use crate::domoticz::DomoticzHost;
use crate::services::plugin::{Plugin, PluginSettings};
use crate::services::runtime;
use crate::services::worker::{DEFAULT_TICK, WorkerSettings};
use log::{error, info};
use std::sync::atomic::AtomicBool;

/// Never set; the bridge runs until the process is terminated.
static STOP: AtomicBool = AtomicBool::new(false);

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (user={}, gateway={}, poll_interval={}s, heartbeat={}s, fallback_range={:.1}-{:.1}, debug={})",
        cfg.credentials.username,
        cfg.credentials
            .gateway
            .as_ref()
            .map(|g| g.to_string())
            .unwrap_or_else(|| "auto-detect".to_string()),
        cfg.poll_interval.as_secs(),
        cfg.heartbeat.as_secs(),
        cfg.fallback_bounds.min,
        cfg.fallback_bounds.max,
        cfg.debug
    );

    // 2) Connect to Domoticz
    let mut host = DomoticzHost::connect(
        &cfg.domoticz_url,
        cfg.domoticz_hardware_idx,
        &cfg.domoticz_device_prefix,
        cfg.command_timeout,
    )
    .map_err(|e| format!("Domoticz unreachable at {}: {}", cfg.domoticz_url, e))?;
    info!("Connected to Domoticz at {}", cfg.domoticz_url);

    // 3) Start plugin: devices and Ariston worker
    let api = AristonClient::new(&cfg.api_url, cfg.credentials.clone(), cfg.command_timeout);
    let mut plugin = Plugin::new(PluginSettings {
        worker: WorkerSettings {
            gateway: cfg.credentials.gateway.clone(),
            poll_interval: cfg.poll_interval,
            tick: DEFAULT_TICK,
            command_timeout: cfg.command_timeout,
        },
        fallback_bounds: cfg.fallback_bounds,
        shutdown_timeout: cfg.shutdown_timeout,
        status_check_every: cfg.status_check_heartbeats,
    });
    plugin
        .on_start(&mut host, api)
        .map_err(|e| format!("Plugin start failed: {}", e))?;
    info!("Ariston bridge started; first data expected within {}s", cfg.poll_interval.as_secs());

    // 4) Heartbeat loop
    runtime::run_loop(&mut plugin, &mut host, cfg.heartbeat, &STOP);
    Ok(())
}

fn main() {
    let loaded_env = match envfile::load_from_args(std::env::args_os().skip(1)) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG and LOG_MODE from .env are respected.
    let default_filter = env_logger::Env::default().default_filter_or(config::default_log_filter());
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "ariston-domoticz {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
