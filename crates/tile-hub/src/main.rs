use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tile_core::DEFAULT_MAX_FRAME_BYTES;
use tile_hub::{
    logging::{self, Logging},
    server::{Server, ServerConfig, DEFAULT_QUEUE_CAPACITY},
    WmConfig, WmModel,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
struct Config {
    socket_path: PathBuf,
    config_path: PathBuf,
    debug: bool,
    log_dir: String,
    max_frame_bytes: usize,
}

#[derive(Parser, Debug)]
#[command(name = "tile-hub", about = "Window-manager control hub serving the command tree on a unix socket")]
struct Args {
    #[arg(long, default_value = "")]
    socket: String,
    #[arg(long, default_value = "")]
    config: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = load_config();
    let mut logging = init_logging(&config);

    let layout = match WmConfig::load(&config.config_path) {
        Ok(layout) => layout,
        Err(err) => {
            error!(event = "config_error", path = %config.config_path.display(), error = %err);
            return ExitCode::FAILURE;
        }
    };

    let mut model = WmModel::new(&layout);
    model.set_socket_path(config.socket_path.display().to_string());
    if let Some(logging) = logging.as_mut() {
        if let Some(hook) = logging.reload.take() {
            model.set_log_level_hook(&logging.level_name, hook);
        }
    }

    let server = match Server::bind(ServerConfig {
        socket_path: config.socket_path.clone(),
        max_frame_bytes: config.max_frame_bytes,
        queue_capacity: DEFAULT_QUEUE_CAPACITY,
    }) {
        Ok(server) => server,
        Err(err) => {
            error!(event = "hub_bind_error", socket = %config.socket_path.display(), error = %err);
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!(event = "hub_signal");
        let _ = shutdown_tx.send(true);
    });

    info!(
        event = "hub_start",
        socket = %config.socket_path.display(),
        config = %config.config_path.display(),
        log_file = ?logging.as_ref().and_then(|logging| logging.file.path()),
        groups = layout.groups.len(),
        screens = layout.screens.len()
    );

    match server.run(model, shutdown_rx).await {
        Ok(_) => {
            info!(event = "hub_stop");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(event = "hub_error", error = %err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(event = "hub_signal_error", error = %err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        socket_path: resolve_socket_path(&args.socket),
        config_path: resolve_config_path(&args.config),
        debug: args.debug || env_true("TILE_HUB_DEBUG"),
        log_dir: resolve_log_dir(&args.log_dir),
        max_frame_bytes: args.max_frame_bytes,
    }
}

fn init_logging(config: &Config) -> Option<Logging> {
    let level = if config.debug {
        "debug".to_string()
    } else {
        non_empty_env("TILE_LOG_LEVEL").unwrap_or_else(|| "info".to_string())
    };
    logging::init(&level, &config.log_dir)
}

fn resolve_socket_path(arg: &str) -> PathBuf {
    if !arg.trim().is_empty() {
        return PathBuf::from(arg.trim());
    }
    tile_core::default_socket_path()
}

fn resolve_config_path(arg: &str) -> PathBuf {
    if !arg.trim().is_empty() {
        return PathBuf::from(arg.trim());
    }
    if let Some(path) = non_empty_env("TILE_CONFIG") {
        return PathBuf::from(path);
    }
    let config_dir = non_empty_env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| non_empty_env("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    config_dir.join("tilewm").join("config.toml")
}

fn resolve_log_dir(arg: &str) -> String {
    if !arg.trim().is_empty() {
        return arg.trim().to_string();
    }
    non_empty_env("TILE_LOG_DIR").unwrap_or_default()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
