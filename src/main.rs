mod accounts;
mod config;
mod logging;
mod pools;
mod protocol;
mod queues;
mod runtime;
mod server;
mod shutdown;
mod storage;
mod tasks;
mod utils;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use logging::{LogLevel, Logger, LoggerConfig};
use runtime::FileServerRuntime;
use serde_json::json;
use shutdown::ShutdownHooks;
use utils::runtime::ensure_posix_or_exit;
use utils::startup_banner::print_startup_banner;
use utils::timing::measure_execution;

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    ensure_posix_or_exit();
    print_startup_banner();

    let app_config = load_config_or_exit();
    let logger_config = LoggerConfig::from_app_config(&app_config.logging).unwrap_or_else(|| {
        eprintln!(
            "invalid logging.level '{}'. Allowed values: {}",
            app_config.logging.level,
            LogLevel::ALLOWED_VALUES
        );
        process::exit(2);
    });
    let logger = Arc::new(Logger::new(logger_config));

    let shutdown_hooks = ShutdownHooks::install().unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });
    logger.info(
        Some("main::shutdown"),
        "Shutdown hooks installed for SIGINT/SIGTERM",
    );

    let runtime = measure_execution("runtime.start", Some("main"), &logger, || {
        FileServerRuntime::start(&app_config, Arc::clone(&logger))
    })
    .unwrap_or_else(|error| {
        eprintln!("{error}");
        process::exit(2);
    });
    logger.log(
        LogLevel::Info,
        Some("main::server"),
        &format!(
            "{} v{} listening",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        Some(json!({
            "bind_address": runtime.local_addr().to_string(),
            "host": app_config.server.host,
            "port": app_config.server.port,
        })),
    );

    shutdown_hooks.wait(SIGNAL_POLL_INTERVAL);
    logger.info(
        Some("main::shutdown"),
        "Shutdown signal received, starting graceful shutdown",
    );

    let report = runtime.shutdown();
    if !report.is_clean() {
        logger.error(
            Some("main::shutdown"),
            "Graceful shutdown timed out; exiting with forced-termination status",
        );
        process::exit(shutdown::FORCED_EXIT_CODE);
    }
    logger.info(
        Some("main::shutdown"),
        "TCP server stopped and shutdown completed",
    );
}

fn load_config_or_exit() -> AppConfig {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}
