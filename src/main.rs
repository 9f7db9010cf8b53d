// Flight price watcher binary.
//
// Usage: flight-watch [CONFIG_PATH] [STATE_PATH]
//
// CONFIG_PATH defaults to config.txt and STATE_PATH to best_price.json, both
// in the working directory. RUST_LOG sets the log level (default: info).
// Exits with status 1 when the config is missing or invalid or the first
// authentication fails; otherwise runs until signalled.

use std::time::Duration;

use anyhow::Context;
use flight_fare_watch::telemetry::init_tracing;
use flight_fare_watch::{
    AmadeusAuth, AmadeusFareClient, EmailNotifier, FareWatcher, JsonFileStore, SystemClock, WatchConfig,
    WatcherParts,
};
use tokio::signal;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config.txt";
const DEFAULT_STATE_PATH: &str = "best_price.json";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    if config_path == "-h" || config_path == "--help" {
        println!("usage: flight-watch [CONFIG_PATH] [STATE_PATH]");
        return Ok(());
    }
    let state_path = args.next().unwrap_or_else(|| DEFAULT_STATE_PATH.to_string());

    init_tracing();
    info!(config = %config_path, state = %state_path, "Starting flight price checker");

    let config = WatchConfig::load(&config_path).with_context(|| format!("loading {}", config_path))?;
    info!(
        route = %config.route,
        api = %config.api_base_url,
        window_days = config.search.search_within_days,
        trip_days = config.search.trip_duration_days,
        interval_secs = config.search.check_interval.as_secs(),
        "Configuration loaded"
    );

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("building HTTP client")?;
    let notifier = EmailNotifier::new(&config.email, config.route.clone()).context("setting up email")?;

    let parts = WatcherParts {
        auth: Box::new(AmadeusAuth::new(
            client.clone(),
            &config.api_base_url,
            config.credentials.clone(),
        )),
        fares: Box::new(AmadeusFareClient::new(
            client,
            &config.api_base_url,
            config.search.max_offers,
        )),
        store: Box::new(JsonFileStore::new(&state_path)),
        notifier: Box::new(notifier),
        clock: Box::new(SystemClock),
    };
    let mut watcher = FareWatcher::new(config.route.clone(), config.search.clone(), parts);

    watcher
        .authenticate()
        .await
        .context("stopping due to authentication failure")?;

    tokio::select! {
        _ = watcher.run() => {}
        _ = shutdown_signal() => {}
    }
    info!(best = %watcher.best(), "Shutdown signal received, stopping");

    Ok(())
}

// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
