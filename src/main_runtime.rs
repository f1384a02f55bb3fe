use goalwatch::adapters::{
    ApiFootballProvider, LiveMatchProvider, LogChannel, NotificationChannel, RetryPolicy,
    RetryingProvider, TelegramChannel,
};
use goalwatch::config::{AppConfig, LoggingConfig};
use goalwatch::coordination::{wait_for_os_signal, GracefulShutdown};
use goalwatch::error::{GoalwatchError, Result};
use goalwatch::persistence::{FileTrackingStore, TrackingStore};
use goalwatch::services::{
    CycleDriver, DriverControl, HealthServer, HealthState, Metrics, Notifier,
};
use goalwatch::tracking::{EngineConfig, ReconciliationEngine};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. The returned guard flushes the file writer
/// and must live as long as the process.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},goalwatch={}", config.level, config.level)));

    // `rolling::daily` panics if it cannot create the first file, so check writability first
    let (file_layer, guard) = match &config.dir {
        Some(dir) => match std::fs::create_dir_all(dir).and_then(|_| {
            let probe = dir.join(".goalwatch_write_test");
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&probe)
                .and_then(|_| std::fs::remove_file(&probe))
        }) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "goalwatch.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true);
                let layer = if config.json {
                    layer.json().boxed()
                } else {
                    layer.boxed()
                };
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    dir.display(),
                    e
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    let console_layer = if config.json {
        console_layer.json().boxed()
    } else {
        console_layer.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(dir) = config.dir.as_ref().filter(|_| guard.is_some()) {
        eprintln!("Logging to: {}/goalwatch.log", dir.display());
    }
    guard
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn build_notifier(config: &AppConfig, metrics: Arc<Metrics>) -> Result<Notifier> {
    let telegram = if config.telegram.is_configured() {
        TelegramChannel::from_config(&config.telegram)?
    } else {
        None
    };

    let (channel, destination): (Arc<dyn NotificationChannel>, String) =
        match (telegram, config.telegram.chat_id) {
            (Some(channel), Some(chat_id)) => (Arc::new(channel), chat_id.to_string()),
            _ => {
                warn!("Telegram not configured, notifications will only be logged");
                (Arc::new(LogChannel), "dry-run".to_string())
            }
        };
    Ok(Notifier::new(channel, destination).with_metrics(metrics))
}

fn build_driver(config: &AppConfig, metrics: Arc<Metrics>) -> Result<CycleDriver> {
    let api = ApiFootballProvider::new(&config.provider)?.with_metrics(metrics.clone());
    let provider: Arc<dyn LiveMatchProvider> = Arc::new(RetryingProvider::new(
        api,
        RetryPolicy::from(&config.provider),
    ));
    let store: Arc<dyn TrackingStore> =
        Arc::new(FileTrackingStore::new(&config.storage.state_dir));
    let engine = ReconciliationEngine::new(EngineConfig::from(&config.tracking))
        .with_metrics(metrics.clone());
    let notifier = build_notifier(config, metrics.clone())?;
    let control = Arc::new(DriverControl::new(
        config.effective_poll_interval(),
        config.min_poll_interval(),
    ));

    Ok(
        CycleDriver::new(provider, store, engine, notifier, control, metrics)
            .with_fetch_timeout(config.fetch_timeout())
            .with_event_lookups(config.provider.event_lookups),
    )
}

fn ensure_valid(config: &AppConfig) -> Result<()> {
    config.validate().map_err(GoalwatchError::InvalidConfig)
}

/// Run the watcher until SIGINT/SIGTERM, or a single cycle with `once`.
pub async fn run_service(config: AppConfig, once: bool) -> Result<()> {
    ensure_valid(&config)?;

    let metrics = Arc::new(Metrics::new());
    let mut driver = build_driver(&config, metrics.clone())?;

    if once {
        let summary = driver.run_cycle().await?;
        info!(
            fetched = summary.fetched,
            notifications = summary.notifications,
            delivered = summary.delivered,
            "Single cycle finished"
        );
        return Ok(());
    }

    let control = driver.control();
    let shutdown = Arc::new(GracefulShutdown::with_defaults());
    let driver_handle = tokio::spawn(driver.run(shutdown.token()));

    let server_handle = config.health_port.map(|port| {
        let server = HealthServer::new(Arc::new(HealthState::new(control.clone(), metrics)), port);
        let mut token = shutdown.token();
        tokio::spawn(async move {
            let stop = async move {
                token.wait_for_shutdown().await;
            };
            if let Err(e) = server.run(stop).await {
                error!(error = %e, "Health server failed");
            }
        })
    });

    let signal = wait_for_os_signal().await;
    shutdown.request_shutdown(signal);

    let drain = async {
        if let Err(e) = driver_handle.await {
            error!(error = %e, "Cycle driver task panicked");
        }
    };
    let stop_server = async {
        if let Some(handle) = server_handle {
            let _ = handle.await;
        }
    };
    if let Err(e) = shutdown
        .execute(drain, control.seal_commits(), stop_server)
        .await
    {
        warn!(error = %e, "Shutdown did not complete cleanly");
    }
    Ok(())
}

/// Print store counts and the latest notified matches.
pub async fn show_status(config: &AppConfig) -> Result<()> {
    let store = FileTrackingStore::new(&config.storage.state_dir);
    let state = store.load().await;
    let counts = state.counts();

    println!("State directory: {}", store.dir().display());
    println!(
        "Tracked: {} ({} leading)  Notified: {}  Deadlisted: {}",
        counts.tracked, counts.leading, counts.notified, counts.deadlisted
    );

    let mut recent: Vec<_> = state
        .notified
        .iter()
        .filter_map(|(key, record)| record.notified_at.map(|at| (at, key, record)))
        .collect();
    recent.sort_by(|a, b| b.0.cmp(&a.0));
    for (at, key, record) in recent.into_iter().take(10) {
        println!(
            "  {}  {}  {} ; {}'  reliability {}",
            at.format("%Y-%m-%d %H:%M"),
            key,
            record.first_score,
            record
                .first_minute
                .map_or_else(|| "?".to_string(), |m| m.to_string()),
            record.reliability
        );
    }
    Ok(())
}

pub fn check_config(config: &AppConfig) -> Result<()> {
    match config.validate() {
        Ok(()) => {
            println!("Configuration OK");
            println!(
                "  poll interval: {}s (quota floor {}s, {} calls per cycle)",
                config.effective_poll_interval().as_secs(),
                config.min_poll_interval().as_secs(),
                config.provider.calls_per_cycle()
            );
            println!("  state dir: {}", config.storage.state_dir.display());
            println!(
                "  notifications: {}",
                if config.telegram.is_configured() {
                    "telegram"
                } else {
                    "log only"
                }
            );
            println!(
                "  health port: {}",
                config
                    .health_port
                    .map_or_else(|| "disabled".to_string(), |p| p.to_string())
            );
            Ok(())
        }
        Err(errors) => {
            for e in &errors {
                println!("  - {}", e);
            }
            Err(GoalwatchError::InvalidConfig(errors))
        }
    }
}
