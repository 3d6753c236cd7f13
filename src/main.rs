use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use worldclock::cli::{parse_args, print_help};
use worldclock::config::Config;
use worldclock::notify::{Notifier, SmtpMailer};
use worldclock::redact;
use worldclock::scheduler::run_scheduler;
use worldclock::sensor::WorldClockSensor;
use worldclock::server::{run_sensor_server, Publisher, SensorMetrics};
use worldclock::store::{load_state_file, watch_state_file, MemoryStore, CUSTOM_TIME_ENTITY};
use worldclock::time::SystemClock;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("worldclock=info".parse()?),
        )
        .init();

    info!("worldclock v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Clocks: {} / {}", config.time_zone, config.second_time_zone);
    info!("  Format: \"{}\"", config.time_format);
    let mailer = Arc::new(SmtpMailer::new(config.smtp_relay.clone(), config.smtp_port));
    match config.email_settings() {
        Some(email) => info!(
            "  Reminder email: {} via {}:{}",
            redact::email(&email.receiver),
            mailer.relay(),
            mailer.port()
        ),
        None => info!("  Reminder email: disabled"),
    }

    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    // External state: CUSTOM_TIME seeds the target, a state file overrides it
    let store = Arc::new(MemoryStore::new());
    if let Some(custom_time) = &config.custom_time {
        store.set(CUSTOM_TIME_ENTITY, custom_time.as_str());
    }
    if let Some(path) = &config.state_file {
        let loaded = store.apply(load_state_file(path)?);
        info!("Loaded {} state value(s) from {}", loaded, path);
    }
    let changes = store.subscribe();

    let notifier = Notifier::new(mailer, config.smtp_timeout());
    let mut sensor = WorldClockSensor::setup(&config, Arc::new(SystemClock), store.clone(), notifier)
        .context("Sensor setup failed")?;

    if args.once {
        info!("Running single update (--once mode)");
        let current = sensor.update().await?;
        println!("{}", current.state);
        return Ok(());
    }

    let metrics = Arc::new(SensorMetrics::new());
    let publisher = Publisher::new(metrics.clone());
    let cancel_token = CancellationToken::new();

    if let Some(port) = config.sensor_port {
        tokio::spawn(run_sensor_server(
            port,
            publisher.subscribe(),
            metrics,
            cancel_token.clone(),
        ));
    }

    if let Some(path) = &config.state_file {
        tokio::spawn(watch_state_file(
            PathBuf::from(path),
            store.clone(),
            config.scan_interval(),
            cancel_token.clone(),
        ));
    }

    {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
            cancel_token.cancel();
        });
    }

    run_scheduler(
        &mut sensor,
        changes,
        config.scan_interval(),
        &publisher,
        cancel_token.clone(),
    )
    .await;

    cancel_token.cancel();
    Ok(())
}
