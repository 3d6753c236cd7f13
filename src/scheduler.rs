/// Update scheduler
/// Drives the sensor's update cycle the way a host would: once at start, on
/// every scan interval, and whenever the custom target time changes.

use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sensor::WorldClockSensor;
use crate::server::Publisher;
use crate::store::{StateChange, CUSTOM_TIME_ENTITY};

/// Why an update cycle ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Scan interval elapsed (the first tick fires immediately)
    Poll,
    /// The custom target time changed
    StateChanged,
}

/// Testable: which state changes should re-run the update cycle
pub fn trigger_for(change: &StateChange) -> Option<Trigger> {
    (change.entity_id == CUSTOM_TIME_ENTITY).then_some(Trigger::StateChanged)
}

/// Format duration for logging
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let rem = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, rem)
    } else {
        format!("{}s", rem)
    }
}

/// Run one update cycle and publish its result
pub async fn run_update(sensor: &mut WorldClockSensor, publisher: &Publisher, trigger: Trigger) {
    debug!("Update triggered by {:?}", trigger);
    let result = sensor.update().await;
    match &result {
        Ok(state) if state.notification.was_due() => {
            info!("Reminder minute reached: {:?}", state.notification);
        }
        Ok(_) => {}
        Err(e) => warn!("Update failed, keeping previous value: {}", e),
    }
    publisher.publish(&result);
}

/// Run the scheduler loop until cancelled.
///
/// Updates are strictly sequential: a change that arrives mid-cycle is
/// handled after the cycle completes.
pub async fn run_scheduler(
    sensor: &mut WorldClockSensor,
    mut changes: broadcast::Receiver<StateChange>,
    scan_interval: Duration,
    publisher: &Publisher,
    cancel_token: CancellationToken,
) {
    info!("Scheduler started (updating every {})", format_duration(scan_interval));

    let mut ticker = interval(scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut listening = true;

    loop {
        let trigger = tokio::select! {
            _ = cancel_token.cancelled() => {
                match publisher.current() {
                    Some(last) => info!("Scheduler shutting down, last value: {}", last.state),
                    None => info!("Scheduler shutting down before the first update"),
                }
                break;
            }
            _ = ticker.tick() => Trigger::Poll,
            change = changes.recv(), if listening => match change {
                Ok(change) => match trigger_for(&change) {
                    Some(trigger) => trigger,
                    None => continue,
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} state changes, updating now", skipped);
                    Trigger::StateChanged
                }
                Err(RecvError::Closed) => {
                    warn!("State change stream closed; continuing with polling only");
                    listening = false;
                    continue;
                }
            },
        };

        run_update(sensor, publisher, trigger).await;
    }
}
