//! World clock sensor: the update cycle tying time source, formatter and
//! notifier together.
//!
//! The host calls [`WorldClockSensor::setup`] once, then
//! [`WorldClockSensor::update`] whenever it wants a fresh value. Calls must
//! be serialized; the sensor takes `&mut self` to enforce it.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ClockError, Result};
use crate::format::{format_pair, validate_pattern};
use crate::notify::{EmailSettings, Notifier, NotifyOutcome};
use crate::store::{StateStore, CUSTOM_TIME_ENTITY, SECONDARY_ZONE_ENTITY};
use crate::time::{parse_zone, zone_time, Clock, TargetTime};

pub const SENSOR_ICON: &str = "mdi:clock";

/// Immutable sensor settings, resolved once at setup
#[derive(Debug, Clone)]
pub struct ClockConfig {
    pub name: String,
    pub primary_zone: Tz,
    /// Used whenever the live zone selection is unavailable
    pub default_secondary_zone: Tz,
    pub primary_label: Option<String>,
    pub secondary_label: Option<String>,
    pub pattern: String,
    pub target: TargetTime,
    pub email: Option<EmailSettings>,
    pub notify_once_per_minute: bool,
}

impl ClockConfig {
    /// Resolve zones and pattern from host configuration
    pub fn from_config(config: &Config, target: TargetTime) -> Result<Self> {
        validate_pattern(&config.time_format)?;
        Ok(Self {
            name: config.name.clone(),
            primary_zone: parse_zone(&config.time_zone)?,
            default_secondary_zone: parse_zone(&config.second_time_zone)?,
            primary_label: config.first_city_name.clone(),
            secondary_label: config.second_city_name.clone(),
            pattern: config.time_format.clone(),
            target,
            email: config.email_settings(),
            notify_once_per_minute: config.notify_once_per_minute,
        })
    }
}

/// Mutable per-sensor state, refreshed by every update
#[derive(Debug, Clone, PartialEq)]
pub struct ClockState {
    pub secondary_zone: Tz,
    pub display: Option<String>,
    /// Minutes since the epoch of the last delivered reminder
    pub last_sent_minute: Option<i64>,
}

/// Published sensor value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayState {
    pub name: String,
    pub state: String,
    pub icon: &'static str,
    pub secondary_zone: String,
    pub notification: NotifyOutcome,
    pub last_updated: DateTime<Utc>,
}

pub struct WorldClockSensor {
    config: ClockConfig,
    state: ClockState,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    notifier: Notifier,
}

impl WorldClockSensor {
    pub fn new(
        config: ClockConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn StateStore>,
        notifier: Notifier,
    ) -> Self {
        let state = ClockState {
            secondary_zone: config.default_secondary_zone,
            display: None,
            last_sent_minute: None,
        };
        Self {
            config,
            state,
            clock,
            store,
            notifier,
        }
    }

    /// Capture the target time from the custom-time entity and build the sensor.
    ///
    /// The target is read exactly once; later changes to the entity trigger
    /// updates but do not move the target.
    pub fn setup(
        config: &Config,
        clock: Arc<dyn Clock>,
        store: Arc<dyn StateStore>,
        notifier: Notifier,
    ) -> Result<Self> {
        let raw = store
            .get(CUSTOM_TIME_ENTITY)
            .ok_or_else(|| ClockError::MissingState(CUSTOM_TIME_ENTITY.to_string()))?;
        let target: TargetTime = raw.parse()?;
        info!("Reminder target captured: {}", target);

        let clock_config = ClockConfig::from_config(config, target)?;
        Ok(Self::new(clock_config, clock, store, notifier))
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn state(&self) -> &ClockState {
        &self.state
    }

    /// Run one update cycle.
    ///
    /// Fails on an unknown live zone selection or an unrenderable pattern; the
    /// previous display is kept in that case. Notification problems never fail.
    pub async fn update(&mut self) -> Result<DisplayState> {
        let secondary_zone = self.live_secondary_zone()?;

        let instant = self.clock.now();
        let primary = zone_time(instant, self.config.primary_zone);
        let secondary = zone_time(instant, secondary_zone);

        let rendered = format_pair(
            &primary,
            &secondary,
            self.config.primary_label.as_deref(),
            self.config.secondary_label.as_deref(),
            &self.config.pattern,
        )?;

        let notification = self.evaluate_notifier(instant, &secondary).await;

        self.state.secondary_zone = secondary_zone;
        self.state.display = Some(rendered.clone());
        debug!("{} updated: {}", self.config.name, rendered);

        Ok(DisplayState {
            name: self.config.name.clone(),
            state: rendered,
            icon: SENSOR_ICON,
            secondary_zone: secondary_zone.name().to_string(),
            notification,
            last_updated: instant,
        })
    }

    fn live_secondary_zone(&self) -> Result<Tz> {
        match self.store.get(SECONDARY_ZONE_ENTITY) {
            Some(id) => parse_zone(&id),
            None => {
                debug!(
                    "{} unavailable, using {}",
                    SECONDARY_ZONE_ENTITY,
                    self.config.default_secondary_zone.name()
                );
                Ok(self.config.default_secondary_zone)
            }
        }
    }

    async fn evaluate_notifier(
        &mut self,
        instant: DateTime<Utc>,
        secondary: &DateTime<Tz>,
    ) -> NotifyOutcome {
        let target = self.config.target;
        let minute = instant.timestamp().div_euclid(60);

        if self.config.notify_once_per_minute
            && self.state.last_sent_minute == Some(minute)
            && target.matches(secondary)
        {
            info!("Reminder for {} already sent this minute", target);
            return NotifyOutcome::Suppressed;
        }

        let outcome = self
            .notifier
            .maybe_notify(secondary, target, self.config.email.as_ref())
            .await;
        if outcome == NotifyOutcome::Sent {
            self.state.last_sent_minute = Some(minute);
        }
        outcome
    }
}
