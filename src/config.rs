use anyhow::{bail, Context, Result};
use lettre::message::Mailbox;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::format::validate_pattern;
use crate::notify::{EmailSettings, DEFAULT_SMTP_RELAY, SMTP_SUBMISSION_PORT};
use crate::redact;
use crate::time::{parse_zone, TargetTime};

pub const DEFAULT_NAME: &str = "Worldclock Sensor";
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M";

#[derive(Clone)]
pub struct Config {
    // Clocks
    pub time_zone: String,
    /// Default secondary zone, used until the live selection is available
    pub second_time_zone: String,
    pub first_city_name: Option<String>,
    pub second_city_name: Option<String>,
    pub name: String,
    pub time_format: String,

    // Reminder email (all three or none)
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub password: Option<String>,

    // SMTP relay
    pub smtp_relay: String,
    pub smtp_port: u16,
    pub smtp_timeout_secs: u64,

    // Host polling interval for the update cycle
    pub scan_interval_secs: u64,

    // Send at most one reminder per matching minute
    pub notify_once_per_minute: bool,

    // Seed for the custom-time entity when no state file provides it
    pub custom_time: Option<String>,

    // JSON file of entity values, re-read every scan interval (optional)
    pub state_file: Option<String>,

    // Sensor HTTP endpoint port (optional, disabled if not set)
    // When set, exposes /state, /health, and /metrics endpoints
    pub sensor_port: Option<u16>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("time_zone", &self.time_zone)
            .field("second_time_zone", &self.second_time_zone)
            .field("first_city_name", &self.first_city_name)
            .field("second_city_name", &self.second_city_name)
            .field("name", &self.name)
            .field("time_format", &self.time_format)
            .field("sender", &self.sender.as_deref().map(redact::email))
            .field("receiver", &self.receiver.as_deref().map(redact::email))
            .field("password", &self.password.as_deref().map(redact::secret))
            .field("smtp_relay", &self.smtp_relay)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_timeout_secs", &self.smtp_timeout_secs)
            .field("scan_interval_secs", &self.scan_interval_secs)
            .field("notify_once_per_minute", &self.notify_once_per_minute)
            .field("custom_time", &self.custom_time)
            .field("state_file", &self.state_file)
            .field("sensor_port", &self.sensor_port)
            .finish()
    }
}

/// Parse a boolean switch; anything unrecognised is off
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty optional values count as unset
        let opt = |key: &str| get(key).filter(|s| !s.trim().is_empty());

        Ok(Config {
            time_zone: get("TIME_ZONE").context("TIME_ZONE not set")?,
            second_time_zone: get("SECOND_TIME_ZONE").context("SECOND_TIME_ZONE not set")?,
            first_city_name: opt("FIRST_CITY_NAME"),
            second_city_name: opt("SECOND_CITY_NAME"),
            name: opt("SENSOR_NAME").unwrap_or_else(|| DEFAULT_NAME.to_string()),
            time_format: get("TIME_FORMAT").unwrap_or_else(|| DEFAULT_TIME_FORMAT.to_string()),

            sender: opt("SENDER"),
            receiver: opt("RECEIVER"),
            password: opt("PASSWORD"),

            smtp_relay: opt("SMTP_RELAY").unwrap_or_else(|| DEFAULT_SMTP_RELAY.to_string()),
            smtp_port: opt("SMTP_PORT")
                .unwrap_or_else(|| SMTP_SUBMISSION_PORT.to_string())
                .parse()
                .context("SMTP_PORT must be a valid port number")?,
            smtp_timeout_secs: opt("SMTP_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            scan_interval_secs: opt("SCAN_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            notify_once_per_minute: opt("NOTIFY_ONCE_PER_MINUTE")
                .map(|s| parse_flag(&s))
                .unwrap_or(false),

            custom_time: opt("CUSTOM_TIME"),
            state_file: opt("STATE_FILE"),

            sensor_port: opt("SENSOR_PORT").and_then(|s| s.parse().ok()),
        })
    }

    /// Email settings when sender, receiver and password are all present
    pub fn email_settings(&self) -> Option<EmailSettings> {
        match (&self.sender, &self.receiver, &self.password) {
            (Some(sender), Some(receiver), Some(password)) => Some(EmailSettings {
                sender: sender.clone(),
                receiver: receiver.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_secs)
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        for (key, zone) in [
            ("TIME_ZONE", &self.time_zone),
            ("SECOND_TIME_ZONE", &self.second_time_zone),
        ] {
            if let Err(e) = parse_zone(zone) {
                errors.push(format!("{}: {}.", key, e));
            }
        }

        if let Err(e) = validate_pattern(&self.time_format) {
            errors.push(format!("TIME_FORMAT: {}.", e));
        }

        match (&self.custom_time, &self.state_file) {
            (None, None) => errors.push(
                "Either CUSTOM_TIME or STATE_FILE must provide the custom target time."
                    .to_string(),
            ),
            (Some(custom_time), _) => {
                if let Err(e) = custom_time.parse::<TargetTime>() {
                    errors.push(format!("CUSTOM_TIME: {}.", e));
                }
            }
            (None, Some(_)) => {}
        }

        if let Some(path) = &self.state_file {
            if !Path::new(path).exists() {
                errors.push(format!("STATE_FILE '{}' does not exist.", path));
            }
        }

        let email_fields = [
            ("SENDER", &self.sender),
            ("RECEIVER", &self.receiver),
            ("PASSWORD", &self.password),
        ];
        let present = email_fields.iter().filter(|(_, v)| v.is_some()).count();
        if present > 0 && present < email_fields.len() {
            let missing: Vec<&str> = email_fields
                .iter()
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| *k)
                .collect();
            errors.push(format!(
                "Email reminders need SENDER, RECEIVER and PASSWORD; missing {}.",
                missing.join(", ")
            ));
        }

        for (key, address) in [("SENDER", &self.sender), ("RECEIVER", &self.receiver)] {
            if let Some(address) = address {
                if address.parse::<Mailbox>().is_err() {
                    errors.push(format!(
                        "{} '{}' is not a valid email address.",
                        key,
                        redact::email(address)
                    ));
                }
            }
        }

        if self.smtp_timeout_secs == 0 {
            errors.push("SMTP_TIMEOUT_SECS must be greater than 0.".to_string());
        }

        if self.scan_interval_secs == 0 {
            errors.push("SCAN_INTERVAL_SECS must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    proptest! {
        #[test]
        fn smtp_port_parsing_never_panics(port_str in ".*") {
            let mut env: HashMap<&str, String> = HashMap::new();
            env.insert("TIME_ZONE", "UTC".to_string());
            env.insert("SECOND_TIME_ZONE", "Asia/Tokyo".to_string());
            env.insert("SMTP_PORT", port_str);

            let _ = Config::from_getter(|key| env.get(key).cloned());
        }

        #[test]
        fn valid_custom_times_validate(hour in 0u32..24, minute in 0u32..60) {
            let mut env: HashMap<&str, String> = HashMap::new();
            env.insert("TIME_ZONE", "UTC".to_string());
            env.insert("SECOND_TIME_ZONE", "Asia/Tokyo".to_string());
            env.insert("CUSTOM_TIME", format!("{:02}:{:02}", hour, minute));

            let config = Config::from_getter(|key| env.get(key).cloned()).unwrap();
            prop_assert!(config.validate().is_ok());
        }
    }
}
