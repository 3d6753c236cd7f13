//! Keyed external values the clock reads, plus change notification.
//!
//! The host application owns these values; the clock only reads them.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Custom target time, `"HH:MM[:SS]"`; read once at setup
pub const CUSTOM_TIME_ENTITY: &str = "input_datetime.custom_time_secondary_zone";

/// Currently selected secondary zone identifier; read every update
pub const SECONDARY_ZONE_ENTITY: &str = "input_select.world_clock_secondary_time_zone";

/// Buffered changes before a slow subscriber starts lagging
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Read access to keyed external state
pub trait StateStore: Send + Sync {
    fn get(&self, entity_id: &str) -> Option<String>;
}

/// A value transition observed by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub entity_id: String,
    pub old: Option<String>,
    pub new: String,
}

/// In-process store that broadcasts value changes
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<StateChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Set a value; subscribers hear about it only if it differs from the current one.
    /// Returns whether the value changed.
    pub fn set(&self, entity_id: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        let old = {
            let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
            if values.get(entity_id) == Some(&value) {
                return false;
            }
            values.insert(entity_id.to_string(), value.clone())
        };

        debug!("State {} changed: {:?} -> {:?}", entity_id, old, value);
        // No subscribers is fine
        let _ = self.changes.send(StateChange {
            entity_id: entity_id.to_string(),
            old,
            new: value,
        });
        true
    }

    /// Apply a batch of values; returns how many changed
    pub fn apply(&self, values: HashMap<String, String>) -> usize {
        let mut changed = 0;
        for (entity_id, value) in values {
            if self.set(&entity_id, value) {
                changed += 1;
            }
        }
        changed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, entity_id: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(entity_id)
            .cloned()
    }
}

/// Parse a flat JSON object of entity id -> string value
pub fn parse_state_json(json: &str) -> Result<HashMap<String, String>> {
    serde_json::from_str(json).context("State file must be a JSON object of string values")
}

/// Read a state file written by the host
pub fn load_state_file(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;
    parse_state_json(&json).with_context(|| format!("Invalid state file {}", path.display()))
}

/// Re-read a state file every `period` and apply it to the store until cancelled.
///
/// Read or parse errors keep the previous values.
pub async fn watch_state_file(
    path: PathBuf,
    store: Arc<MemoryStore>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match load_state_file(&path) {
            Ok(values) => {
                let changed = store.apply(values);
                if changed > 0 {
                    info!("{} state value(s) changed in {}", changed, path.display());
                }
            }
            Err(e) => warn!("Keeping previous state: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.get(CUSTOM_TIME_ENTITY), None);
    }

    #[test]
    fn test_set_and_get() {
        let store = MemoryStore::new();
        assert!(store.set(CUSTOM_TIME_ENTITY, "10:30:00"));
        assert_eq!(store.get(CUSTOM_TIME_ENTITY).as_deref(), Some("10:30:00"));
    }

    #[test]
    fn test_set_broadcasts_only_on_change() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        assert!(store.set(SECONDARY_ZONE_ENTITY, "Europe/London"));
        assert!(!store.set(SECONDARY_ZONE_ENTITY, "Europe/London"));
        assert!(store.set(SECONDARY_ZONE_ENTITY, "Asia/Tokyo"));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.entity_id, SECONDARY_ZONE_ENTITY);
        assert_eq!(first.old, None);
        assert_eq!(first.new, "Europe/London");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.old.as_deref(), Some("Europe/London"));
        assert_eq!(second.new, "Asia/Tokyo");

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_set_without_subscribers() {
        let store = MemoryStore::new();
        assert!(store.set(CUSTOM_TIME_ENTITY, "08:00"));
    }

    #[test]
    fn test_apply_counts_changes() {
        let store = MemoryStore::new();
        store.set(CUSTOM_TIME_ENTITY, "10:30");

        let mut batch = HashMap::new();
        batch.insert(CUSTOM_TIME_ENTITY.to_string(), "10:30".to_string());
        batch.insert(SECONDARY_ZONE_ENTITY.to_string(), "Europe/Paris".to_string());

        assert_eq!(store.apply(batch), 1);
        assert_eq!(store.get(SECONDARY_ZONE_ENTITY).as_deref(), Some("Europe/Paris"));
    }

    #[test]
    fn test_parse_state_json() {
        let values = parse_state_json(
            r#"{"input_datetime.custom_time_secondary_zone": "10:30:00",
                "input_select.world_clock_secondary_time_zone": "Europe/London"}"#,
        )
        .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[CUSTOM_TIME_ENTITY], "10:30:00");
    }

    #[test]
    fn test_parse_state_json_rejects_non_string_values() {
        assert!(parse_state_json(r#"{"a": 1}"#).is_err());
        assert!(parse_state_json(r#"["a"]"#).is_err());
        assert!(parse_state_json("").is_err());
    }

    #[test]
    fn test_load_state_file_missing() {
        let err = load_state_file("/nonexistent/worldclock-state.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read state file"));
    }

    #[test]
    fn test_load_state_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("worldclock-state-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"input_select.world_clock_secondary_time_zone": "Asia/Tokyo"}"#)
            .unwrap();

        let values = load_state_file(&path).unwrap();
        assert_eq!(values[SECONDARY_ZONE_ENTITY], "Asia/Tokyo");

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_watch_state_file_applies_changes() {
        let path = std::env::temp_dir().join(format!("worldclock-watch-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"input_datetime.custom_time_secondary_zone": "10:30"}"#).unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut rx = store.subscribe();
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(watch_state_file(
            path.clone(),
            store.clone(),
            Duration::from_millis(20),
            cancel_token.clone(),
        ));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("first load should be applied")
            .unwrap();
        assert_eq!(first.new, "10:30");

        std::fs::write(&path, r#"{"input_datetime.custom_time_secondary_zone": "11:45"}"#).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("change should be applied")
            .unwrap();
        assert_eq!(second.old.as_deref(), Some("10:30"));
        assert_eq!(second.new, "11:45");

        cancel_token.cancel();
        handle.await.unwrap();
        std::fs::remove_file(&path).ok();
    }
}
