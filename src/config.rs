/// Tunable settings: defaults, validation, persistence and change notification
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{is_valid, normalize, sanitize_allow_list};
use crate::error::{FreezeError, Result};
use crate::storage::Storage;

pub const CONFIG_KEYS: [&str; 10] = [
    "freezeTimeoutMinutes",
    "freezePinnedTabs",
    "allowList",
    "enabled",
    "cleanupIntervalMinutes",
    "maxTabs",
    "snapshotQuality",
    "autoRecovery",
    "notificationsEnabled",
    "debugMode",
];

/// Keys written by earlier releases, read only when the current key is absent
const LEGACY_KEYS: [(&str, &str); 3] = [
    ("FreezeTimeout", "freezeTimeoutMinutes"),
    ("FreezePinned", "freezePinnedTabs"),
    ("whitelist", "allowList"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub freeze_timeout_minutes: u32,
    pub freeze_pinned_tabs: bool,
    pub allow_list: Vec<String>,
    pub enabled: bool,
    pub cleanup_interval_minutes: u32,
    pub max_tabs: u32,
    pub snapshot_quality: u8,
    pub auto_recovery: bool,
    pub notifications_enabled: bool,
    pub debug_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            freeze_timeout_minutes: 20,
            freeze_pinned_tabs: true,
            allow_list: Vec::new(),
            enabled: true,
            cleanup_interval_minutes: 60,
            max_tabs: 50,
            snapshot_quality: 50,
            auto_recovery: false,
            notifications_enabled: true,
            debug_mode: false,
        }
    }
}

/// A partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_timeout_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_pinned_tabs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_interval_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tabs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_recovery: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_mode: Option<bool>,
}

impl From<Config> for ConfigPatch {
    fn from(config: Config) -> Self {
        ConfigPatch {
            freeze_timeout_minutes: Some(config.freeze_timeout_minutes),
            freeze_pinned_tabs: Some(config.freeze_pinned_tabs),
            allow_list: Some(config.allow_list),
            enabled: Some(config.enabled),
            cleanup_interval_minutes: Some(config.cleanup_interval_minutes),
            max_tabs: Some(config.max_tabs),
            snapshot_quality: Some(config.snapshot_quality),
            auto_recovery: Some(config.auto_recovery),
            notifications_enabled: Some(config.notifications_enabled),
            debug_mode: Some(config.debug_mode),
        }
    }
}

fn check_range(field: &str, value: u32, min: u32, max: u32, unit: &str) -> Result<()> {
    if value < min || value > max {
        return Err(FreezeError::validation(
            field,
            format!("{} is out of range, must be between {} and {}{}", value, min, max, unit),
        ));
    }
    Ok(())
}

fn parse_value<T: DeserializeOwned>(key: &str, value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Ignoring stored {} = {}: {}", key, value, e);
            None
        }
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) if *slot != value => {
            *slot = value;
            true
        }
        _ => false,
    }
}

impl Config {
    /// Defaults overlaid with whatever well-typed values storage holds
    pub fn from_storage(items: &Map<String, Value>) -> Config {
        let mut config = Config::default();

        for (legacy, current) in LEGACY_KEYS {
            if !items.contains_key(current) {
                if let Some(value) = items.get(legacy) {
                    debug!("Migrating legacy key {} to {}", legacy, current);
                    config.set_field(current, value);
                }
            }
        }

        for key in CONFIG_KEYS {
            if let Some(value) = items.get(key) {
                config.set_field(key, value);
            }
        }

        config
    }

    pub fn to_storage(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(items) => Ok(items),
            other => Err(FreezeError::Storage(format!("config serialized to {}", other))),
        }
    }

    /// Overwrite one field from a raw storage value. Returns false for unknown
    /// keys, ill-typed values and values equal to the current one. The
    /// allow-list is always re-sanitized.
    fn set_field(&mut self, key: &str, value: &Value) -> bool {
        match key {
            "freezeTimeoutMinutes" => assign(&mut self.freeze_timeout_minutes, parse_value(key, value)),
            "freezePinnedTabs" => assign(&mut self.freeze_pinned_tabs, parse_value(key, value)),
            "allowList" => assign(
                &mut self.allow_list,
                parse_value::<Vec<Value>>(key, value)
                    .map(|entries| sanitize_allow_list(entries.iter().filter_map(Value::as_str))),
            ),
            "enabled" => assign(&mut self.enabled, parse_value(key, value)),
            "cleanupIntervalMinutes" => assign(&mut self.cleanup_interval_minutes, parse_value(key, value)),
            "maxTabs" => assign(&mut self.max_tabs, parse_value(key, value)),
            "snapshotQuality" => assign(&mut self.snapshot_quality, parse_value(key, value)),
            "autoRecovery" => assign(&mut self.auto_recovery, parse_value(key, value)),
            "notificationsEnabled" => assign(&mut self.notifications_enabled, parse_value(key, value)),
            "debugMode" => assign(&mut self.debug_mode, parse_value(key, value)),
            _ => false,
        }
    }

    pub fn merged(&self, patch: ConfigPatch) -> Config {
        Config {
            freeze_timeout_minutes: patch.freeze_timeout_minutes.unwrap_or(self.freeze_timeout_minutes),
            freeze_pinned_tabs: patch.freeze_pinned_tabs.unwrap_or(self.freeze_pinned_tabs),
            allow_list: match patch.allow_list {
                Some(entries) => sanitize_allow_list(entries),
                None => self.allow_list.clone(),
            },
            enabled: patch.enabled.unwrap_or(self.enabled),
            cleanup_interval_minutes: patch.cleanup_interval_minutes.unwrap_or(self.cleanup_interval_minutes),
            max_tabs: patch.max_tabs.unwrap_or(self.max_tabs),
            snapshot_quality: patch.snapshot_quality.unwrap_or(self.snapshot_quality),
            auto_recovery: patch.auto_recovery.unwrap_or(self.auto_recovery),
            notifications_enabled: patch.notifications_enabled.unwrap_or(self.notifications_enabled),
            debug_mode: patch.debug_mode.unwrap_or(self.debug_mode),
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_range("freezeTimeoutMinutes", self.freeze_timeout_minutes, 1, 360, " minutes")?;
        check_range("cleanupIntervalMinutes", self.cleanup_interval_minutes, 1, 1440, " minutes")?;
        check_range("maxTabs", self.max_tabs, 1, 1000, "")?;
        check_range("snapshotQuality", u32::from(self.snapshot_quality), 10, 100, "")?;
        Ok(())
    }

    pub fn freeze_timeout_ms(&self) -> u64 {
        u64::from(self.freeze_timeout_minutes) * 60_000
    }

    pub fn is_allow_listed(&self, hostname: &str) -> bool {
        self.allow_list.iter().any(|entry| entry == hostname)
    }
}

type Listener = Rc<dyn Fn(&Config)>;
type ListenerList = RefCell<Vec<(u64, Listener)>>;

/// Handle returned by `ConfigStore::subscribe`
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Owns the live configuration and keeps it in step with storage
pub struct ConfigStore<S: Storage> {
    storage: Rc<S>,
    config: RefCell<Config>,
    listeners: Rc<ListenerList>,
    next_listener_id: Cell<u64>,
}

impl<S: Storage> ConfigStore<S> {
    pub fn new(storage: Rc<S>) -> Self {
        ConfigStore {
            storage,
            config: RefCell::new(Config::default()),
            listeners: Rc::new(RefCell::new(Vec::new())),
            next_listener_id: Cell::new(0),
        }
    }

    pub async fn initialize(&self) -> Result<Config> {
        let mut keys: Vec<&str> = CONFIG_KEYS.to_vec();
        keys.extend(LEGACY_KEYS.iter().map(|(legacy, _)| *legacy));

        let items = self.storage.get(&keys).await?;
        let config = Config::from_storage(&items);
        info!(
            "Config loaded: timeout {}m, {} allow-listed hosts",
            config.freeze_timeout_minutes,
            config.allow_list.len()
        );

        *self.config.borrow_mut() = config.clone();
        Ok(config)
    }

    pub fn get(&self) -> Config {
        self.config.borrow().clone()
    }

    /// Validate, persist, then publish. Nothing changes if any step fails.
    pub async fn update(&self, patch: ConfigPatch) -> Result<Config> {
        let next = self.get().merged(patch);
        next.validate()?;

        self.storage.set(next.to_storage()?).await?;

        *self.config.borrow_mut() = next.clone();
        self.notify(&next);
        Ok(next)
    }

    pub async fn reset_to_defaults(&self) -> Result<Config> {
        self.update(Config::default().into()).await
    }

    pub async fn add_to_allow_list(&self, domain: &str) -> Result<Vec<String>> {
        let hostname = normalize(domain);
        if !is_valid(&hostname) {
            return Err(FreezeError::validation(
                "allowList",
                format!("'{}' is not a valid hostname", domain.trim()),
            ));
        }

        let mut allow_list = self.get().allow_list;
        if allow_list.contains(&hostname) {
            return Ok(allow_list);
        }
        allow_list.push(hostname);

        let config = self
            .update(ConfigPatch {
                allow_list: Some(allow_list),
                ..ConfigPatch::default()
            })
            .await?;
        Ok(config.allow_list)
    }

    pub async fn remove_from_allow_list(&self, domain: &str) -> Result<Vec<String>> {
        let hostname = normalize(domain);
        let mut allow_list = self.get().allow_list;
        let before = allow_list.len();
        allow_list.retain(|entry| *entry != hostname);

        if allow_list.len() == before {
            return Ok(allow_list);
        }

        let config = self
            .update(ConfigPatch {
                allow_list: Some(allow_list),
                ..ConfigPatch::default()
            })
            .await?;
        Ok(config.allow_list)
    }

    pub fn is_allow_listed(&self, hostname: &str) -> bool {
        self.config.borrow().is_allow_listed(hostname)
    }

    /// Apply a storage change made elsewhere (another device, the options page).
    /// Values are trusted except the allow-list, which is re-sanitized.
    pub fn apply_external_change(&self, changes: &Map<String, Value>) -> bool {
        let mut config = self.get();
        let mut changed = false;

        for (key, value) in changes {
            changed |= config.set_field(key, value);
        }

        if changed {
            debug!("Config changed externally");
            *self.config.borrow_mut() = config.clone();
            self.notify(&config);
        }
        changed
    }

    pub fn subscribe(&self, listener: impl Fn(&Config) + 'static) -> Subscription {
        let id = self.next_listener_id.get();
        self.next_listener_id.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));

        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    fn notify(&self, config: &Config) {
        // Clone the list so a listener may subscribe or unsubscribe while running
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(config);
        }
    }
}
