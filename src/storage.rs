/// Storage contract and serialization of persisted state

use crate::error::Result;
use crate::tab_data::{FrozenTab, TabActivity};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const FROZEN_TABS_KEY: &str = "frozenTabs";
pub const TAB_ACTIVITY_KEY: &str = "tabActivity";

/// Asynchronous key-value store. In the browser one instance wraps
/// `chrome.storage.sync` (settings) and another `chrome.storage.local`
/// (frozen tabs and activity).
#[allow(async_fn_in_trait)]
pub trait Storage {
    /// Fetch the given keys; missing keys are simply absent from the map
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>>;

    /// Write all items in one call
    async fn set(&self, items: Map<String, Value>) -> Result<()>;
}

/// Parse an array of records, dropping entries that fail individually so one
/// bad record does not lose the rest
fn read_records<T: DeserializeOwned>(items: &Map<String, Value>, key: &str) -> Vec<T> {
    match items.get(key) {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| match serde_json::from_value::<T>(entry.clone()) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("Dropping unreadable {} record: {}", key, e);
                    None
                }
            })
            .collect(),
        Some(other) => {
            log::warn!("Ignoring malformed {} value: {}", key, other);
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn write_records<T: Serialize>(key: &str, records: &[T]) -> Result<Map<String, Value>> {
    let mut items = Map::new();
    items.insert(key.to_string(), serde_json::to_value(records)?);
    Ok(items)
}

/// Persisted form of the frozen-tab registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrozenTabsData {
    pub tabs: Vec<FrozenTab>,
}

impl FrozenTabsData {
    pub fn new(tabs: Vec<FrozenTab>) -> Self {
        FrozenTabsData { tabs }
    }

    pub fn from_storage(items: &Map<String, Value>) -> Self {
        let mut data = FrozenTabsData {
            tabs: read_records(items, FROZEN_TABS_KEY),
        };
        data.dedup();
        data
    }

    pub fn to_storage(&self) -> Result<Map<String, Value>> {
        write_records(FROZEN_TABS_KEY, &self.tabs)
    }

    fn dedup(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.tabs.retain(|tab| seen.insert(tab.tab_id));
    }
}

/// Last-activity timestamps of tracked tabs, so idle time survives the
/// background being suspended and restarted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityData {
    pub tabs: Vec<TabActivity>,
}

impl ActivityData {
    pub fn from_storage(items: &Map<String, Value>) -> Self {
        ActivityData {
            tabs: read_records(items, TAB_ACTIVITY_KEY),
        }
    }

    pub fn to_storage(&self) -> Result<Map<String, Value>> {
        write_records(TAB_ACTIVITY_KEY, &self.tabs)
    }
}
