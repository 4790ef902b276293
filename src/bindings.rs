/// chrome.* implementations of the host and storage contracts, and the
/// entry points the extension's service worker calls into
use std::cell::RefCell;
use std::rc::Rc;

use log::{LevelFilter, error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use crate::config::{Config, ConfigStore, Subscription};
use crate::engine::FreezeEngine;
use crate::error::{FreezeError, Result};
use crate::host::{PageCommand, TabHost};
use crate::router::{Request, Router, Sender};
use crate::scheduler::Scheduler;
use crate::storage::Storage;
use crate::tab_data::{HostTab, TabId, WindowId};

// Import JS bridge functions
#[wasm_bindgen(module = "/background.js")]
extern "C" {
    #[wasm_bindgen(catch)]
    async fn queryTabs() -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn getTab(tab_id: i32) -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn updateTabUrl(tab_id: i32, url: &str) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn focusTab(tab_id: i32) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn captureVisibleTab(window_id: i32, quality: u8) -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn sendToTab(tab_id: i32, message: JsValue) -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn getStorage(area: &str, keys: JsValue) -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn setStorage(area: &str, items: JsValue) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn scheduleAlarm(name: &str, period_minutes: f64) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn sleep(ms: u32) -> std::result::Result<(), JsValue>;

    fn extensionUrl(path: &str) -> String;
}

fn js_message(e: &JsValue) -> String {
    e.as_string().unwrap_or_else(|| format!("{:?}", e))
}

/// Plain objects rather than JS `Map`s, so chrome.storage and sendMessage accept them
fn to_js<T: Serialize>(value: &T) -> Result<JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| FreezeError::Storage(format!("Failed to serialize: {:?}", e)))
}

fn from_js<T: serde::de::DeserializeOwned>(value: JsValue) -> Result<T> {
    serde_wasm_bindgen::from_value(value).map_err(|e| FreezeError::Storage(format!("Failed to parse: {:?}", e)))
}

pub struct ChromeHost;

impl TabHost for ChromeHost {
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }

    async fn sleep(&self, ms: u32) {
        if let Err(e) = sleep(ms).await {
            warn!("Timer failed: {}", js_message(&e));
        }
    }

    async fn query_tabs(&self) -> Result<Vec<HostTab>> {
        let tabs = queryTabs().await.map_err(|e| FreezeError::Tab(js_message(&e)))?;
        from_js(tabs)
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<HostTab> {
        let tab = getTab(tab_id).await.map_err(|e| FreezeError::Tab(js_message(&e)))?;
        from_js(tab)
    }

    async fn update_tab_url(&self, tab_id: TabId, url: &str) -> Result<()> {
        updateTabUrl(tab_id, url).await.map_err(|e| FreezeError::Tab(js_message(&e)))
    }

    async fn focus_tab(&self, tab_id: TabId) -> Result<()> {
        focusTab(tab_id).await.map_err(|e| FreezeError::Tab(js_message(&e)))
    }

    async fn capture_snapshot(&self, window_id: WindowId, quality: u8) -> Result<String> {
        let data_url = captureVisibleTab(window_id, quality)
            .await
            .map_err(|e| FreezeError::Tab(js_message(&e)))?;
        data_url
            .as_string()
            .ok_or_else(|| FreezeError::Tab("capture returned no image".to_string()))
    }

    async fn send_to_page(&self, tab_id: TabId, command: &PageCommand) -> Result<Value> {
        let reply = sendToTab(tab_id, to_js(command)?)
            .await
            .map_err(|e| FreezeError::PageAgentUnavailable(js_message(&e)))?;
        if reply.is_undefined() {
            return Ok(Value::Null);
        }
        from_js(reply)
    }

    fn extension_url(&self, path: &str) -> String {
        extensionUrl(path)
    }
}

const SYNC_AREA: &str = "sync";
const LOCAL_AREA: &str = "local";

/// One `chrome.storage` area
pub struct ChromeStorage {
    area: &'static str,
}

impl ChromeStorage {
    /// Settings, shared across the user's browsers
    pub fn sync() -> Self {
        ChromeStorage { area: SYNC_AREA }
    }

    /// Frozen tabs and activity, specific to this browser
    pub fn local() -> Self {
        ChromeStorage { area: LOCAL_AREA }
    }
}

impl Storage for ChromeStorage {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let items = getStorage(self.area, to_js(&keys)?)
            .await
            .map_err(|e| FreezeError::Storage(js_message(&e)))?;
        if items.is_null() || items.is_undefined() {
            return Ok(Map::new());
        }
        from_js(items)
    }

    async fn set(&self, items: Map<String, Value>) -> Result<()> {
        setStorage(self.area, to_js(&items)?)
            .await
            .map_err(|e| FreezeError::Storage(js_message(&e)))
    }
}

type ChromeEngine = FreezeEngine<ChromeHost, ChromeStorage>;

struct App {
    engine: Rc<ChromeEngine>,
    router: Router<ChromeHost, ChromeStorage>,
    scheduler: Rc<Scheduler<ChromeHost, ChromeStorage>>,
    _log_level: Subscription,
    _reconcile_period: Subscription,
}

thread_local! {
    static APP: RefCell<Option<Rc<App>>> = const { RefCell::new(None) };
}

fn app() -> std::result::Result<Rc<App>, JsValue> {
    APP.with(|app| app.borrow().clone())
        .ok_or_else(|| JsValue::from_str("Background not started"))
}

fn apply_log_level(config: &Config) {
    log::set_max_level(if config.debug_mode {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}

/// Create or re-period the sweep alarms. The bridge leaves an alarm alone
/// when its period is unchanged so a worker restart doesn't delay it.
async fn schedule_sweeps(scheduler: &Scheduler<ChromeHost, ChromeStorage>) {
    for (name, period_minutes) in scheduler.alarms() {
        if let Err(e) = scheduleAlarm(name, period_minutes).await {
            warn!("Could not schedule alarm {}: {}", name, js_message(&e));
        }
    }
}

/// Build the background core, load state and register the sweep alarms
#[wasm_bindgen]
pub async fn start_background() -> std::result::Result<(), JsValue> {
    if APP.with(|app| app.borrow().is_some()) {
        return Ok(());
    }

    let host = Rc::new(ChromeHost);
    let config = Rc::new(ConfigStore::new(Rc::new(ChromeStorage::sync())));
    config
        .initialize()
        .await
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    apply_log_level(&config.get());
    let log_level = config.subscribe(apply_log_level);

    let engine = Rc::new(FreezeEngine::new(host, Rc::new(ChromeStorage::local()), config.clone()));
    let scheduler = Rc::new(Scheduler::new(engine.clone()));

    let rescheduler = scheduler.clone();
    let reconcile_period = config.subscribe(move |_| {
        let scheduler = rescheduler.clone();
        spawn_local(async move { schedule_sweeps(&scheduler).await });
    });

    let app = Rc::new(App {
        router: Router::new(engine.clone()),
        scheduler,
        engine,
        _log_level: log_level,
        _reconcile_period: reconcile_period,
    });
    APP.with(|slot| *slot.borrow_mut() = Some(app.clone()));

    if let Err(e) = app.engine.start().await {
        error!("Startup failed: {}", e);
    }

    schedule_sweeps(&app.scheduler).await;
    info!("Tab freezer background started");
    Ok(())
}

/// `chrome.alarms.onAlarm`
#[wasm_bindgen]
pub async fn on_alarm(name: String) -> std::result::Result<(), JsValue> {
    app()?.scheduler.on_alarm(&name).await;
    Ok(())
}

/// `chrome.runtime.onMessage` handler; resolves to the response payload
#[wasm_bindgen]
pub async fn handle_message(message: JsValue, sender: JsValue) -> std::result::Result<JsValue, JsValue> {
    let app = app()?;

    let request: Request = match serde_wasm_bindgen::from_value(message) {
        Ok(request) => request,
        Err(e) => {
            warn!("Ignoring unknown message: {:?}", e);
            return to_js(&serde_json::json!({"success": false, "message": "Unknown request"}))
                .map_err(|e| JsValue::from_str(&e.to_string()));
        }
    };
    let sender: Sender = serde_wasm_bindgen::from_value(sender).unwrap_or_default();

    let response = app.router.handle(request, &sender).await;
    to_js(&response).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
pub fn on_tab_created(tab: JsValue) -> std::result::Result<(), JsValue> {
    let app = app()?;
    match from_js::<HostTab>(tab) {
        Ok(tab) => app.engine.handle_tab_created(&tab),
        Err(e) => warn!("Unreadable created tab: {}", e),
    }
    Ok(())
}

#[wasm_bindgen]
pub async fn on_tab_updated(tab: JsValue) -> std::result::Result<(), JsValue> {
    let app = app()?;
    match from_js::<HostTab>(tab) {
        Ok(tab) => app.engine.handle_tab_updated(&tab).await,
        Err(e) => warn!("Unreadable updated tab: {}", e),
    }
    Ok(())
}

/// `chrome.tabs.onActivated`
#[wasm_bindgen]
pub async fn on_tab_activated(tab_id: i32, window_id: i32) -> std::result::Result<(), JsValue> {
    app()?.engine.handle_tab_activated(tab_id, window_id).await;
    Ok(())
}

#[wasm_bindgen]
pub async fn on_tab_removed(tab_id: i32) -> std::result::Result<(), JsValue> {
    app()?.engine.handle_tab_removed(tab_id).await;
    Ok(())
}

/// `chrome.storage.onChanged`: `{key: {oldValue, newValue}}`. Settings live
/// in the sync area; local changes are our own frozen-tab bookkeeping.
#[wasm_bindgen]
pub fn on_storage_changed(changes: JsValue, area: String) -> std::result::Result<(), JsValue> {
    if area != SYNC_AREA {
        return Ok(());
    }
    let app = app()?;
    let changes: Map<String, Value> = from_js(changes).map_err(|e| JsValue::from_str(&e.to_string()))?;

    let new_values: Map<String, Value> = changes
        .into_iter()
        .filter_map(|(key, change)| change.get("newValue").cloned().map(|value| (key, value)))
        .collect();
    app.engine.config().apply_external_change(&new_values);
    Ok(())
}

#[wasm_bindgen]
pub async fn freeze_from_context_menu(tab_id: i32) -> std::result::Result<(), JsValue> {
    let app = app()?;
    if let Err(e) = app.engine.freeze_manually(tab_id).await {
        warn!("Could not freeze tab {}: {}", tab_id, e);
    }
    Ok(())
}
