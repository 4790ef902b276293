/// In-memory stand-ins for the browser, used by unit tests
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::{Map, Value};

use crate::error::{FreezeError, Result};
use crate::host::{PageCommand, PageInfo, TabHost};
use crate::storage::Storage;
use crate::tab_data::{HostTab, TabId, WindowId};

pub const START_TIME: u64 = 1_700_000_000_000;

/// What `capture_snapshot` returns while `tab_id` is the visible tab of its window
pub fn snapshot_of(tab_id: TabId) -> String {
    format!("data:image/jpeg;base64,dGFi{}", tab_id)
}

/// How the fake page agent reacts to `GetPageInfo`
pub enum PageAgent {
    Answers(PageInfo),
    Missing,
    Hangs,
}

/// Completes on the second poll, giving other futures a turn
struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

pub struct FakeHost {
    now: Cell<u64>,
    tabs: RefCell<BTreeMap<TabId, HostTab>>,
    page_agent: RefCell<PageAgent>,
    fail_capture: Cell<bool>,
    fail_update: Cell<bool>,
    fail_query: Cell<bool>,
    fail_lookup: Cell<bool>,
    captures: Cell<usize>,
    sent: RefCell<Vec<(TabId, PageCommand)>>,
    focused: RefCell<Vec<TabId>>,
}

impl FakeHost {
    pub fn new() -> Self {
        FakeHost {
            now: Cell::new(START_TIME),
            tabs: RefCell::new(BTreeMap::new()),
            page_agent: RefCell::new(PageAgent::Missing),
            fail_capture: Cell::new(false),
            fail_update: Cell::new(false),
            fail_query: Cell::new(false),
            fail_lookup: Cell::new(false),
            captures: Cell::new(0),
            sent: RefCell::new(Vec::new()),
            focused: RefCell::new(Vec::new()),
        }
    }

    /// Open a tab in window 1. An active tab hides the rest of the window.
    pub fn add_tab(&self, tab_id: TabId, url: &str, active: bool) -> HostTab {
        self.add_tab_in_window(tab_id, url, 1, active)
    }

    pub fn add_tab_in_window(&self, tab_id: TabId, url: &str, window_id: WindowId, active: bool) -> HostTab {
        let tab = HostTab {
            id: Some(tab_id),
            url: Some(url.to_string()),
            title: Some(format!("Tab {}", tab_id)),
            fav_icon_url: None,
            window_id,
            active: false,
            pinned: false,
        };
        self.tabs.borrow_mut().insert(tab_id, tab);
        if active {
            self.activate(tab_id);
        }
        self.tab(tab_id).unwrap_or_default()
    }

    /// Focus a tab the way a user click would; returns its window
    pub fn activate(&self, tab_id: TabId) -> WindowId {
        let mut tabs = self.tabs.borrow_mut();
        let Some(window_id) = tabs.get(&tab_id).map(|tab| tab.window_id) else {
            return 0;
        };
        for tab in tabs.values_mut().filter(|tab| tab.window_id == window_id) {
            tab.active = tab.id == Some(tab_id);
        }
        window_id
    }

    pub fn visible_tab(&self, window_id: WindowId) -> Option<TabId> {
        self.tabs
            .borrow()
            .values()
            .find(|tab| tab.window_id == window_id && tab.active)
            .and_then(|tab| tab.id)
    }

    pub fn add_pinned_tab(&self, tab_id: TabId, url: &str) -> HostTab {
        let mut tab = self.add_tab(tab_id, url, false);
        tab.pinned = true;
        self.tabs.borrow_mut().insert(tab_id, tab.clone());
        tab
    }

    pub fn set_icon(&self, tab_id: TabId, icon: &str) {
        if let Some(tab) = self.tabs.borrow_mut().get_mut(&tab_id) {
            tab.fav_icon_url = Some(icon.to_string());
        }
    }

    pub fn close_tab(&self, tab_id: TabId) {
        self.tabs.borrow_mut().remove(&tab_id);
    }

    pub fn tab(&self, tab_id: TabId) -> Option<HostTab> {
        self.tabs.borrow().get(&tab_id).cloned()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set_page_agent(&self, agent: PageAgent) {
        *self.page_agent.borrow_mut() = agent;
    }

    pub fn fail_capture(&self, fail: bool) {
        self.fail_capture.set(fail);
    }

    pub fn fail_update(&self, fail: bool) {
        self.fail_update.set(fail);
    }

    pub fn fail_query(&self, fail: bool) {
        self.fail_query.set(fail);
    }

    /// `get_tab` fails with a non-tab error, as when a reply can't be parsed
    pub fn fail_lookup(&self, fail: bool) {
        self.fail_lookup.set(fail);
    }

    pub fn capture_count(&self) -> usize {
        self.captures.get()
    }

    pub fn sent_commands(&self) -> Vec<(TabId, PageCommand)> {
        self.sent.borrow().clone()
    }

    pub fn focused_tabs(&self) -> Vec<TabId> {
        self.focused.borrow().clone()
    }
}

impl TabHost for FakeHost {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    async fn sleep(&self, ms: u32) {
        YieldNow(false).await;
        self.advance(u64::from(ms));
    }

    async fn query_tabs(&self) -> Result<Vec<HostTab>> {
        if self.fail_query.get() {
            return Err(FreezeError::Tab("query rejected".to_string()));
        }
        Ok(self.tabs.borrow().values().cloned().collect())
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<HostTab> {
        if self.fail_lookup.get() {
            return Err(FreezeError::Storage("unreadable tab".to_string()));
        }
        self.tab(tab_id).ok_or_else(|| FreezeError::tab_not_found(tab_id))
    }

    async fn update_tab_url(&self, tab_id: TabId, url: &str) -> Result<()> {
        YieldNow(false).await;
        if self.fail_update.get() {
            return Err(FreezeError::Tab("update rejected".to_string()));
        }
        let mut tabs = self.tabs.borrow_mut();
        let tab = tabs
            .get_mut(&tab_id)
            .ok_or_else(|| FreezeError::tab_not_found(tab_id))?;
        tab.url = Some(url.to_string());
        Ok(())
    }

    async fn focus_tab(&self, tab_id: TabId) -> Result<()> {
        if self.tab(tab_id).is_none() {
            return Err(FreezeError::tab_not_found(tab_id));
        }
        self.focused.borrow_mut().push(tab_id);
        Ok(())
    }

    async fn capture_snapshot(&self, window_id: WindowId, _quality: u8) -> Result<String> {
        YieldNow(false).await;
        if self.fail_capture.get() {
            return Err(FreezeError::Tab("capture failed".to_string()));
        }
        let visible = self
            .visible_tab(window_id)
            .ok_or_else(|| FreezeError::Tab(format!("window {} shows nothing", window_id)))?;
        self.captures.set(self.captures.get() + 1);
        Ok(snapshot_of(visible))
    }

    async fn send_to_page(&self, tab_id: TabId, command: &PageCommand) -> Result<Value> {
        if self.tab(tab_id).is_none() {
            return Err(FreezeError::PageAgentUnavailable(format!("tab {} closed", tab_id)));
        }
        self.sent.borrow_mut().push((tab_id, command.clone()));

        if let PageCommand::SetSnapshot { .. } = command {
            return Ok(Value::Null);
        }

        let hangs = matches!(*self.page_agent.borrow(), PageAgent::Hangs);
        if hangs {
            return futures::future::pending().await;
        }

        match &*self.page_agent.borrow() {
            PageAgent::Answers(info) => Ok(serde_json::to_value(info)?),
            _ => Err(FreezeError::PageAgentUnavailable(
                "Receiving end does not exist".to_string(),
            )),
        }
    }

    fn extension_url(&self, path: &str) -> String {
        format!("chrome-extension://freezer/{}", path)
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    items: RefCell<Map<String, Value>>,
    fail_get: Cell<bool>,
    fail_set: Cell<bool>,
    writes: Cell<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Map<String, Value>) -> Self {
        let storage = Self::default();
        *storage.items.borrow_mut() = items;
        storage
    }

    pub fn item(&self, key: &str) -> Option<Value> {
        self.items.borrow().get(key).cloned()
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.set(fail);
    }

    pub fn fail_set(&self, fail: bool) {
        self.fail_set.set(fail);
    }

    pub fn write_count(&self) -> usize {
        self.writes.get()
    }
}

impl Storage for MemoryStorage {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        if self.fail_get.get() {
            return Err(FreezeError::Storage("read failed".to_string()));
        }
        let items = self.items.borrow();
        Ok(keys
            .iter()
            .filter_map(|key| items.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    async fn set(&self, new_items: Map<String, Value>) -> Result<()> {
        if self.fail_set.get() {
            return Err(FreezeError::Storage("write failed".to_string()));
        }
        self.writes.set(self.writes.get() + 1);
        self.items.borrow_mut().extend(new_items);
        Ok(())
    }
}
