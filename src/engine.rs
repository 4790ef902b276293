/// Freeze/restore state machine over the tab registries
///
/// A tab moves `Open -> Eligible -> Freezing -> Frozen -> Restoring -> Open`.
/// `Freezing` is recorded in the tracked registry so a second sweep cannot
/// start another transition for the same tab. Registry moves happen inside a
/// single `RefCell` borrow; no borrow is ever held across an `.await`.
use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigStore};
use crate::domain::hostname_of;
use crate::error::{FreezeError, Result};
use crate::host::{PAGE_INFO_TIMEOUT_MS, PageCommand, PageInfo, TabHost, fetch_page_info};
use crate::placeholder::{PLACEHOLDER_PAGE, PlaceholderParams, build_url, is_placeholder_url, parse_query};
use crate::registry::{TabState, admits};
use crate::storage::{ActivityData, FROZEN_TABS_KEY, FrozenTabsData, Storage, TAB_ACTIVITY_KEY};
use crate::tab_data::{FrozenTab, HostTab, RemainingTime, TabId, TabSummary, TrackedTab, WindowId};

/// Pause between parking a tab on the placeholder and handing it the snapshot
pub const SNAPSHOT_SETTLE_MS: u32 = 1_000;

/// Pause after navigating a restored tab back before re-reading it
pub const RESTORE_SETTLE_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FreezeMode {
    /// Eligibility sweep: the tab must still be eligible when claimed
    Automatic,
    /// User asked for it: timeout, pin and allow-list rules don't apply
    Manual,
}

/// Result of restoring every frozen tab at once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub success: bool,
    pub message: String,
    pub restored_count: usize,
}

impl RestoreSummary {
    fn failure(message: String) -> Self {
        RestoreSummary {
            success: false,
            message,
            restored_count: 0,
        }
    }
}

/// Can this tracked tab be frozen automatically right now?
pub fn is_eligible(tab: &TrackedTab, config: &Config, now: u64) -> bool {
    if !config.enabled || tab.is_in_use() {
        return false;
    }
    if tab.pinned && !config.freeze_pinned_tabs {
        return false;
    }
    if hostname_of(&tab.url).is_some_and(|host| config.is_allow_listed(&host)) {
        return false;
    }
    tab.idle_ms(now) > config.freeze_timeout_ms()
}

pub struct FreezeEngine<H: TabHost, S: Storage> {
    host: Rc<H>,
    storage: Rc<S>,
    config: Rc<ConfigStore<S>>,
    state: RefCell<TabState>,
}

impl<H: TabHost, S: Storage> FreezeEngine<H, S> {
    pub fn new(host: Rc<H>, storage: Rc<S>, config: Rc<ConfigStore<S>>) -> Self {
        FreezeEngine {
            host,
            storage,
            config,
            state: RefCell::new(TabState::new()),
        }
    }

    pub fn host(&self) -> &Rc<H> {
        &self.host
    }

    pub fn config(&self) -> &Rc<ConfigStore<S>> {
        &self.config
    }

    pub fn state(&self) -> Ref<'_, TabState> {
        self.state.borrow()
    }

    fn placeholder_base(&self) -> String {
        self.host.extension_url(PLACEHOLDER_PAGE)
    }

    // ---- startup ----

    /// Load persisted frozen tabs, pick up every open tab, recover placeholders
    /// left over from a previous session, then optionally restore everything.
    ///
    /// Runs on every service worker wake-up, so idle times are carried over
    /// from the last persisted activity records instead of restarting at now.
    pub async fn start(&self) -> Result<()> {
        let loaded = self.load_frozen().await?;

        let tabs = self.host.query_tabs().await?;
        for tab in &tabs {
            self.handle_tab_updated(tab).await;
        }
        let carried = self.load_activity().await;
        if carried > 0 {
            debug!("Carried over idle time for {} tabs", carried);
        }
        self.persist_activity().await;

        let open: HashSet<TabId> = tabs.iter().filter_map(|tab| tab.id).collect();
        let stale = self.state.borrow_mut().frozen.retain_open(&open);
        if !stale.is_empty() {
            info!("Dropped {} frozen tabs that no longer exist", stale.len());
            self.persist_frozen().await;
        }

        info!(
            "Freezer started: {} tracked, {} frozen ({} loaded from storage)",
            self.state().tracked.len(),
            self.state().frozen.len(),
            loaded
        );

        if self.config.get().auto_recovery {
            let summary = self.restore_all().await;
            info!("Auto recovery: {}", summary.message);
        }
        Ok(())
    }

    pub async fn load_frozen(&self) -> Result<usize> {
        let items = self.storage.get(&[FROZEN_TABS_KEY]).await?;
        let data = FrozenTabsData::from_storage(&items);
        let count = data.tabs.len();

        let mut state = self.state.borrow_mut();
        for tab in &data.tabs {
            state.tracked.purge(tab.tab_id);
        }
        state.frozen.load(data);
        Ok(count)
    }

    /// Write the frozen registry. Failures are logged; the next write retries.
    async fn persist_frozen(&self) {
        let data = self.state.borrow().frozen.to_data();
        let result = match data.to_storage() {
            Ok(items) => self.storage.set(items).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to persist frozen tabs: {}", e);
        }
    }

    /// Apply persisted activity records to the tabs just synced from the host.
    /// Records for other pages or closed tabs are ignored.
    pub async fn load_activity(&self) -> usize {
        let items = match self.storage.get(&[TAB_ACTIVITY_KEY]).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Failed to load tab activity: {}", e);
                return 0;
            }
        };
        let data = ActivityData::from_storage(&items);

        let mut state = self.state.borrow_mut();
        data.tabs
            .iter()
            .filter(|record| state.tracked.restore_activity(record))
            .count()
    }

    /// Write last-activity times so a restarted worker keeps counting idle time
    pub async fn persist_activity(&self) {
        let data = ActivityData {
            tabs: self.state.borrow().tracked.activity_records(),
        };
        let result = match data.to_storage() {
            Ok(items) => self.storage.set(items).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to persist tab activity: {}", e);
        }
    }

    // ---- host events ----

    pub fn handle_tab_created(&self, tab: &HostTab) {
        let freeze_pinned = self.config.get().freeze_pinned_tabs;
        let now = self.host.now_ms();
        if self.state.borrow_mut().tracked.on_tab_opened(tab, freeze_pinned, now) {
            debug!("Tracking tab {:?}", tab.id);
        }
    }

    /// Navigation, title, icon or pin changes. Also keeps the frozen registry
    /// honest: a frozen tab that left the placeholder is open again, and a tab
    /// sitting on a placeholder we don't know about is adopted as frozen.
    pub async fn handle_tab_updated(&self, tab: &HostTab) {
        let Some(tab_id) = tab.id else {
            return;
        };
        let base = self.placeholder_base();
        let on_placeholder = tab.url.as_deref().is_some_and(|url| is_placeholder_url(&base, url));
        let freeze_pinned = self.config.get().freeze_pinned_tabs;
        let now = self.host.now_ms();

        let persist = {
            let mut state = self.state.borrow_mut();

            if state.tracked.is_freezing(tab_id) {
                false
            } else if state.frozen.contains(tab_id) {
                if tab.url.is_some() && !on_placeholder {
                    info!("Frozen tab {} was navigated away from the placeholder", tab_id);
                    state.frozen.remove(tab_id);
                    state.tracked.on_tab_opened(tab, freeze_pinned, now);
                    true
                } else {
                    false
                }
            } else if on_placeholder {
                let search = tab.url().get(base.len()..).unwrap_or_default();
                match parse_query(search) {
                    Some(params) => {
                        info!("Adopting placeholder tab {} as frozen", tab_id);
                        state.move_to_frozen(FrozenTab {
                            tab_id,
                            original_url: params.url,
                            icon: params.icon,
                            title: params.title,
                        });
                        true
                    }
                    None => false,
                }
            } else {
                state.tracked.on_tab_updated(tab, freeze_pinned, now);
                false
            }
        };

        if persist {
            self.persist_frozen().await;
        }
    }

    pub async fn handle_tab_removed(&self, tab_id: TabId) {
        let was_frozen = {
            let mut state = self.state.borrow_mut();
            state.tracked.on_tab_removed(tab_id);
            state.frozen.remove(tab_id).is_some()
        };
        if was_frozen {
            debug!("Frozen tab {} was closed", tab_id);
            self.persist_frozen().await;
        }
    }

    /// The user switched tabs: the new one is in use, the old one starts idling
    pub async fn handle_tab_activated(&self, tab_id: TabId, window_id: WindowId) {
        let now = self.host.now_ms();
        self.state.borrow_mut().tracked.on_tab_activated(tab_id, window_id, now);
        self.persist_activity().await;
    }

    // ---- page agent reports ----

    /// Track the reporting tab if it isn't yet (first contact from its agent)
    pub fn admit_sender(&self, tab: &HostTab) {
        let Some(tab_id) = tab.id else {
            return;
        };
        let known = {
            let state = self.state.borrow();
            state.tracked.contains(tab_id) || state.frozen.contains(tab_id)
        };
        if known {
            self.report_activity(tab_id);
        } else {
            self.handle_tab_created(tab);
        }
    }

    pub fn report_activity(&self, tab_id: TabId) -> bool {
        let now = self.host.now_ms();
        self.state.borrow_mut().tracked.on_activity_report(tab_id, now)
    }

    pub fn report_visibility(&self, tab_id: TabId, visible: bool) -> bool {
        let now = self.host.now_ms();
        self.state.borrow_mut().tracked.on_visibility_report(tab_id, visible, now)
    }

    pub fn report_page_info(&self, tab_id: TabId, info: &PageInfo) -> bool {
        self.state.borrow_mut().tracked.on_page_info_report(tab_id, &info.url, &info.title)
    }

    // ---- queries ----

    pub fn tracked_summaries(&self) -> Vec<TabSummary> {
        let timeout = self.config.get().freeze_timeout_minutes;
        let now = self.host.now_ms();
        self.state().tracked.snapshot_with_remaining_time(timeout, now)
    }

    pub fn remaining_time(&self, tab_id: TabId) -> Option<RemainingTime> {
        let timeout = self.config.get().freeze_timeout_minutes;
        let now = self.host.now_ms();
        self.state().tracked.remaining_time(tab_id, timeout, now)
    }

    pub fn frozen_tabs(&self) -> Vec<FrozenTab> {
        self.state().frozen.list()
    }

    pub fn eligible_tabs(&self, now: u64) -> Vec<TabId> {
        let config = self.config.get();
        let state = self.state();
        state
            .tracked
            .tabs()
            .filter(|tab| !state.frozen.contains(tab.tab_id) && !state.tracked.is_freezing(tab.tab_id))
            .filter(|tab| is_eligible(tab, &config, now))
            .map(|tab| tab.tab_id)
            .collect()
    }

    // ---- freeze ----

    /// Freeze every eligible tab. One tab failing never stops the others.
    pub async fn run_eligibility_sweep(&self) -> usize {
        let now = self.host.now_ms();
        let mut frozen = 0;

        for tab_id in self.eligible_tabs(now) {
            match self.freeze_tab(tab_id).await {
                Ok(true) => frozen += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to freeze tab {}, will retry: {}", tab_id, e),
            }
        }
        self.persist_activity().await;
        frozen
    }

    /// Freeze one tab if it is still eligible. `Ok(false)` when it isn't, or
    /// when another sweep is already freezing it.
    pub async fn freeze_tab(&self, tab_id: TabId) -> Result<bool> {
        self.freeze(tab_id, FreezeMode::Automatic).await
    }

    /// Freeze a tab on request (context menu, popup) regardless of timeout
    pub async fn freeze_manually(&self, tab_id: TabId) -> Result<bool> {
        let known = {
            let state = self.state();
            state.tracked.contains(tab_id) || state.frozen.contains(tab_id)
        };

        if !known {
            let tab = self.host.get_tab(tab_id).await?;
            let now = self.host.now_ms();
            if !self.state.borrow_mut().tracked.on_tab_opened(&tab, true, now) {
                return Err(FreezeError::Tab(format!("tab {} shows a page that cannot be frozen", tab_id)));
            }
        }

        self.freeze(tab_id, FreezeMode::Manual).await
    }

    async fn freeze(&self, tab_id: TabId, mode: FreezeMode) -> Result<bool> {
        let config = self.config.get();
        let now = self.host.now_ms();

        let tab = {
            let mut state = self.state.borrow_mut();
            let Some(tab) = state.tracked.get(tab_id).cloned() else {
                return Ok(false);
            };
            if state.frozen.contains(tab_id) {
                return Ok(false);
            }
            if mode == FreezeMode::Automatic && !is_eligible(&tab, &config, now) {
                return Ok(false);
            }
            if !state.tracked.begin_freeze(tab_id) {
                debug!("Tab {} is already being frozen", tab_id);
                return Ok(false);
            }
            tab
        };

        match self.run_freeze(tab, config.snapshot_quality).await {
            Ok(()) => Ok(true),
            Err(e) => {
                self.state.borrow_mut().tracked.end_freeze(tab_id);
                if matches!(self.host.get_tab(tab_id).await, Err(ref gone) if gone.is_tab_gone()) {
                    debug!("Tab {} disappeared during freeze", tab_id);
                    self.state.borrow_mut().tracked.purge(tab_id);
                }
                Err(e)
            }
        }
    }

    async fn run_freeze(&self, tab: TrackedTab, quality: u8) -> Result<()> {
        let tab_id = tab.tab_id;

        let info = match fetch_page_info(&*self.host, tab_id, PAGE_INFO_TIMEOUT_MS).await {
            Ok(info) if !info.url.is_empty() => info,
            Ok(_) => PageInfo { url: tab.url.clone(), title: tab.title.clone() },
            Err(e) => {
                debug!("Using cached info for tab {}: {}", tab_id, e);
                PageInfo { url: tab.url.clone(), title: tab.title.clone() }
            }
        };

        // Capture before navigating so the snapshot shows the real page
        let snapshot = self.capture_if_visible(tab_id, quality).await;

        let params = PlaceholderParams {
            title: info.title.clone(),
            url: info.url.clone(),
            icon: tab.icon.clone(),
        };
        let placeholder = build_url(&self.placeholder_base(), &params);
        self.host.update_tab_url(tab_id, &placeholder).await?;
        self.host.get_tab(tab_id).await?;

        self.state.borrow_mut().move_to_frozen(FrozenTab {
            tab_id,
            original_url: info.url.clone(),
            icon: tab.icon,
            title: info.title,
        });
        info!("Froze tab {} ({})", tab_id, info.url);

        if let Some(image_data_url) = snapshot {
            self.host.sleep(SNAPSHOT_SETTLE_MS).await;
            let command = PageCommand::SetSnapshot { image_data_url };
            if let Err(e) = self.host.send_to_page(tab_id, &command).await {
                // Best effort: the placeholder still works without a preview
                debug!("Snapshot not delivered to tab {}: {}", tab_id, e);
            }
        }

        self.persist_frozen().await;
        Ok(())
    }

    /// The host can only capture what its window is showing, so a background
    /// tab gets no preview. The tab is re-read after capturing in case the
    /// user switched away while the capture was in flight.
    async fn capture_if_visible(&self, tab_id: TabId, quality: u8) -> Option<String> {
        let window_id = match self.host.get_tab(tab_id).await {
            Ok(tab) if tab.active => tab.window_id,
            Ok(_) => {
                debug!("Tab {} is in the background, freezing without a snapshot", tab_id);
                return None;
            }
            Err(e) => {
                debug!("Skipping snapshot of tab {}: {}", tab_id, e);
                return None;
            }
        };

        let snapshot = match self.host.capture_snapshot(window_id, quality).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Snapshot of tab {} failed: {}", tab_id, e);
                return None;
            }
        };

        match self.host.get_tab(tab_id).await {
            Ok(tab) if tab.active => Some(snapshot),
            _ => None,
        }
    }

    // ---- restore ----

    /// Navigate a frozen tab back to its page. `Ok(false)` when there was
    /// nothing to restore (unknown entry or the tab has been closed).
    pub async fn restore_tab(&self, tab_id: TabId) -> Result<bool> {
        let Some(entry) = self.state().frozen.get(tab_id).cloned() else {
            return Ok(false);
        };

        match self.host.get_tab(tab_id).await {
            Ok(_) => {}
            Err(e) if e.is_tab_gone() => return Ok(self.drop_vanished(tab_id).await),
            Err(e) => return Err(e),
        }

        if let Err(e) = self.host.update_tab_url(tab_id, &entry.original_url).await {
            if matches!(self.host.get_tab(tab_id).await, Err(ref gone) if gone.is_tab_gone()) {
                return Ok(self.drop_vanished(tab_id).await);
            }
            return Err(e);
        }

        self.host.sleep(RESTORE_SETTLE_MS).await;

        let mut fresh = match self.host.get_tab(tab_id).await {
            Ok(tab) => tab,
            Err(e) if e.is_tab_gone() => return Ok(self.drop_vanished(tab_id).await),
            Err(e) => return Err(e),
        };
        fresh.url = Some(entry.original_url.clone());
        if fresh.title().is_empty() {
            fresh.title = Some(entry.title.clone());
        }

        let freeze_pinned = self.config.get().freeze_pinned_tabs;
        let now = self.host.now_ms();
        {
            let mut state = self.state.borrow_mut();
            if admits(&fresh, freeze_pinned) {
                state.move_to_tracked(TrackedTab::from_host(tab_id, &fresh, now));
            } else {
                state.frozen.remove(tab_id);
            }
        }
        info!("Restored tab {} ({})", tab_id, entry.original_url);

        self.persist_frozen().await;
        Ok(true)
    }

    async fn drop_vanished(&self, tab_id: TabId) -> bool {
        info!("Frozen tab {} no longer exists, dropping it", tab_id);
        if self.state.borrow_mut().frozen.remove(tab_id).is_some() {
            self.persist_frozen().await;
        }
        false
    }

    pub async fn restore_all(&self) -> RestoreSummary {
        let entries = self.frozen_tabs();
        if entries.is_empty() {
            return RestoreSummary {
                success: true,
                message: "No frozen tabs to restore".to_string(),
                restored_count: 0,
            };
        }

        let open: HashSet<TabId> = match self.host.query_tabs().await {
            Ok(tabs) => tabs.iter().filter_map(|tab| tab.id).collect(),
            Err(e) => return RestoreSummary::failure(format!("Could not list open tabs: {}", e)),
        };

        let mut restored = 0;
        let mut purged = 0;
        let mut failed = 0;

        for entry in entries {
            if !open.contains(&entry.tab_id) {
                self.state.borrow_mut().frozen.remove(entry.tab_id);
                purged += 1;
                continue;
            }

            match self.restore_tab(entry.tab_id).await {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to restore tab {}: {}", entry.tab_id, e);
                    failed += 1;
                }
            }
        }

        if purged > 0 {
            self.persist_frozen().await;
        }

        let mut message = format!("Restored {} tabs", restored);
        if purged > 0 {
            message.push_str(&format!(", removed {} closed", purged));
        }
        if failed > 0 {
            message.push_str(&format!(", {} failed", failed));
        }

        RestoreSummary {
            success: failed == 0,
            message,
            restored_count: restored,
        }
    }

    /// Forget a frozen entry without touching the tab itself
    pub async fn remove_frozen(&self, tab_id: TabId) -> bool {
        let removed = self.state.borrow_mut().frozen.remove(tab_id).is_some();
        if removed {
            self.persist_frozen().await;
        }
        removed
    }

    // ---- periodic maintenance ----

    /// Drop registry entries whose host tab is gone; returns how many
    pub async fn reconcile(&self) -> Result<usize> {
        let started = self.host.now_ms();
        let tabs = self.host.query_tabs().await?;
        let open: HashSet<TabId> = tabs.iter().filter_map(|tab| tab.id).collect();

        let (stale_frozen, stale_tracked) = {
            let mut state = self.state.borrow_mut();
            let stale_frozen = state.frozen.retain_open(&open);

            // Tabs admitted while the query was in flight are not in `open` yet
            let candidates: Vec<TabId> = state
                .tracked
                .tabs()
                .filter(|tab| !open.contains(&tab.tab_id) && tab.last_activity_time < started)
                .map(|tab| tab.tab_id)
                .collect();
            let stale_tracked = candidates
                .into_iter()
                .filter(|tab_id| state.tracked.purge(*tab_id))
                .count();
            (stale_frozen.len(), stale_tracked)
        };

        if stale_frozen > 0 {
            self.persist_frozen().await;
        }
        if stale_frozen + stale_tracked > 0 {
            info!(
                "Reconciled: dropped {} frozen and {} tracked tabs",
                stale_frozen, stale_tracked
            );
        }
        Ok(stale_frozen + stale_tracked)
    }

    /// Ask the host again for favicons that weren't known when a tab was seen
    pub async fn resolve_missing_icons(&self) -> usize {
        let missing = self.state().tracked.tabs_missing_icon();
        let mut resolved = 0;

        for tab_id in missing {
            match self.host.get_tab(tab_id).await {
                Ok(tab) => {
                    if self.state.borrow_mut().tracked.set_icon(tab_id, tab.icon()) {
                        resolved += 1;
                    }
                }
                Err(e) if e.is_tab_gone() => {
                    debug!("Tab {} is gone, no icon to resolve: {}", tab_id, e);
                    self.state.borrow_mut().tracked.purge(tab_id);
                }
                Err(e) => debug!("Icon lookup for tab {} failed: {}", tab_id, e),
            }
        }
        resolved
    }
}
