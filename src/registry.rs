/// In-memory registries of tracked (open) and frozen tabs
use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::domain::is_trackable_url;
use crate::storage::FrozenTabsData;
use crate::tab_data::{
    FrozenTab, HostTab, RemainingTime, TabActivity, TabId, TabSummary, TrackedTab, VisibilityState, WindowId,
};

pub(crate) fn admits(tab: &HostTab, freeze_pinned: bool) -> bool {
    if tab.pinned && !freeze_pinned {
        return false;
    }
    is_trackable_url(tab.url())
}

/// Activity metadata for every open tab that may eventually be frozen
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: BTreeMap<TabId, TrackedTab>,
    freezing: HashSet<TabId>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a tab. Tabs without an id, exempt pinned tabs and
    /// non-web pages are skipped.
    pub fn on_tab_opened(&mut self, tab: &HostTab, freeze_pinned: bool, now: u64) -> bool {
        let Some(tab_id) = tab.id else {
            return false;
        };
        if !admits(tab, freeze_pinned) {
            return false;
        }

        self.tabs.insert(tab_id, TrackedTab::from_host(tab_id, tab, now));
        true
    }

    pub fn on_tab_updated(&mut self, tab: &HostTab, freeze_pinned: bool, now: u64) -> bool {
        let Some(tab_id) = tab.id else {
            return false;
        };
        if self.freezing.contains(&tab_id) {
            return false;
        }

        let Some(tracked) = self.tabs.get_mut(&tab_id) else {
            return self.on_tab_opened(tab, freeze_pinned, now);
        };
        tracked.merge_host(tab);

        if !admits(tab, freeze_pinned) {
            debug!("Tab {} is no longer trackable", tab_id);
            self.tabs.remove(&tab_id);
        }
        true
    }

    /// Forget a closed tab. Entries mid-freeze stay until the freeze settles.
    pub fn on_tab_removed(&mut self, tab_id: TabId) -> bool {
        if self.freezing.contains(&tab_id) {
            return false;
        }
        self.tabs.remove(&tab_id).is_some()
    }

    pub fn on_activity_report(&mut self, tab_id: TabId, now: u64) -> bool {
        match self.tabs.get_mut(&tab_id) {
            Some(tab) => {
                tab.last_activity_time = now;
                true
            }
            None => false,
        }
    }

    pub fn on_visibility_report(&mut self, tab_id: TabId, visible: bool, now: u64) -> bool {
        let Some(tab) = self.tabs.get_mut(&tab_id) else {
            return false;
        };

        if visible && !tab.is_visible {
            tab.last_activity_time = now;
        }
        tab.is_visible = visible;
        tab.visibility_state = if visible {
            VisibilityState::Visible
        } else {
            VisibilityState::Hidden
        };
        true
    }

    /// The host focused `tab_id` in `window_id`. The tab losing focus was in
    /// use until now; the rest of the window is hidden behind the new tab.
    pub fn on_tab_activated(&mut self, tab_id: TabId, window_id: WindowId, now: u64) {
        for tab in self.tabs.values_mut().filter(|tab| tab.window_id == window_id) {
            let active = tab.tab_id == tab_id;
            if active != tab.is_active_in_window {
                tab.last_activity_time = now;
            }
            tab.is_active_in_window = active;
            tab.is_visible = active;
            tab.visibility_state = if active {
                VisibilityState::Visible
            } else {
                VisibilityState::Hidden
            };
        }
    }

    /// Carry over a timestamp recorded before the background restarted.
    /// Ignored when the id now belongs to a different page.
    pub fn restore_activity(&mut self, record: &TabActivity) -> bool {
        match self.tabs.get_mut(&record.tab_id) {
            Some(tab) if tab.url == record.url => {
                tab.last_activity_time = tab.last_activity_time.min(record.last_activity_time);
                true
            }
            _ => false,
        }
    }

    pub fn activity_records(&self) -> Vec<TabActivity> {
        self.tabs.values().map(TabActivity::from).collect()
    }

    pub fn on_page_info_report(&mut self, tab_id: TabId, url: &str, title: &str) -> bool {
        let Some(tab) = self.tabs.get_mut(&tab_id) else {
            return false;
        };
        if !url.is_empty() {
            tab.url = url.to_string();
        }
        if !title.is_empty() {
            tab.title = title.to_string();
        }
        true
    }

    pub fn set_icon(&mut self, tab_id: TabId, icon: &str) -> bool {
        match self.tabs.get_mut(&tab_id) {
            Some(tab) if !icon.is_empty() => {
                tab.icon = icon.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn tabs_missing_icon(&self) -> Vec<TabId> {
        self.tabs
            .values()
            .filter(|tab| tab.icon.is_empty())
            .map(|tab| tab.tab_id)
            .collect()
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TrackedTab> {
        self.tabs.get(&tab_id)
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.tabs.contains_key(&tab_id)
    }

    pub fn tabs(&self) -> impl Iterator<Item = &TrackedTab> {
        self.tabs.values()
    }

    pub fn ids(&self) -> Vec<TabId> {
        self.tabs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Put a tab back under tracking with a fresh activity timestamp
    pub fn admit(&mut self, tab: TrackedTab) {
        self.tabs.insert(tab.tab_id, tab);
    }

    /// Drop an entry whose host tab is gone; refused while a freeze is in flight
    pub fn purge(&mut self, tab_id: TabId) -> bool {
        if self.freezing.contains(&tab_id) {
            return false;
        }
        self.tabs.remove(&tab_id).is_some()
    }

    /// Claim a tab for freezing. False if untracked or already claimed.
    pub fn begin_freeze(&mut self, tab_id: TabId) -> bool {
        self.tabs.contains_key(&tab_id) && self.freezing.insert(tab_id)
    }

    pub fn end_freeze(&mut self, tab_id: TabId) {
        self.freezing.remove(&tab_id);
    }

    pub fn is_freezing(&self, tab_id: TabId) -> bool {
        self.freezing.contains(&tab_id)
    }

    pub fn remaining_time(&self, tab_id: TabId, timeout_minutes: u32, now: u64) -> Option<RemainingTime> {
        self.tabs.get(&tab_id).map(|tab| tab.remaining_time(timeout_minutes, now))
    }

    pub fn snapshot_with_remaining_time(&self, timeout_minutes: u32, now: u64) -> Vec<TabSummary> {
        self.tabs
            .values()
            .map(|tab| TabSummary::new(tab, tab.remaining_time(timeout_minutes, now)))
            .collect()
    }

    fn take(&mut self, tab_id: TabId) -> Option<TrackedTab> {
        self.freezing.remove(&tab_id);
        self.tabs.remove(&tab_id)
    }
}

/// Tabs currently replaced by the placeholder page
#[derive(Debug, Default)]
pub struct FrozenRegistry {
    tabs: BTreeMap<TabId, FrozenTab>,
}

impl FrozenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, data: FrozenTabsData) {
        self.tabs = data.tabs.into_iter().map(|tab| (tab.tab_id, tab)).collect();
    }

    pub fn to_data(&self) -> FrozenTabsData {
        FrozenTabsData::new(self.list())
    }

    pub fn get(&self, tab_id: TabId) -> Option<&FrozenTab> {
        self.tabs.get(&tab_id)
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.tabs.contains_key(&tab_id)
    }

    pub fn remove(&mut self, tab_id: TabId) -> Option<FrozenTab> {
        self.tabs.remove(&tab_id)
    }

    pub fn list(&self) -> Vec<FrozenTab> {
        self.tabs.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Drop entries whose tab is not in `open`; returns the dropped ids
    pub fn retain_open(&mut self, open: &HashSet<TabId>) -> Vec<TabId> {
        let stale: Vec<TabId> = self.tabs.keys().filter(|id| !open.contains(*id)).copied().collect();
        for tab_id in &stale {
            self.tabs.remove(tab_id);
        }
        stale
    }

    fn insert(&mut self, tab: FrozenTab) {
        self.tabs.insert(tab.tab_id, tab);
    }
}

/// Both registries; entries only move between them through these two methods
#[derive(Debug, Default)]
pub struct TabState {
    pub tracked: TabRegistry,
    pub frozen: FrozenRegistry,
}

impl TabState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit point of a freeze: tracked entry out, frozen entry in
    pub fn move_to_frozen(&mut self, frozen: FrozenTab) -> Option<TrackedTab> {
        let tracked = self.tracked.take(frozen.tab_id);
        self.frozen.insert(frozen);
        tracked
    }

    /// Commit point of a restore: frozen entry out, tracked entry in
    pub fn move_to_tracked(&mut self, tracked: TrackedTab) -> Option<FrozenTab> {
        let frozen = self.frozen.remove(tracked.tab_id);
        self.tracked.admit(tracked);
        frozen
    }

    pub fn is_exclusive(&self) -> bool {
        self.tracked.tabs().all(|tab| !self.frozen.contains(tab.tab_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_tab(id: TabId, url: &str) -> HostTab {
        HostTab {
            id: Some(id),
            url: Some(url.to_string()),
            title: Some(format!("Tab {}", id)),
            fav_icon_url: None,
            window_id: 1,
            active: false,
            pinned: false,
        }
    }

    fn frozen(id: TabId) -> FrozenTab {
        FrozenTab {
            tab_id: id,
            original_url: "https://example.com".to_string(),
            icon: String::new(),
            title: "Example".to_string(),
        }
    }

    #[test]
    fn test_on_tab_opened_filters() {
        let mut registry = TabRegistry::new();

        let mut no_id = host_tab(1, "https://a.com");
        no_id.id = None;
        assert!(!registry.on_tab_opened(&no_id, true, 0));

        assert!(!registry.on_tab_opened(&host_tab(2, "chrome://settings"), true, 0));

        let mut pinned = host_tab(3, "https://b.com");
        pinned.pinned = true;
        assert!(!registry.on_tab_opened(&pinned, false, 0));
        assert!(registry.on_tab_opened(&pinned, true, 0));

        assert!(registry.on_tab_opened(&host_tab(4, "http://c.com"), true, 10));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(4).unwrap().last_activity_time, 10);
    }

    #[test]
    fn test_on_tab_updated_merges_without_touching_visibility() {
        let mut registry = TabRegistry::new();
        registry.on_tab_opened(&host_tab(1, "https://a.com"), true, 0);
        registry.on_visibility_report(1, true, 5);

        let mut update = host_tab(1, "https://a.com/next");
        update.title = Some("Next".to_string());
        update.active = false;
        assert!(registry.on_tab_updated(&update, true, 100));

        let tab = registry.get(1).unwrap();
        assert_eq!(tab.url, "https://a.com/next");
        assert_eq!(tab.title, "Next");
        assert!(tab.is_visible);
        assert_eq!(tab.last_activity_time, 5);
    }

    #[test]
    fn test_on_tab_updated_untracked_is_opened() {
        let mut registry = TabRegistry::new();

        assert!(registry.on_tab_updated(&host_tab(9, "https://a.com"), true, 42));
        assert_eq!(registry.get(9).unwrap().last_activity_time, 42);
    }

    #[test]
    fn test_on_tab_updated_drops_non_web_navigation() {
        let mut registry = TabRegistry::new();
        registry.on_tab_opened(&host_tab(1, "https://a.com"), true, 0);

        registry.on_tab_updated(&host_tab(1, "chrome://history"), true, 1);

        assert!(!registry.contains(1));
    }

    #[test]
    fn test_visibility_report_bumps_activity_on_show() {
        let mut registry = TabRegistry::new();
        registry.on_tab_opened(&host_tab(1, "https://a.com"), true, 0);

        registry.on_visibility_report(1, false, 50);
        assert_eq!(registry.get(1).unwrap().last_activity_time, 0);
        assert_eq!(registry.get(1).unwrap().visibility_state, VisibilityState::Hidden);

        registry.on_visibility_report(1, true, 80);
        let tab = registry.get(1).unwrap();
        assert_eq!(tab.last_activity_time, 80);
        assert!(tab.is_visible);
        assert_eq!(tab.visibility_state, VisibilityState::Visible);
    }

    #[test]
    fn test_tab_activation_moves_focus_within_window() {
        let mut registry = TabRegistry::new();
        let mut first = host_tab(1, "https://a.com");
        first.active = true;
        registry.on_tab_opened(&first, true, 0);
        registry.on_tab_opened(&host_tab(2, "https://b.com"), true, 0);
        let mut other_window = host_tab(3, "https://c.com");
        other_window.window_id = 2;
        other_window.active = true;
        registry.on_tab_opened(&other_window, true, 0);

        registry.on_tab_activated(2, 1, 500);

        let first = registry.get(1).unwrap();
        assert!(!first.is_in_use());
        assert_eq!(first.visibility_state, VisibilityState::Hidden);
        assert_eq!(first.last_activity_time, 500);
        let second = registry.get(2).unwrap();
        assert!(second.is_active_in_window && second.is_visible);
        assert_eq!(second.last_activity_time, 500);
        let untouched = registry.get(3).unwrap();
        assert!(untouched.is_in_use());
        assert_eq!(untouched.last_activity_time, 0);
    }

    #[test]
    fn test_restore_activity_requires_same_page() {
        let mut registry = TabRegistry::new();
        registry.on_tab_opened(&host_tab(1, "https://a.com"), true, 9_000);
        registry.on_tab_opened(&host_tab(2, "https://b.com"), true, 9_000);

        let records = vec![
            TabActivity { tab_id: 1, url: "https://a.com".to_string(), last_activity_time: 1_000 },
            TabActivity { tab_id: 2, url: "https://other.com".to_string(), last_activity_time: 1_000 },
            TabActivity { tab_id: 7, url: "https://a.com".to_string(), last_activity_time: 1_000 },
        ];
        let restored: Vec<bool> = records.iter().map(|record| registry.restore_activity(record)).collect();

        assert_eq!(restored, vec![true, false, false]);
        assert_eq!(registry.get(1).unwrap().last_activity_time, 1_000);
        assert_eq!(registry.get(2).unwrap().last_activity_time, 9_000);
        assert_eq!(registry.activity_records().len(), 2);
    }

    #[test]
    fn test_activity_report_unknown_tab() {
        let mut registry = TabRegistry::new();
        assert!(!registry.on_activity_report(3, 10));
    }

    #[test]
    fn test_freeze_claim_blocks_removal_and_reentry() {
        let mut registry = TabRegistry::new();
        registry.on_tab_opened(&host_tab(1, "https://a.com"), true, 0);

        assert!(registry.begin_freeze(1));
        assert!(!registry.begin_freeze(1));
        assert!(!registry.on_tab_removed(1));
        assert!(!registry.purge(1));
        assert!(registry.contains(1));

        registry.end_freeze(1);
        assert!(registry.on_tab_removed(1));
        assert!(!registry.begin_freeze(1));
    }

    #[test]
    fn test_tabs_missing_icon() {
        let mut registry = TabRegistry::new();
        registry.on_tab_opened(&host_tab(1, "https://a.com"), true, 0);
        registry.on_tab_opened(&host_tab(2, "https://b.com"), true, 0);
        registry.set_icon(2, "https://b.com/favicon.ico");

        assert_eq!(registry.tabs_missing_icon(), vec![1]);
        assert!(!registry.set_icon(1, ""));
    }

    #[test]
    fn test_snapshot_with_remaining_time() {
        let mut registry = TabRegistry::new();
        let mut active = host_tab(1, "https://a.com");
        active.active = true;
        registry.on_tab_opened(&active, true, 0);
        registry.on_tab_opened(&host_tab(2, "https://b.com"), true, 0);

        let rows = registry.snapshot_with_remaining_time(20, 5 * 60_000);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].remaining_minutes, -1);
        assert_eq!(rows[1].remaining_minutes, 15);
        assert_eq!(registry.remaining_time(2, 20, 30 * 60_000), Some(RemainingTime::Minutes(0)));
        assert_eq!(registry.remaining_time(3, 20, 0), None);
    }

    #[test]
    fn test_frozen_retain_open() {
        let mut registry = FrozenRegistry::new();
        registry.load(FrozenTabsData::new(vec![frozen(1), frozen(2), frozen(3)]));

        let open: HashSet<TabId> = [1, 3].into_iter().collect();
        let purged = registry.retain_open(&open);

        assert_eq!(purged, vec![2]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.to_data().tabs.len(), 2);
    }

    #[test]
    fn test_moves_keep_registries_exclusive() {
        let mut state = TabState::new();
        state.tracked.on_tab_opened(&host_tab(1, "https://example.com"), true, 0);
        state.tracked.begin_freeze(1);

        let previous = state.move_to_frozen(frozen(1));
        assert!(previous.is_some());
        assert!(!state.tracked.contains(1));
        assert!(!state.tracked.is_freezing(1));
        assert!(state.frozen.contains(1));
        assert!(state.is_exclusive());

        let tab = TrackedTab::from_host(1, &host_tab(1, "https://example.com"), 99);
        let previous = state.move_to_tracked(tab);
        assert!(previous.is_some());
        assert!(state.tracked.contains(1));
        assert!(state.frozen.is_empty());
        assert!(state.is_exclusive());
    }
}
