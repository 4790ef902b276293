/// Data structures for Tab Freezer
use serde::{Deserialize, Serialize};

pub type TabId = i32;
pub type WindowId = i32;

/// Wire value for "the tab is in use, no countdown"
pub const ACTIVE_SENTINEL: i64 = -1;

/// Page visibility as reported by the page agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    Visible,
    #[default]
    Hidden,
    Prerender,
    Unloaded,
}

/// A tab as the browser describes it (subset of `chrome.tabs.Tab`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostTab {
    pub id: Option<TabId>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub fav_icon_url: Option<String>,
    pub window_id: WindowId,
    pub active: bool,
    pub pinned: bool,
}

impl HostTab {
    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    pub fn icon(&self) -> &str {
        self.fav_icon_url.as_deref().unwrap_or_default()
    }
}

/// An open tab whose activity is being watched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTab {
    pub tab_id: TabId,
    pub url: String,
    pub title: String,
    pub icon: String,
    pub last_activity_time: u64,
    pub window_id: WindowId,
    pub is_active_in_window: bool,
    pub pinned: bool,
    pub is_visible: bool,
    pub visibility_state: VisibilityState,
}

impl TrackedTab {
    pub fn from_host(tab_id: TabId, tab: &HostTab, now: u64) -> TrackedTab {
        TrackedTab {
            tab_id,
            url: tab.url().to_string(),
            title: tab.title().to_string(),
            icon: tab.icon().to_string(),
            last_activity_time: now,
            window_id: tab.window_id,
            is_active_in_window: tab.active,
            pinned: tab.pinned,
            is_visible: tab.active,
            visibility_state: if tab.active {
                VisibilityState::Visible
            } else {
                VisibilityState::Hidden
            },
        }
    }

    /// Copy navigation-related fields from a fresher host view.
    /// Visibility is left alone: only page reports may change it.
    pub fn merge_host(&mut self, tab: &HostTab) {
        if let Some(url) = &tab.url {
            self.url = url.clone();
        }
        if let Some(title) = &tab.title {
            self.title = title.clone();
        }
        if let Some(icon) = tab.fav_icon_url.as_ref().filter(|icon| !icon.is_empty()) {
            self.icon = icon.clone();
        }
        self.window_id = tab.window_id;
        self.is_active_in_window = tab.active;
        self.pinned = tab.pinned;
    }

    pub fn is_in_use(&self) -> bool {
        self.is_active_in_window || self.is_visible
    }

    pub fn idle_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_activity_time)
    }

    pub fn remaining_time(&self, timeout_minutes: u32, now: u64) -> RemainingTime {
        if self.is_in_use() {
            return RemainingTime::Active;
        }

        let timeout_ms = u64::from(timeout_minutes) * 60_000;
        let left_ms = timeout_ms.saturating_sub(self.idle_ms(now));
        RemainingTime::Minutes(left_ms.div_ceil(60_000))
    }
}

/// Last activity of a tracked tab, kept across background restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabActivity {
    pub tab_id: TabId,
    pub url: String,
    pub last_activity_time: u64,
}

impl From<&TrackedTab> for TabActivity {
    fn from(tab: &TrackedTab) -> Self {
        TabActivity {
            tab_id: tab.tab_id,
            url: tab.url.clone(),
            last_activity_time: tab.last_activity_time,
        }
    }
}

/// A tab currently showing the freeze placeholder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenTab {
    pub tab_id: TabId,
    pub original_url: String,
    pub icon: String,
    pub title: String,
}

/// Time left before a tab may be frozen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTime {
    Active,
    Minutes(u64),
}

impl RemainingTime {
    pub fn to_wire(self) -> i64 {
        match self {
            RemainingTime::Active => ACTIVE_SENTINEL,
            RemainingTime::Minutes(minutes) => i64::try_from(minutes).unwrap_or(i64::MAX),
        }
    }
}

/// One row of the tracked-tab listing shown by the popup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSummary {
    pub tab_id: TabId,
    pub title: String,
    pub url: String,
    pub icon: String,
    pub window_id: WindowId,
    pub active: bool,
    pub remaining_minutes: i64,
    pub last_use_time: u64,
}

impl TabSummary {
    pub fn new(tab: &TrackedTab, remaining: RemainingTime) -> TabSummary {
        TabSummary {
            tab_id: tab.tab_id,
            title: tab.title.clone(),
            url: tab.url.clone(),
            icon: tab.icon.clone(),
            window_id: tab.window_id,
            active: tab.is_active_in_window,
            remaining_minutes: remaining.to_wire(),
            last_use_time: tab.last_activity_time,
        }
    }
}
