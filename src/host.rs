/// Contract for the browser's tab, window and messaging APIs

use crate::error::{FreezeError, Result};
use crate::tab_data::{HostTab, TabId, WindowId};
use futures::future::{self, Either};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on waiting for the page agent before falling back to cached data
pub const PAGE_INFO_TIMEOUT_MS: u32 = 1_500;

/// Messages sent from the background to a page (agent or placeholder)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageCommand {
    GetPageInfo,
    #[serde(rename_all = "camelCase")]
    SetSnapshot { image_data_url: String },
}

/// Live URL and title as the page itself sees them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

#[allow(async_fn_in_trait)]
pub trait TabHost {
    /// Milliseconds since the epoch
    fn now_ms(&self) -> u64;

    async fn sleep(&self, ms: u32);

    async fn query_tabs(&self) -> Result<Vec<HostTab>>;

    /// Fails with `FreezeError::Tab` when the tab no longer exists
    async fn get_tab(&self, tab_id: TabId) -> Result<HostTab>;

    async fn update_tab_url(&self, tab_id: TabId, url: &str) -> Result<()>;

    async fn focus_tab(&self, tab_id: TabId) -> Result<()>;

    /// JPEG data URL of the window's visible tab
    async fn capture_snapshot(&self, window_id: WindowId, quality: u8) -> Result<String>;

    /// Fails with `FreezeError::PageAgentUnavailable` when nothing answers
    async fn send_to_page(&self, tab_id: TabId, command: &PageCommand) -> Result<Value>;

    /// Absolute URL of a page bundled with the extension
    fn extension_url(&self, path: &str) -> String;
}

/// Ask the page agent for its live URL/title, giving up after `timeout_ms`
pub async fn fetch_page_info<H: TabHost>(host: &H, tab_id: TabId, timeout_ms: u32) -> Result<PageInfo> {
    let command = PageCommand::GetPageInfo;
    let query = host.send_to_page(tab_id, &command);
    let deadline = host.sleep(timeout_ms);
    futures::pin_mut!(query);
    futures::pin_mut!(deadline);

    match future::select(query, deadline).await {
        Either::Left((Ok(reply), _)) => Ok(serde_json::from_value(reply)?),
        Either::Left((Err(e), _)) => Err(e),
        Either::Right(_) => Err(FreezeError::PageAgentUnavailable(format!(
            "tab {} did not answer within {}ms",
            tab_id, timeout_ms
        ))),
    }
}
