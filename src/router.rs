/// Request/response contract between the background core, page agents and UI
use std::rc::Rc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigPatch};
use crate::engine::{FreezeEngine, RestoreSummary};
use crate::error::Result;
use crate::host::{PageInfo, TabHost};
use crate::storage::Storage;
use crate::tab_data::{FrozenTab, HostTab, TabId, TabSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    // From page agents; the tab is the sender
    ReportActivity,
    ReportPageInfo { url: String, title: String },
    ReportVisible,
    ReportHidden,
    QueryTabId,
    QueryActive,

    // From the popup, options page and placeholder
    ListTrackedTabs,
    #[serde(rename_all = "camelCase")]
    QueryRemainingTime { tab_id: TabId },
    ListFrozenTabs,
    #[serde(rename_all = "camelCase")]
    RemoveFrozenTab { tab_id: TabId },
    RestoreAllFrozen,
    #[serde(rename_all = "camelCase")]
    RestoreTab { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    FreezeTab { tab_id: TabId },
    GetAllowList,
    AddToAllowList { domain: String },
    RemoveFromAllowList { domain: String },
    GetConfig,
    UpdateConfig { patch: ConfigPatch },
    ResetConfig,
    #[serde(rename_all = "camelCase")]
    GotoTab { tab_id: TabId },
}

/// Who sent a message; mirrors `chrome.runtime.MessageSender`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Sender {
    pub tab: Option<HostTab>,
}

impl Sender {
    pub fn from_tab(tab: HostTab) -> Self {
        Sender { tab: Some(tab) }
    }

    fn tab_id(&self) -> Option<TabId> {
        self.tab.as_ref().and_then(|tab| tab.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    fn ok(message: impl Into<String>) -> Self {
        Outcome {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Outcome {
            success: false,
            message: message.into(),
        }
    }
}

impl<T> From<Result<T>> for Outcome {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => Outcome::ok("OK"),
            Err(e) => Outcome::failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ack(String),
    Flag(bool),
    Number(i64),
    Tabs(Vec<TabSummary>),
    Frozen(Vec<FrozenTab>),
    Domains(Vec<String>),
    Outcome(Outcome),
    Restore(RestoreSummary),
    Config(Config),
    Empty,
}

impl Response {
    fn ack(message: &str) -> Self {
        Response::Ack(message.to_string())
    }

    fn failed(message: impl Into<String>) -> Self {
        Response::Outcome(Outcome::failed(message))
    }
}

const NO_SENDER_TAB: &str = "Failed to get tab id";

pub struct Router<H: TabHost, S: Storage> {
    engine: Rc<FreezeEngine<H, S>>,
}

impl<H: TabHost, S: Storage> Router<H, S> {
    pub fn new(engine: Rc<FreezeEngine<H, S>>) -> Self {
        Router { engine }
    }

    /// Answer one request. Never fails: errors become `{success: false, message}`.
    pub async fn handle(&self, request: Request, sender: &Sender) -> Response {
        debug!("Handling {:?} from tab {:?}", request, sender.tab_id());
        let engine = &self.engine;

        match request {
            Request::ReportActivity => match sender.tab_id() {
                Some(tab_id) if engine.report_activity(tab_id) => Response::ack("Updated last use time"),
                Some(_) => Response::ack("Tab not found"),
                None => Response::ack(NO_SENDER_TAB),
            },
            Request::ReportPageInfo { url, title } => match sender.tab_id() {
                Some(tab_id) if engine.report_page_info(tab_id, &PageInfo { url, title }) => {
                    Response::ack("Updated page info")
                }
                Some(_) => Response::ack("Tab not found"),
                None => Response::ack(NO_SENDER_TAB),
            },
            Request::ReportVisible | Request::ReportHidden => {
                let visible = matches!(request, Request::ReportVisible);
                if let Some(tab_id) = sender.tab_id() {
                    engine.report_visibility(tab_id, visible);
                }
                Response::Empty
            }
            Request::QueryTabId => match &sender.tab {
                Some(tab @ HostTab { id: Some(tab_id), .. }) => {
                    engine.admit_sender(tab);
                    Response::Number(i64::from(*tab_id))
                }
                _ => Response::failed(NO_SENDER_TAB),
            },
            Request::QueryActive => Response::Flag(sender.tab.as_ref().is_some_and(|tab| tab.active)),

            Request::ListTrackedTabs => Response::Tabs(engine.tracked_summaries()),
            Request::QueryRemainingTime { tab_id } => match engine.remaining_time(tab_id) {
                Some(remaining) => Response::Number(remaining.to_wire()),
                None => Response::failed(format!("Tab {} is not tracked", tab_id)),
            },
            Request::ListFrozenTabs => Response::Frozen(engine.frozen_tabs()),
            Request::RemoveFrozenTab { tab_id } => {
                if engine.remove_frozen(tab_id).await {
                    Response::ack("Removed frozen tab")
                } else {
                    Response::ack("Tab not found")
                }
            }
            Request::RestoreAllFrozen => Response::Restore(engine.restore_all().await),
            Request::RestoreTab { tab_id } => Response::Outcome(match engine.restore_tab(tab_id).await {
                Ok(true) => Outcome::ok("Tab restored"),
                Ok(false) => Outcome::failed(format!("Tab {} is not frozen", tab_id)),
                Err(e) => Outcome::failed(e.to_string()),
            }),
            Request::FreezeTab { tab_id } => Response::Outcome(match engine.freeze_manually(tab_id).await {
                Ok(true) => Outcome::ok("Tab frozen"),
                Ok(false) => Outcome::failed(format!("Tab {} is already frozen", tab_id)),
                Err(e) => Outcome::failed(e.to_string()),
            }),

            Request::GetAllowList => Response::Domains(engine.config().get().allow_list),
            Request::AddToAllowList { domain } => {
                Response::Outcome(engine.config().add_to_allow_list(&domain).await.into())
            }
            Request::RemoveFromAllowList { domain } => {
                Response::Outcome(engine.config().remove_from_allow_list(&domain).await.into())
            }
            Request::GetConfig => Response::Config(engine.config().get()),
            Request::UpdateConfig { patch } => Response::Outcome(engine.config().update(patch).await.into()),
            Request::ResetConfig => Response::Outcome(engine.config().reset_to_defaults().await.into()),

            Request::GotoTab { tab_id } => {
                if let Err(e) = engine.host().focus_tab(tab_id).await {
                    warn!("Could not focus tab {}: {}", tab_id, e);
                }
                Response::Empty
            }
        }
    }
}
