/// Error taxonomy for the freezer core
use thiserror::Error;

use crate::tab_data::TabId;

#[derive(Error, Debug)]
pub enum FreezeError {
    /// A config value or domain was rejected before any mutation happened
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    /// The host tab is gone or the host API refused the call
    #[error("Tab error: {0}")]
    Tab(String),

    #[error("Page agent unavailable: {0}")]
    PageAgentUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FreezeError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        FreezeError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn tab_not_found(tab_id: TabId) -> Self {
        FreezeError::Tab(format!("No tab with id {}", tab_id))
    }

    pub fn is_tab_gone(&self) -> bool {
        matches!(self, FreezeError::Tab(_))
    }
}

pub type Result<T> = std::result::Result<T, FreezeError>;
