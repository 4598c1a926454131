use crate::types::CampaignId;
use thiserror::Error;

pub type PopupResult<T> = Result<T, PopupError>;

#[derive(Error, Debug)]
pub enum PopupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis cache error: {0}")]
    Cache(String),

    #[error("Campaign store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Campaign {0} not found")]
    NotFound(CampaignId),

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
