pub mod config;
pub mod deadline;
pub mod error;
pub mod ports;
pub mod types;

pub use config::AppConfig;
pub use deadline::Deadline;
pub use error::{PopupError, PopupResult};
pub use ports::{ActiveEntry, CampaignCache, CampaignStore};
pub use types::{Campaign, CampaignId, Target, UserId};
