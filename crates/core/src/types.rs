//! Campaign model shared by the decision path, the cache adapters and the
//! durable store.

use crate::error::{PopupError, PopupResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Durable-store assigned campaign identity. Valid ids are strictly positive.
pub type CampaignId = i64;

/// End-user identity. Doubles as the bit offset into segment bitmaps.
pub type UserId = i64;

/// Audience a campaign is eligible for.
///
/// Serialized flat into the campaign snapshot as `target_type` plus an
/// optional `target_segment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "target_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    /// Every user is eligible.
    All,
    /// Eligibility is decided by the campaign's membership bitmap. Older
    /// snapshots omit the segment name; only create and update require it.
    Segment {
        #[serde(default)]
        target_segment: String,
    },
}

/// A popup campaign, the unit of targeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Campaign {
    #[serde(default)]
    pub id: CampaignId,
    pub title: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub action_url: String,
    /// Higher value is evaluated first.
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    /// Exclusive upper bound of the validity window.
    pub end_time: DateTime<Utc>,
    /// Maximum impressions per user.
    pub max_frequency: u32,
    #[serde(flatten)]
    pub target: Target,
    #[serde(default)]
    pub is_active: bool,
}

impl Campaign {
    /// Whether `now` falls in `[start_time, end_time)`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time && now < self.end_time
    }

    /// Validate the fields a caller supplies on create/update.
    pub fn validate(&self) -> PopupResult<()> {
        if self.title.trim().is_empty() {
            return Err(PopupError::Validation("title must not be empty".into()));
        }
        if self.end_time <= self.start_time {
            return Err(PopupError::Validation(
                "end_time must be after start_time".into(),
            ));
        }
        if let Target::Segment { target_segment } = &self.target {
            if target_segment.trim().is_empty() {
                return Err(PopupError::Validation(
                    "target_segment is required for SEGMENT campaigns".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Reject ids that can never have been assigned by the durable store.
pub fn validate_campaign_id(id: CampaignId) -> PopupResult<()> {
    if id <= 0 {
        return Err(PopupError::Validation(format!("invalid campaign id {id}")));
    }
    Ok(())
}

/// Reject user ids that cannot address a membership bit.
pub fn validate_user_id(id: UserId) -> PopupResult<()> {
    if id < 0 {
        return Err(PopupError::Validation(format!("invalid user id {id}")));
    }
    Ok(())
}
