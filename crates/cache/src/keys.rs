//! Redis key layout. Shared with existing deployments, so these names are
//! part of the wire contract.

use popup_core::{CampaignId, UserId};

/// Sorted set of active campaigns, score = priority, member = campaign id.
pub const ACTIVE_INDEX: &str = "campaigns:active";

/// JSON snapshot of one campaign.
pub fn metadata(id: CampaignId) -> String {
    format!("campaign:{id}:meta")
}

/// Segment bitmap of one campaign, bit offset = user id.
pub fn segment_members(id: CampaignId) -> String {
    format!("campaign:{id}:users")
}

/// Per-user hash of campaign id -> seen count.
pub fn impressions(user_id: UserId) -> String {
    format!("user:{user_id}:impressions")
}
