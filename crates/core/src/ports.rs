//! Seams between the decisioning core and its two backing stores.
//!
//! The cache is read on every decision; the durable store is only touched by
//! administrative calls and resynchronization.

use crate::error::PopupResult;
use crate::types::{Campaign, CampaignId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;

/// One member of the active index together with its ranking score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveEntry {
    pub campaign_id: CampaignId,
    pub score: f64,
}

/// Read-optimized cache holding the active index, metadata snapshots,
/// segment membership and per-user impression counters.
///
/// Single operations are atomic; multi-key batches are not.
#[async_trait]
pub trait CampaignCache: Send + Sync {
    /// Every member of the active index, in no guaranteed order.
    async fn active_campaigns(&self) -> PopupResult<Vec<ActiveEntry>>;

    /// Fetch snapshots for `ids` in one round trip. Ids without a snapshot
    /// are absent from the result.
    async fn campaign_metadata(
        &self,
        ids: &[CampaignId],
    ) -> PopupResult<HashMap<CampaignId, Campaign>>;

    /// Membership test against the campaign's segment bitmap.
    async fn is_user_targeted(&self, campaign_id: CampaignId, user_id: UserId)
        -> PopupResult<bool>;

    /// How many times `user_id` has seen `campaign_id`; zero when unknown.
    async fn seen_count(&self, user_id: UserId, campaign_id: CampaignId) -> PopupResult<u64>;

    /// Add one impression and push the user's counter expiry out again.
    async fn increment_impression(&self, user_id: UserId, campaign_id: CampaignId)
        -> PopupResult<()>;

    /// Write the snapshot and add or drop the index entry per `is_active`.
    async fn save_campaign(&self, campaign: &Campaign) -> PopupResult<()>;

    /// Drop the index entry and the snapshot.
    async fn remove_campaign(&self, id: CampaignId) -> PopupResult<()>;
}

/// System of record for campaign definitions.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Persist a new campaign; the returned value carries the assigned id.
    async fn create(&self, campaign: Campaign) -> PopupResult<Campaign>;

    /// Replace an existing campaign. `NotFound` when the id is unknown.
    async fn update(&self, campaign: Campaign) -> PopupResult<Campaign>;

    /// Delete by id. Deleting an unknown id succeeds.
    async fn delete(&self, id: CampaignId) -> PopupResult<()>;

    async fn get(&self, id: CampaignId) -> PopupResult<Option<Campaign>>;

    /// Up to `limit` campaigns with id strictly below `before_id`,
    /// highest id first.
    async fn list_page(
        &self,
        before_id: Option<CampaignId>,
        limit: usize,
    ) -> PopupResult<Vec<Campaign>>;
}
