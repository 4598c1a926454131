//! Operations exposed to the transport layer.
//!
//! Administrative writes go to the durable store first and the cache second.
//! A failed cache write after a successful store write is reported to the
//! caller but never rolls the store back; the cache stays stale until the
//! next upsert of that campaign or a resync.

use crate::decision::DecisionEngine;
use crate::impressions::ImpressionRecorder;
use crate::sync::CacheSynchronizer;
use popup_core::config::AppConfig;
use popup_core::types::{validate_campaign_id, validate_user_id};
use popup_core::{Campaign, CampaignCache, CampaignId, CampaignStore, Deadline, PopupError, PopupResult, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Default and maximum page sizes for campaign listings.
pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;

pub struct PopupService {
    engine: DecisionEngine,
    recorder: ImpressionRecorder,
    sync: CacheSynchronizer,
    store: Arc<dyn CampaignStore>,
    request_timeout: Duration,
    sync_timeout: Duration,
}

impl PopupService {
    pub fn new(
        cache: Arc<dyn CampaignCache>,
        store: Arc<dyn CampaignStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            engine: DecisionEngine::new(cache.clone()),
            recorder: ImpressionRecorder::new(cache.clone()),
            sync: CacheSynchronizer::new(cache, store.clone(), config.sync.page_size)
                .with_orphan_pruning(config.sync.prune_orphans),
            store,
            request_timeout: Duration::from_millis(config.api.request_timeout_ms),
            sync_timeout: Duration::from_millis(config.sync.timeout_ms),
        }
    }

    fn request_deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }

    // ─── Client ────────────────────────────────────────────────────────────

    /// The popup to show `user_id`, if any.
    pub async fn get_popup(&self, user_id: UserId) -> PopupResult<Option<Campaign>> {
        validate_user_id(user_id)?;
        self.engine
            .select_popup(user_id, self.request_deadline())
            .await
    }

    pub async fn register_impression(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> PopupResult<()> {
        validate_user_id(user_id)?;
        validate_campaign_id(campaign_id)?;
        self.recorder
            .record_impression(user_id, campaign_id, self.request_deadline())
            .await
    }

    // ─── Admin ─────────────────────────────────────────────────────────────

    /// Persist a new campaign, then mirror it into the cache.
    pub async fn create_campaign(&self, campaign: Campaign) -> PopupResult<Campaign> {
        campaign.validate()?;
        let deadline = self.request_deadline();

        let created = deadline.run(self.store.create(campaign)).await?;
        self.sync
            .upsert(&created, deadline)
            .await
            .map_err(|e| cache_write_failed(created.id, e))?;
        Ok(created)
    }

    /// Replace a campaign, then mirror it into the cache.
    pub async fn update_campaign(&self, campaign: Campaign) -> PopupResult<Campaign> {
        validate_campaign_id(campaign.id)?;
        campaign.validate()?;
        let deadline = self.request_deadline();

        let updated = deadline.run(self.store.update(campaign)).await?;
        self.sync
            .upsert(&updated, deadline)
            .await
            .map_err(|e| cache_write_failed(updated.id, e))?;
        Ok(updated)
    }

    /// Delete a campaign from the store, then from the cache.
    pub async fn delete_campaign(&self, id: CampaignId) -> PopupResult<()> {
        validate_campaign_id(id)?;
        let deadline = self.request_deadline();

        deadline.run(self.store.delete(id)).await?;
        self.sync
            .remove(id, deadline)
            .await
            .map_err(|e| cache_write_failed(id, e))
    }

    /// One page of campaigns straight from the durable store, newest first.
    pub async fn list_campaigns(
        &self,
        before_id: Option<CampaignId>,
        limit: Option<usize>,
    ) -> PopupResult<Vec<Campaign>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if limit == 0 || limit > MAX_LIST_LIMIT {
            return Err(PopupError::Validation(format!(
                "limit must be between 1 and {MAX_LIST_LIMIT}"
            )));
        }
        self.request_deadline()
            .run(self.store.list_page(before_id, limit))
            .await
    }

    /// A single campaign straight from the durable store.
    pub async fn get_campaign(&self, id: CampaignId) -> PopupResult<Option<Campaign>> {
        validate_campaign_id(id)?;
        self.request_deadline().run(self.store.get(id)).await
    }

    /// Rebuild the cache from the durable store.
    pub async fn sync_campaigns(&self) -> PopupResult<usize> {
        info!("Full cache resync requested");
        self.sync
            .resync_all(Deadline::after(self.sync_timeout))
            .await
    }
}

/// The store write already committed; tell the caller the cache is stale.
fn cache_write_failed(id: CampaignId, e: PopupError) -> PopupError {
    error!(campaign_id = id, error = %e, "Campaign stored but cache sync failed; resync required");
    match e {
        PopupError::DeadlineExceeded => PopupError::DeadlineExceeded,
        other => PopupError::Cache(format!(
            "campaign {id} was saved but the cache was not updated ({other}); trigger a resync"
        )),
    }
}
