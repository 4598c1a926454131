//! In-memory campaign store backed by DashMap.
//!
//! Production: replace with PostgreSQL or similar ACID store.
//! This provides the same API surface for development and testing.

use async_trait::async_trait;
use dashmap::DashMap;
use popup_core::{Campaign, CampaignId, CampaignStore, PopupError, PopupResult};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;

/// Thread-safe in-memory store for campaigns. Ids are assigned from a
/// monotonically increasing sequence starting at 1.
pub struct InMemoryCampaignStore {
    campaigns: DashMap<CampaignId, Campaign>,
    next_id: AtomicI64,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        info!("Campaign store initialized (in-memory, development mode)");
        Self {
            campaigns: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

impl Default for InMemoryCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn create(&self, mut campaign: Campaign) -> PopupResult<Campaign> {
        campaign.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.campaigns.insert(campaign.id, campaign.clone());
        metrics::counter!("store.campaigns.created").increment(1);
        info!(campaign_id = campaign.id, title = %campaign.title, "Campaign created");
        Ok(campaign)
    }

    async fn update(&self, campaign: Campaign) -> PopupResult<Campaign> {
        let mut entry = self
            .campaigns
            .get_mut(&campaign.id)
            .ok_or(PopupError::NotFound(campaign.id))?;
        *entry.value_mut() = campaign.clone();
        info!(campaign_id = campaign.id, "Campaign updated");
        Ok(campaign)
    }

    async fn delete(&self, id: CampaignId) -> PopupResult<()> {
        if self.campaigns.remove(&id).is_some() {
            metrics::counter!("store.campaigns.deleted").increment(1);
            info!(campaign_id = id, "Campaign deleted");
        }
        Ok(())
    }

    async fn get(&self, id: CampaignId) -> PopupResult<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|r| r.value().clone()))
    }

    async fn list_page(
        &self,
        before_id: Option<CampaignId>,
        limit: usize,
    ) -> PopupResult<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|r| before_id.map_or(true, |before| *r.key() < before))
            .map(|r| r.value().clone())
            .collect();
        campaigns.sort_by(|a, b| b.id.cmp(&a.id));
        campaigns.truncate(limit);
        Ok(campaigns)
    }
}
