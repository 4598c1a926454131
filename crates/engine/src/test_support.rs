//! Fixtures shared by the engine's unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use popup_cache::LocalCampaignCache;
use popup_core::{
    ActiveEntry, Campaign, CampaignCache, CampaignId, PopupError, PopupResult, Target, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn campaign(id: CampaignId, priority: i32, now: DateTime<Utc>) -> Campaign {
    Campaign {
        id,
        title: format!("campaign-{id}"),
        image_url: format!("https://cdn.example.com/{id}.png"),
        action_url: format!("https://example.com/promo/{id}"),
        priority,
        start_time: now - Duration::hours(1),
        end_time: now + Duration::hours(1),
        max_frequency: 3,
        target: Target::All,
        is_active: true,
    }
}

pub fn segment(name: &str) -> Target {
    Target::Segment {
        target_segment: name.to_string(),
    }
}

/// Wraps the local cache and fails selected operations on demand.
pub struct FaultyCache {
    pub inner: LocalCampaignCache,
    pub fail_active: AtomicBool,
    pub fail_metadata: AtomicBool,
    pub fail_targeting: AtomicBool,
    pub fail_seen: AtomicBool,
    pub fail_increment: AtomicBool,
    pub fail_save: AtomicBool,
    pub stall_seen: AtomicBool,
    pub saves: AtomicUsize,
    /// Per-id replacement of the stored snapshot; `None` hides it.
    pub snapshot_overrides: Mutex<HashMap<CampaignId, Option<Campaign>>>,
}

impl FaultyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalCampaignCache::new(86_400),
            fail_active: AtomicBool::new(false),
            fail_metadata: AtomicBool::new(false),
            fail_targeting: AtomicBool::new(false),
            fail_seen: AtomicBool::new(false),
            fail_increment: AtomicBool::new(false),
            fail_save: AtomicBool::new(false),
            stall_seen: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
            snapshot_overrides: Mutex::new(HashMap::new()),
        })
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    /// Make the snapshot for `id` look missing while its index entry stays.
    pub fn hide_snapshot(&self, id: CampaignId) {
        self.snapshot_overrides.lock().unwrap().insert(id, None);
    }

    /// Serve `campaign` as the snapshot for its id, whatever the index says.
    pub fn stale_snapshot(&self, campaign: Campaign) {
        self.snapshot_overrides
            .lock()
            .unwrap()
            .insert(campaign.id, Some(campaign));
    }

    fn check(flag: &AtomicBool, op: &str) -> PopupResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(PopupError::Cache(format!("injected {op} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignCache for FaultyCache {
    async fn active_campaigns(&self) -> PopupResult<Vec<ActiveEntry>> {
        Self::check(&self.fail_active, "active index")?;
        self.inner.active_campaigns().await
    }

    async fn campaign_metadata(
        &self,
        ids: &[CampaignId],
    ) -> PopupResult<HashMap<CampaignId, Campaign>> {
        Self::check(&self.fail_metadata, "metadata")?;
        let mut snapshots = self.inner.campaign_metadata(ids).await?;
        let overrides = self.snapshot_overrides.lock().unwrap().clone();
        for (id, replacement) in overrides {
            match replacement {
                Some(campaign) => {
                    snapshots.insert(id, campaign);
                }
                None => {
                    snapshots.remove(&id);
                }
            }
        }
        Ok(snapshots)
    }

    async fn is_user_targeted(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> PopupResult<bool> {
        Self::check(&self.fail_targeting, "targeting")?;
        self.inner.is_user_targeted(campaign_id, user_id).await
    }

    async fn seen_count(&self, user_id: UserId, campaign_id: CampaignId) -> PopupResult<u64> {
        if self.stall_seen.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
        Self::check(&self.fail_seen, "frequency")?;
        self.inner.seen_count(user_id, campaign_id).await
    }

    async fn increment_impression(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> PopupResult<()> {
        Self::check(&self.fail_increment, "increment")?;
        self.inner.increment_impression(user_id, campaign_id).await
    }

    async fn save_campaign(&self, campaign: &Campaign) -> PopupResult<()> {
        Self::check(&self.fail_save, "save")?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_campaign(campaign).await
    }

    async fn remove_campaign(&self, id: CampaignId) -> PopupResult<()> {
        Self::check(&self.fail_save, "remove")?;
        self.inner.remove_campaign(id).await
    }
}
