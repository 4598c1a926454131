//! In-process campaign cache backed by DashMap for lock-free concurrent access.
//! Mirrors the Redis layout one structure per key family, for single-node
//! development and for tests.

use async_trait::async_trait;
use dashmap::DashMap;
use popup_core::{ActiveEntry, Campaign, CampaignCache, CampaignId, PopupResult, UserId};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct ImpressionRecord {
    counts: HashMap<CampaignId, u64>,
    touched_at: Instant,
}

/// DashMap implementation of [`CampaignCache`].
pub struct LocalCampaignCache {
    active: DashMap<CampaignId, f64>,
    /// Snapshots are held serialized, like the Redis string values.
    metadata: DashMap<CampaignId, String>,
    segments: DashMap<CampaignId, HashSet<UserId>>,
    impressions: DashMap<UserId, ImpressionRecord>,
    impression_ttl: Duration,
}

impl LocalCampaignCache {
    pub fn new(impression_ttl_secs: u64) -> Self {
        Self::with_impression_ttl(Duration::from_secs(impression_ttl_secs))
    }

    pub fn with_impression_ttl(impression_ttl: Duration) -> Self {
        Self {
            active: DashMap::new(),
            metadata: DashMap::new(),
            segments: DashMap::new(),
            impressions: DashMap::new(),
            impression_ttl,
        }
    }

    /// Set a user's membership bit for a segment campaign.
    pub fn add_segment_member(&self, campaign_id: CampaignId, user_id: UserId) {
        self.segments.entry(campaign_id).or_default().insert(user_id);
    }

    pub fn is_indexed(&self, campaign_id: CampaignId) -> bool {
        self.active.contains_key(&campaign_id)
    }

    pub fn has_metadata(&self, campaign_id: CampaignId) -> bool {
        self.metadata.contains_key(&campaign_id)
    }

    /// Remove impression records idle for longer than the TTL. Call this
    /// periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let before = self.impressions.len();
        self.impressions
            .retain(|_, record| record.touched_at.elapsed() <= self.impression_ttl);
        before.saturating_sub(self.impressions.len())
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[async_trait]
impl CampaignCache for LocalCampaignCache {
    async fn active_campaigns(&self) -> PopupResult<Vec<ActiveEntry>> {
        Ok(self
            .active
            .iter()
            .map(|r| ActiveEntry {
                campaign_id: *r.key(),
                score: *r.value(),
            })
            .collect())
    }

    async fn campaign_metadata(
        &self,
        ids: &[CampaignId],
    ) -> PopupResult<HashMap<CampaignId, Campaign>> {
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            let Some(json) = self.metadata.get(id).map(|r| r.value().clone()) else {
                continue;
            };
            match serde_json::from_str::<Campaign>(&json) {
                Ok(mut campaign) => {
                    campaign.id = *id;
                    out.insert(*id, campaign);
                }
                Err(e) => {
                    metrics::counter!("cache.metadata.corrupt").increment(1);
                    warn!(campaign_id = id, error = %e, "Discarding undecodable metadata snapshot");
                }
            }
        }
        Ok(out)
    }

    async fn is_user_targeted(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> PopupResult<bool> {
        Ok(self
            .segments
            .get(&campaign_id)
            .is_some_and(|members| members.contains(&user_id)))
    }

    async fn seen_count(&self, user_id: UserId, campaign_id: CampaignId) -> PopupResult<u64> {
        let Some(record) = self.impressions.get(&user_id) else {
            return Ok(0);
        };
        if record.touched_at.elapsed() > self.impression_ttl {
            drop(record);
            // An increment may have refreshed the record since the read.
            self.impressions
                .remove_if(&user_id, |_, r| r.touched_at.elapsed() > self.impression_ttl);
            debug!(user_id = user_id, "Impression record expired");
            return Ok(0);
        }
        Ok(record.counts.get(&campaign_id).copied().unwrap_or(0))
    }

    async fn increment_impression(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> PopupResult<()> {
        let mut record = self.impressions.entry(user_id).or_insert_with(|| ImpressionRecord {
            counts: HashMap::new(),
            touched_at: Instant::now(),
        });
        if record.touched_at.elapsed() > self.impression_ttl {
            record.counts.clear();
        }
        *record.counts.entry(campaign_id).or_insert(0) += 1;
        record.touched_at = Instant::now();
        Ok(())
    }

    async fn save_campaign(&self, campaign: &Campaign) -> PopupResult<()> {
        let json = serde_json::to_string(campaign)?;
        self.metadata.insert(campaign.id, json);
        if campaign.is_active {
            self.active.insert(campaign.id, f64::from(campaign.priority));
        } else {
            self.active.remove(&campaign.id);
        }
        Ok(())
    }

    async fn remove_campaign(&self, id: CampaignId) -> PopupResult<()> {
        self.active.remove(&id);
        self.metadata.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use popup_core::Target;

    fn campaign(id: CampaignId, priority: i32, active: bool) -> Campaign {
        let now = Utc::now();
        Campaign {
            id,
            title: format!("campaign-{id}"),
            image_url: String::new(),
            action_url: String::new(),
            priority,
            start_time: now,
            end_time: now + ChronoDuration::days(1),
            max_frequency: 1,
            target: Target::All,
            is_active: active,
        }
    }

    #[tokio::test]
    async fn test_save_indexes_only_active() {
        let cache = LocalCampaignCache::new(86_400);
        cache.save_campaign(&campaign(1, 5, true)).await.unwrap();
        cache.save_campaign(&campaign(2, 9, false)).await.unwrap();

        let active = cache.active_campaigns().await.unwrap();
        assert_eq!(active, vec![ActiveEntry { campaign_id: 1, score: 5.0 }]);
        // Inactive campaigns still get a snapshot.
        assert!(cache.has_metadata(2));
    }

    #[tokio::test]
    async fn test_deactivation_drops_index_entry() {
        let cache = LocalCampaignCache::new(86_400);
        cache.save_campaign(&campaign(1, 5, true)).await.unwrap();
        cache.save_campaign(&campaign(1, 5, false)).await.unwrap();
        assert!(!cache.is_indexed(1));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_skips_missing_ids() {
        let cache = LocalCampaignCache::new(86_400);
        cache.save_campaign(&campaign(1, 5, true)).await.unwrap();
        let meta = cache.campaign_metadata(&[1, 2]).await.unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[&1].priority, 5);
    }

    #[tokio::test]
    async fn test_metadata_skips_undecodable_snapshot() {
        let cache = LocalCampaignCache::new(86_400);
        cache.save_campaign(&campaign(1, 5, true)).await.unwrap();
        cache.metadata.insert(2, "{broken".to_string());

        let meta = cache.campaign_metadata(&[1, 2]).await.unwrap();
        assert_eq!(meta.len(), 1);
        assert!(meta.contains_key(&1));
    }

    #[tokio::test]
    async fn test_remove_clears_index_and_metadata() {
        let cache = LocalCampaignCache::new(86_400);
        cache.save_campaign(&campaign(3, 1, true)).await.unwrap();
        cache.remove_campaign(3).await.unwrap();
        assert!(!cache.is_indexed(3));
        assert!(!cache.has_metadata(3));
    }

    #[tokio::test]
    async fn test_segment_membership() {
        let cache = LocalCampaignCache::new(86_400);
        cache.add_segment_member(4, 1001);
        assert!(cache.is_user_targeted(4, 1001).await.unwrap());
        assert!(!cache.is_user_targeted(4, 1002).await.unwrap());
        assert!(!cache.is_user_targeted(5, 1001).await.unwrap());
    }

    #[tokio::test]
    async fn test_impressions_count_per_campaign() {
        let cache = LocalCampaignCache::new(86_400);
        cache.increment_impression(7, 1).await.unwrap();
        cache.increment_impression(7, 1).await.unwrap();
        cache.increment_impression(7, 2).await.unwrap();
        assert_eq!(cache.seen_count(7, 1).await.unwrap(), 2);
        assert_eq!(cache.seen_count(7, 2).await.unwrap(), 1);
        assert_eq!(cache.seen_count(8, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_impressions_expire_after_idle_period() {
        let cache = LocalCampaignCache::with_impression_ttl(Duration::from_millis(20));
        cache.increment_impression(7, 1).await.unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.seen_count(7, 1).await.unwrap(), 0);

        cache.increment_impression(7, 1).await.unwrap();
        assert_eq!(cache.seen_count(7, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_read_drops_only_stale_record() {
        let cache = LocalCampaignCache::with_impression_ttl(Duration::from_millis(20));
        cache.increment_impression(7, 1).await.unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.seen_count(7, 1).await.unwrap(), 0);
        // The stale record is gone, nothing is left to evict.
        assert_eq!(cache.evict_expired(), 0);

        cache.increment_impression(7, 1).await.unwrap();
        assert_eq!(cache.seen_count(7, 1).await.unwrap(), 1);
        assert_eq!(cache.seen_count(7, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let cache = LocalCampaignCache::with_impression_ttl(Duration::from_millis(20));
        cache.increment_impression(1, 1).await.unwrap();
        cache.increment_impression(2, 1).await.unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.evict_expired(), 2);
    }
}
