//! Mirrors durable-store state into the cache.
//!
//! Writes are plain pipelines, not transactions. If a batch applies only
//! partially the read path copes: an index entry without a snapshot is
//! skipped, and a snapshot without an index entry is never a candidate.
//! `resync_all` is the repair path for any drift that remains. It only
//! removes cached campaigns when orphan pruning is switched on, because a
//! store that is empty or local to one node would otherwise wipe the shared
//! cache.

use popup_core::{Campaign, CampaignCache, CampaignId, CampaignStore, Deadline, PopupError, PopupResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CacheSynchronizer {
    cache: Arc<dyn CampaignCache>,
    store: Arc<dyn CampaignStore>,
    page_size: usize,
    prune_orphans: bool,
}

impl CacheSynchronizer {
    pub fn new(cache: Arc<dyn CampaignCache>, store: Arc<dyn CampaignStore>, page_size: usize) -> Self {
        Self {
            cache,
            store,
            page_size: page_size.max(1),
            prune_orphans: false,
        }
    }

    /// Also remove index entries with no store row at the end of a resync.
    pub fn with_orphan_pruning(mut self, enabled: bool) -> Self {
        self.prune_orphans = enabled;
        self
    }

    /// Write the snapshot and set the index entry from `is_active`.
    /// Replaying the same campaign leaves the cache unchanged.
    pub async fn upsert(&self, campaign: &Campaign, deadline: Deadline) -> PopupResult<()> {
        deadline.run(self.cache.save_campaign(campaign)).await?;
        metrics::counter!("sync.upserts").increment(1);
        debug!(
            campaign_id = campaign.id,
            active = campaign.is_active,
            priority = campaign.priority,
            "Campaign synced to cache"
        );
        Ok(())
    }

    /// Drop the index entry and the snapshot.
    pub async fn remove(&self, id: CampaignId, deadline: Deadline) -> PopupResult<()> {
        deadline.run(self.cache.remove_campaign(id)).await?;
        metrics::counter!("sync.removals").increment(1);
        debug!(campaign_id = id, "Campaign removed from cache");
        Ok(())
    }

    /// Rebuild the cache from every campaign in the durable store.
    ///
    /// The store is walked page by page until exhausted, so no campaign is
    /// left out regardless of age. A failed upsert does not stop the walk;
    /// the call fails at the end if any campaign could not be written.
    /// With orphan pruning enabled, index entries whose campaign no longer
    /// exists in the store are removed afterwards. Returns the number of
    /// campaigns written.
    pub async fn resync_all(&self, deadline: Deadline) -> PopupResult<usize> {
        let mut seen = HashSet::new();
        let mut synced = 0usize;
        let mut failed = 0usize;
        let mut before_id = None;

        loop {
            let page = deadline
                .run(self.store.list_page(before_id, self.page_size))
                .await?;
            let exhausted = page.len() < self.page_size;
            before_id = page.last().map(|c| c.id);

            for campaign in &page {
                seen.insert(campaign.id);
                match self.upsert(campaign, deadline).await {
                    Ok(()) => synced += 1,
                    Err(PopupError::DeadlineExceeded) => return Err(PopupError::DeadlineExceeded),
                    Err(e) => {
                        failed += 1;
                        warn!(campaign_id = campaign.id, error = %e, "Resync failed for campaign");
                    }
                }
            }

            if exhausted || before_id.is_none() {
                break;
            }
        }

        let pruned = if self.prune_orphans {
            self.remove_orphans(&seen, deadline).await?
        } else {
            0
        };
        metrics::counter!("sync.resync_campaigns").increment(synced as u64);
        info!(synced, failed, pruned, "Cache resync complete");

        if failed > 0 {
            return Err(PopupError::Cache(format!(
                "{failed} of {} campaigns failed to sync",
                synced + failed
            )));
        }
        Ok(synced)
    }

    /// Remove index entries for campaigns the store no longer has. Each id is
    /// re-checked against the store so a campaign created during the walk is
    /// not dropped.
    async fn remove_orphans(&self, seen: &HashSet<CampaignId>, deadline: Deadline) -> PopupResult<usize> {
        let indexed = deadline.run(self.cache.active_campaigns()).await?;
        let mut pruned = 0usize;
        for entry in indexed {
            if seen.contains(&entry.campaign_id) {
                continue;
            }
            if deadline.run(self.store.get(entry.campaign_id)).await?.is_some() {
                continue;
            }
            self.remove(entry.campaign_id, deadline).await?;
            pruned += 1;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{campaign, FaultyCache};
    use chrono::Utc;
    use popup_core::ActiveEntry;
    use popup_management::InMemoryCampaignStore;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn synchronizer(page_size: usize) -> (CacheSynchronizer, Arc<FaultyCache>, Arc<InMemoryCampaignStore>) {
        let cache = FaultyCache::new();
        let store = Arc::new(InMemoryCampaignStore::new());
        let sync = CacheSynchronizer::new(cache.clone(), store.clone(), page_size);
        (sync, cache, store)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (sync, cache, _) = synchronizer(10);
        let c = campaign(1, 7, Utc::now());

        sync.upsert(&c, deadline()).await.unwrap();
        let index_once = cache.inner.active_campaigns().await.unwrap();
        let meta_once = cache.inner.campaign_metadata(&[1]).await.unwrap();

        sync.upsert(&c, deadline()).await.unwrap();
        assert_eq!(cache.inner.active_campaigns().await.unwrap(), index_once);
        assert_eq!(cache.inner.campaign_metadata(&[1]).await.unwrap(), meta_once);
        assert_eq!(index_once, vec![ActiveEntry { campaign_id: 1, score: 7.0 }]);
    }

    #[tokio::test]
    async fn test_upsert_priority_change_rescores() {
        let (sync, cache, _) = synchronizer(10);
        let mut c = campaign(1, 7, Utc::now());
        sync.upsert(&c, deadline()).await.unwrap();
        c.priority = 20;
        sync.upsert(&c, deadline()).await.unwrap();
        assert_eq!(
            cache.inner.active_campaigns().await.unwrap(),
            vec![ActiveEntry { campaign_id: 1, score: 20.0 }]
        );
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (sync, cache, _) = synchronizer(10);
        sync.upsert(&campaign(1, 7, Utc::now()), deadline()).await.unwrap();
        sync.remove(1, deadline()).await.unwrap();
        sync.remove(1, deadline()).await.unwrap();
        assert!(!cache.inner.is_indexed(1));
        assert!(!cache.inner.has_metadata(1));
    }

    #[tokio::test]
    async fn test_resync_walks_every_page() {
        let (sync, cache, store) = synchronizer(3);
        let now = Utc::now();
        for i in 0..10 {
            store.create(campaign(0, i, now)).await.unwrap();
        }

        let synced = sync.resync_all(deadline()).await.unwrap();
        assert_eq!(synced, 10);
        assert_eq!(cache.inner.active_campaigns().await.unwrap().len(), 10);
        // Oldest campaign is not lost to paging.
        assert!(cache.inner.is_indexed(1));
    }

    #[tokio::test]
    async fn test_resync_exact_page_multiple() {
        let (sync, _, store) = synchronizer(5);
        let now = Utc::now();
        for i in 0..10 {
            store.create(campaign(0, i, now)).await.unwrap();
        }
        assert_eq!(sync.resync_all(deadline()).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_resync_keeps_cached_campaigns_missing_from_store() {
        let (sync, cache, _) = synchronizer(100);
        let now = Utc::now();
        cache.inner.save_campaign(&campaign(1, 10, now)).await.unwrap();
        cache.inner.save_campaign(&campaign(2, 5, now)).await.unwrap();

        // An empty store must not clear a cache other nodes are serving from.
        assert_eq!(sync.resync_all(deadline()).await.unwrap(), 0);
        assert_eq!(cache.inner.len(), 2);
        assert!(cache.inner.has_metadata(1));
        assert!(cache.inner.has_metadata(2));
    }

    #[tokio::test]
    async fn test_resync_prunes_deleted_campaigns_when_enabled() {
        let cache = FaultyCache::new();
        let store = Arc::new(InMemoryCampaignStore::new());
        let sync = CacheSynchronizer::new(cache.clone(), store.clone(), 10).with_orphan_pruning(true);
        let now = Utc::now();
        let kept = store.create(campaign(0, 1, now)).await.unwrap();
        // Cached but no longer in the store, e.g. a delete whose cache write failed.
        cache.inner.save_campaign(&campaign(99, 50, now)).await.unwrap();

        sync.resync_all(deadline()).await.unwrap();
        assert!(cache.inner.is_indexed(kept.id));
        assert!(!cache.inner.is_indexed(99));
        assert!(!cache.inner.has_metadata(99));
    }

    #[tokio::test]
    async fn test_resync_reports_partial_failure() {
        let (sync, cache, store) = synchronizer(10);
        store.create(campaign(0, 1, Utc::now())).await.unwrap();
        FaultyCache::set(&cache.fail_save, true);

        let result = sync.resync_all(deadline()).await;
        assert!(matches!(result, Err(PopupError::Cache(_))));
        assert_eq!(cache.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resync_empty_store() {
        let (sync, _, _) = synchronizer(10);
        assert_eq!(sync.resync_all(deadline()).await.unwrap(), 0);
    }
}
