//! Impression recording.
//!
//! The increment is not atomic with the cap check in the decision path: two
//! concurrent requests for the same user and campaign can both see a count
//! below the cap and both increment. The cap is therefore best-effort; it
//! holds exactly only when a (user, campaign) pair is not written concurrently.

use popup_core::{CampaignCache, CampaignId, Deadline, PopupResult, UserId};
use std::sync::Arc;
use tracing::debug;

pub struct ImpressionRecorder {
    cache: Arc<dyn CampaignCache>,
}

impl ImpressionRecorder {
    pub fn new(cache: Arc<dyn CampaignCache>) -> Self {
        Self { cache }
    }

    /// Count one impression and restart the user's idle expiry.
    pub async fn record_impression(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
        deadline: Deadline,
    ) -> PopupResult<()> {
        deadline
            .run(self.cache.increment_impression(user_id, campaign_id))
            .await?;
        metrics::counter!("impressions.recorded").increment(1);
        debug!(user_id = user_id, campaign_id = campaign_id, "Impression recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FaultyCache;
    use popup_core::PopupError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_each_call_adds_exactly_one() {
        let cache = FaultyCache::new();
        let recorder = ImpressionRecorder::new(cache.clone());
        let deadline = Deadline::after(Duration::from_secs(5));

        recorder.record_impression(5, 1, deadline).await.unwrap();
        recorder.record_impression(5, 1, deadline).await.unwrap();
        recorder.record_impression(5, 2, deadline).await.unwrap();

        assert_eq!(cache.inner.seen_count(5, 1).await.unwrap(), 2);
        assert_eq!(cache.inner.seen_count(5, 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cache_failure_is_reported() {
        let cache = FaultyCache::new();
        FaultyCache::set(&cache.fail_increment, true);
        let recorder = ImpressionRecorder::new(cache);

        let result = recorder
            .record_impression(5, 1, Deadline::after(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(PopupError::Cache(_))));
    }
}
