//! Popup selection: ranks the active index, batch-loads snapshots and returns
//! the first candidate that passes the window, targeting and frequency checks.
//!
//! Only the cache is consulted. Failing to read the active index or the
//! snapshot batch is an error; a failed targeting or frequency lookup only
//! removes that one candidate (fail-closed).

use chrono::{DateTime, Utc};
use popup_core::{
    ActiveEntry, Campaign, CampaignCache, CampaignId, Deadline, PopupError, PopupResult, Target,
    UserId,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Why a candidate was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    MissingMetadata,
    Inactive,
    OutsideWindow,
    NotTargeted,
    TargetingUnavailable,
    FrequencyCapped,
    FrequencyUnavailable,
}

impl Rejection {
    fn as_str(self) -> &'static str {
        match self {
            Rejection::MissingMetadata => "missing_metadata",
            Rejection::Inactive => "inactive",
            Rejection::OutsideWindow => "outside_window",
            Rejection::NotTargeted => "not_targeted",
            Rejection::TargetingUnavailable => "targeting_unavailable",
            Rejection::FrequencyCapped => "frequency_capped",
            Rejection::FrequencyUnavailable => "frequency_unavailable",
        }
    }
}

/// Order candidates by score, highest first. Equal scores are broken by
/// ascending campaign id so the same index always yields the same order.
pub fn rank_candidates(mut entries: Vec<ActiveEntry>) -> Vec<CampaignId> {
    entries.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.campaign_id.cmp(&b.campaign_id))
    });
    entries.into_iter().map(|e| e.campaign_id).collect()
}

/// Selects the popup to show a user. Holds no state of its own.
pub struct DecisionEngine {
    cache: Arc<dyn CampaignCache>,
}

impl DecisionEngine {
    pub fn new(cache: Arc<dyn CampaignCache>) -> Self {
        Self { cache }
    }

    /// Pick the best eligible campaign for `user_id` right now.
    pub async fn select_popup(
        &self,
        user_id: UserId,
        deadline: Deadline,
    ) -> PopupResult<Option<Campaign>> {
        self.select_popup_at(user_id, Utc::now(), deadline).await
    }

    /// Pick the best eligible campaign for `user_id` as of `now`.
    ///
    /// `Ok(None)` means nothing is eligible; an `Err` means the decision
    /// could not be evaluated.
    pub async fn select_popup_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> PopupResult<Option<Campaign>> {
        let start = Instant::now();
        metrics::counter!("popup.decisions").increment(1);

        let entries = deadline.run(self.cache.active_campaigns()).await?;
        if entries.is_empty() {
            metrics::counter!("popup.no_decision").increment(1);
            return Ok(None);
        }

        let candidates = rank_candidates(entries);
        let mut snapshots = deadline
            .run(self.cache.campaign_metadata(&candidates))
            .await?;

        for id in candidates {
            let verdict = match snapshots.remove(&id) {
                Some(campaign) => match self.evaluate(&campaign, user_id, now, deadline).await? {
                    None => Ok(campaign),
                    Some(reason) => Err(reason),
                },
                None => Err(Rejection::MissingMetadata),
            };

            match verdict {
                Ok(winner) => {
                    metrics::histogram!("popup.decision_latency_us")
                        .record(start.elapsed().as_micros() as f64);
                    debug!(user_id = user_id, campaign_id = winner.id, "Popup selected");
                    return Ok(Some(winner));
                }
                Err(reason) => {
                    metrics::counter!("popup.candidate_skipped", "reason" => reason.as_str())
                        .increment(1);
                    debug!(
                        user_id = user_id,
                        campaign_id = id,
                        reason = reason.as_str(),
                        "Candidate rejected"
                    );
                }
            }
        }

        metrics::counter!("popup.no_decision").increment(1);
        metrics::histogram!("popup.decision_latency_us").record(start.elapsed().as_micros() as f64);
        Ok(None)
    }

    /// `Ok(None)` when the candidate is eligible. Only an elapsed deadline
    /// escapes as an error; other lookup failures reject the candidate.
    async fn evaluate(
        &self,
        campaign: &Campaign,
        user_id: UserId,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> PopupResult<Option<Rejection>> {
        // A stale index entry can outlive a deactivation that only reached
        // the snapshot.
        if !campaign.is_active {
            return Ok(Some(Rejection::Inactive));
        }

        if !campaign.is_live_at(now) {
            return Ok(Some(Rejection::OutsideWindow));
        }

        if let Target::Segment { .. } = &campaign.target {
            match deadline
                .run(self.cache.is_user_targeted(campaign.id, user_id))
                .await
            {
                Ok(true) => {}
                Ok(false) => return Ok(Some(Rejection::NotTargeted)),
                Err(PopupError::DeadlineExceeded) => return Err(PopupError::DeadlineExceeded),
                Err(e) => {
                    warn!(
                        campaign_id = campaign.id,
                        user_id = user_id,
                        error = %e,
                        "Targeting lookup failed, skipping campaign"
                    );
                    return Ok(Some(Rejection::TargetingUnavailable));
                }
            }
        }

        match deadline
            .run(self.cache.seen_count(user_id, campaign.id))
            .await
        {
            Ok(seen) if seen >= u64::from(campaign.max_frequency) => {
                Ok(Some(Rejection::FrequencyCapped))
            }
            Ok(_) => Ok(None),
            Err(PopupError::DeadlineExceeded) => Err(PopupError::DeadlineExceeded),
            Err(e) => {
                warn!(
                    campaign_id = campaign.id,
                    user_id = user_id,
                    error = %e,
                    "Frequency lookup failed, skipping campaign"
                );
                Ok(Some(Rejection::FrequencyUnavailable))
            }
        }
    }
}
