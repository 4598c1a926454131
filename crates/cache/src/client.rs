//! Redis-backed campaign cache.
//!
//! Layout (see `keys`): a sorted set ranks active campaigns, string keys hold
//! JSON snapshots, bitmaps hold segment membership and one hash per user
//! holds impression counters with an idle expiry.

use crate::keys;
use async_trait::async_trait;
use popup_core::config::RedisConfig;
use popup_core::{ActiveEntry, Campaign, CampaignCache, CampaignId, PopupError, PopupResult, UserId};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Redis implementation of [`CampaignCache`].
///
/// Batches are sent as plain (non-`MULTI`) pipelines, so a failure part way
/// through can leave a batch partially applied.
pub struct RedisCampaignCache {
    conn: ConnectionManager,
    impression_ttl_secs: u64,
}

impl RedisCampaignCache {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let connect = async {
            let mut conn = ConnectionManager::new(client).await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>((conn, pong))
        };

        let (conn, pong) =
            tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), connect)
                .await
                .map_err(|_| anyhow::anyhow!("timed out connecting to Redis at {url}"))??;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            impression_ttl_secs: config.impression_ttl_secs,
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn cache_err(e: redis::RedisError) -> PopupError {
    PopupError::Cache(e.to_string())
}

/// Members are stored as decimal ids; anything else is skipped.
fn parse_active_entries(raw: Vec<(String, f64)>) -> Vec<ActiveEntry> {
    raw.into_iter()
        .filter_map(|(member, score)| match member.parse::<CampaignId>() {
            Ok(campaign_id) => Some(ActiveEntry { campaign_id, score }),
            Err(_) => {
                warn!(member = %member, "Skipping non-numeric active index member");
                None
            }
        })
        .collect()
}

/// Pair pipelined GET replies back up with their ids. Missing and
/// undecodable snapshots are dropped.
fn decode_snapshots(ids: &[CampaignId], raw: Vec<Option<String>>) -> HashMap<CampaignId, Campaign> {
    let mut out = HashMap::with_capacity(ids.len());
    for (id, value) in ids.iter().zip(raw) {
        let Some(json) = value else {
            metrics::counter!("cache.metadata.miss").increment(1);
            debug!(campaign_id = id, "No metadata snapshot for active campaign");
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
    out
}

/// Counter fields come back as integer replies from HINCRBY and as bulk
/// strings from HGET. Both go through this one conversion to `u64`; a
/// missing field is zero.
fn decode_seen_count(raw: &redis::Value) -> PopupResult<u64> {
    if matches!(raw, redis::Value::Nil) {
        return Ok(0);
    }
    let count: i64 = redis::from_redis_value(raw).map_err(cache_err)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

#[async_trait]
impl CampaignCache for RedisCampaignCache {
    async fn active_campaigns(&self) -> PopupResult<Vec<ActiveEntry>> {
        let mut conn = self.conn();
        let raw: Vec<(String, f64)> = conn
            .zrevrange_withscores(keys::ACTIVE_INDEX, 0, -1)
            .await
            .map_err(cache_err)?;
        Ok(parse_active_entries(raw))
    }

    async fn campaign_metadata(
        &self,
        ids: &[CampaignId],
    ) -> PopupResult<HashMap<CampaignId, Campaign>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut pipe = redis::pipe();
        for id in ids {
            pipe.get(keys::metadata(*id));
        }

        let mut conn = self.conn();
        let raw: Vec<Option<String>> = pipe.query_async(&mut conn).await.map_err(cache_err)?;
        Ok(decode_snapshots(ids, raw))
    }

    async fn is_user_targeted(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> PopupResult<bool> {
        let offset = usize::try_from(user_id)
            .map_err(|_| PopupError::Validation(format!("invalid user id {user_id}")))?;
        let mut conn = self.conn();
        conn.getbit(keys::segment_members(campaign_id), offset)
            .await
            .map_err(cache_err)
    }

    async fn seen_count(&self, user_id: UserId, campaign_id: CampaignId) -> PopupResult<u64> {
        let mut conn = self.conn();
        let raw: redis::Value = conn
            .hget(keys::impressions(user_id), campaign_id)
            .await
            .map_err(cache_err)?;
        decode_seen_count(&raw)
    }

    async fn increment_impression(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> PopupResult<()> {
        let key = keys::impressions(user_id);
        let mut pipe = redis::pipe();
        pipe.hincr(&key, campaign_id, 1)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.impression_ttl_secs)
            .ignore();

        let mut conn = self.conn();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(cache_err)
    }

    async fn save_campaign(&self, campaign: &Campaign) -> PopupResult<()> {
        let json = serde_json::to_string(campaign)?;

        let mut pipe = redis::pipe();
        pipe.set(keys::metadata(campaign.id), json).ignore();
        if campaign.is_active {
            pipe.zadd(keys::ACTIVE_INDEX, campaign.id, campaign.priority)
                .ignore();
        } else {
            pipe.zrem(keys::ACTIVE_INDEX, campaign.id).ignore();
        }

        let mut conn = self.conn();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(cache_err)
    }

    async fn remove_campaign(&self, id: CampaignId) -> PopupResult<()> {
        let mut pipe = redis::pipe();
        pipe.zrem(keys::ACTIVE_INDEX, id)
            .ignore()
            .del(keys::metadata(id))
            .ignore();

        let mut conn = self.conn();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(cache_err)
    }
}
