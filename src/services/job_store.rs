// src/services/job_store.rs
use async_trait::async_trait;
use log::warn;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::errors::AtelierError;
use crate::models::*;

/// Persistence for preview jobs, upgrade analyses and upgrade preview jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_preview_job(&self, job: &AiPreviewJob) -> Result<(), AtelierError>;
    async fn get_preview_job(&self, id: Uuid) -> Result<Option<AiPreviewJob>, AtelierError>;
    async fn update_preview_job(&self, job: &AiPreviewJob) -> Result<(), AtelierError>;
    /// Atomically takes one Pending job and returns it already moved to
    /// Processing. Two callers never receive the same job.
    async fn claim_next_preview_job(&self) -> Result<Option<AiPreviewJob>, AtelierError>;
    /// Jobs counted against a guest's free tier: everything except Failed.
    async fn count_guest_preview_jobs(&self, guest_client_id: &str) -> Result<u32, AtelierError>;

    async fn insert_analysis(&self, analysis: &UpgradeAnalysis) -> Result<(), AtelierError>;
    async fn get_analysis(&self, id: Uuid) -> Result<Option<UpgradeAnalysis>, AtelierError>;
    async fn update_analysis(&self, analysis: &UpgradeAnalysis) -> Result<(), AtelierError>;

    async fn insert_upgrade_job(&self, job: &UpgradePreviewJob) -> Result<(), AtelierError>;
    async fn get_upgrade_job(&self, id: Uuid) -> Result<Option<UpgradePreviewJob>, AtelierError>;
    async fn update_upgrade_job(&self, job: &UpgradePreviewJob) -> Result<(), AtelierError>;
    async fn claim_next_upgrade_job(&self) -> Result<Option<UpgradePreviewJob>, AtelierError>;
}

const PREVIEW_PENDING: &str = "ai_preview_jobs:pending";
const UPGRADE_PENDING: &str = "upgrade_preview_jobs:pending";
/// How many queue heads a worker inspects per claim attempt.
const CLAIM_WINDOW: isize = 16;

/// Status codes after which a stored row is immutable. Jobs and analyses
/// share them.
const TERMINAL_STATUS_CODES: [u8; 2] = [2, 3];

/// Replaces a stored row unless its `status` is terminal, in one round trip.
/// Returns -1 for a missing row, 0 for a refused write and 1 on success.
const GUARDED_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
local status = cjson.decode(current)['status']
if status == tonumber(ARGV[2]) or status == tonumber(ARGV[3]) then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1])
return 1
"#;

fn guarded_set_outcome(code: i64, key: &str) -> Result<(), AtelierError> {
    match code {
        1 => Ok(()),
        0 => Err(AtelierError::InvalidTransition(format!(
            "{} is already finished",
            key
        ))),
        _ => Err(AtelierError::NotFound(key.to_string())),
    }
}

fn preview_job_key(id: Uuid) -> String {
    format!("ai_preview_job:{}", id)
}

fn guest_preview_index_key(guest_client_id: &str) -> String {
    format!("ai_preview_jobs:guest:{}", guest_client_id)
}

fn analysis_key(id: Uuid) -> String {
    format!("upgrade_analysis:{}", id)
}

fn upgrade_job_key(id: Uuid) -> String {
    format!("upgrade_preview_job:{}", id)
}

/// Redis-backed store. Rows are JSON documents; Pending jobs are also members
/// of a sorted set scored by creation time, and removing a member from that
/// set is the claim.
pub struct RedisJobStore {
    conn: ConnectionManager,
    guarded_set: redis::Script,
}

impl RedisJobStore {
    pub async fn connect(redis_url: &str) -> Result<Self, AtelierError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| AtelierError::Redis(e.to_string()))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))?;

        // Test connection
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))?;

        Ok(Self {
            conn,
            guarded_set: redis::Script::new(GUARDED_SET_SCRIPT),
        })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn put<T: Serialize + Sync>(&self, key: &str, row: &T) -> Result<(), AtelierError> {
        let mut conn = self.conn.clone();
        let value =
            serde_json::to_string(row).map_err(|e| AtelierError::Serialization(e.to_string()))?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))
    }

    /// Overwrites an existing row that has not reached a terminal status.
    async fn update<T: Serialize + Sync>(&self, key: &str, row: &T) -> Result<(), AtelierError> {
        let mut conn = self.conn.clone();
        let value =
            serde_json::to_string(row).map_err(|e| AtelierError::Serialization(e.to_string()))?;
        let code: i64 = self
            .guarded_set
            .key(key)
            .arg(value)
            .arg(TERMINAL_STATUS_CODES[0])
            .arg(TERMINAL_STATUS_CODES[1])
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))?;
        guarded_set_outcome(code, key)
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AtelierError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))?;

        value
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(|e| AtelierError::Serialization(format!("{}: {}", key, e)))
    }

    async fn enqueue(&self, queue: &str, id: Uuid, score: i64) -> Result<(), AtelierError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(queue, id.to_string(), score)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))
    }

    /// Walks the oldest queued ids and claims the first one this caller
    /// manages to remove from the queue.
    async fn claim<T, K, S>(
        &self,
        queue: &str,
        key_for: K,
        start: S,
    ) -> Result<Option<T>, AtelierError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        K: Fn(Uuid) -> String + Send + Sync,
        S: Fn(&mut T) -> Result<(), AtelierError> + Send + Sync,
    {
        let mut conn = self.conn.clone();
        let candidates: Vec<String> = conn
            .zrange(queue, 0, CLAIM_WINDOW - 1)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))?;

        for candidate in candidates {
            let removed: i64 = conn
                .zrem(queue, &candidate)
                .await
                .map_err(|e| AtelierError::Redis(e.to_string()))?;
            if removed != 1 {
                // Another worker got there first.
                continue;
            }

            let Ok(id) = Uuid::parse_str(&candidate) else {
                warn!("Dropping malformed id '{}' from {}", candidate, queue);
                continue;
            };
            let key = key_for(id);
            let Some(mut row) = self.fetch::<T>(&key).await? else {
                warn!("Queued job {} has no row, skipping", id);
                continue;
            };

            if let Err(e) = start(&mut row) {
                warn!("Queued job {} is not claimable: {}", id, e);
                continue;
            }
            self.update(&key, &row).await?;
            return Ok(Some(row));
        }

        Ok(None)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert_preview_job(&self, job: &AiPreviewJob) -> Result<(), AtelierError> {
        self.put(&preview_job_key(job.id), job).await?;

        if let Some(guest) = job.owner.guest_client_id() {
            let mut conn = self.conn.clone();
            conn.sadd::<_, _, ()>(guest_preview_index_key(guest), job.id.to_string())
                .await
                .map_err(|e| AtelierError::Redis(e.to_string()))?;
        }

        self.enqueue(PREVIEW_PENDING, job.id, job.created_at.timestamp_millis())
            .await
    }

    async fn get_preview_job(&self, id: Uuid) -> Result<Option<AiPreviewJob>, AtelierError> {
        self.fetch(&preview_job_key(id)).await
    }

    async fn update_preview_job(&self, job: &AiPreviewJob) -> Result<(), AtelierError> {
        self.update(&preview_job_key(job.id), job).await
    }

    async fn claim_next_preview_job(&self) -> Result<Option<AiPreviewJob>, AtelierError> {
        self.claim(PREVIEW_PENDING, preview_job_key, |job: &mut AiPreviewJob| {
            job.start_processing()
        })
        .await
    }

    async fn count_guest_preview_jobs(&self, guest_client_id: &str) -> Result<u32, AtelierError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(guest_preview_index_key(guest_client_id))
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))?;
        if ids.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = ids
            .iter()
            .filter_map(|id| Uuid::parse_str(id).ok())
            .map(preview_job_key)
            .collect();
        let rows: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))?;

        let counted = rows
            .into_iter()
            .flatten()
            .filter_map(|raw| serde_json::from_str::<AiPreviewJob>(&raw).ok())
            .filter(|job| job.status != JobStatus::Failed)
            .count();
        Ok(counted as u32)
    }

    async fn insert_analysis(&self, analysis: &UpgradeAnalysis) -> Result<(), AtelierError> {
        self.put(&analysis_key(analysis.id), analysis).await
    }

    async fn get_analysis(&self, id: Uuid) -> Result<Option<UpgradeAnalysis>, AtelierError> {
        self.fetch(&analysis_key(id)).await
    }

    async fn update_analysis(&self, analysis: &UpgradeAnalysis) -> Result<(), AtelierError> {
        self.update(&analysis_key(analysis.id), analysis).await
    }

    async fn insert_upgrade_job(&self, job: &UpgradePreviewJob) -> Result<(), AtelierError> {
        self.put(&upgrade_job_key(job.id), job).await?;
        self.enqueue(UPGRADE_PENDING, job.id, job.created_at.timestamp_millis())
            .await
    }

    async fn get_upgrade_job(&self, id: Uuid) -> Result<Option<UpgradePreviewJob>, AtelierError> {
        self.fetch(&upgrade_job_key(id)).await
    }

    async fn update_upgrade_job(&self, job: &UpgradePreviewJob) -> Result<(), AtelierError> {
        self.update(&upgrade_job_key(job.id), job).await
    }

    async fn claim_next_upgrade_job(&self) -> Result<Option<UpgradePreviewJob>, AtelierError> {
        self.claim(UPGRADE_PENDING, upgrade_job_key, |job: &mut UpgradePreviewJob| {
            job.start_processing()
        })
        .await
    }
}
