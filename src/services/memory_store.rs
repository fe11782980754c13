// src/services/memory_store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::job_store::JobStore;
use crate::errors::AtelierError;
use crate::models::*;

#[derive(Default)]
struct Tables {
    preview_jobs: HashMap<Uuid, AiPreviewJob>,
    analyses: HashMap<Uuid, UpgradeAnalysis>,
    upgrade_jobs: HashMap<Uuid, UpgradePreviewJob>,
}

/// Single-process job store. The claim check and the status change happen
/// under one lock, which is what makes the claim atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    tables: Mutex<Tables>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_mutable(current: JobStatus, id: Uuid) -> Result<(), AtelierError> {
    if current.is_terminal() {
        return Err(AtelierError::InvalidTransition(format!(
            "job {} is already {:?}",
            id, current
        )));
    }
    Ok(())
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_preview_job(&self, job: &AiPreviewJob) -> Result<(), AtelierError> {
        self.tables
            .lock()
            .await
            .preview_jobs
            .insert(job.id, job.clone());
        Ok(())
    }

    async fn get_preview_job(&self, id: Uuid) -> Result<Option<AiPreviewJob>, AtelierError> {
        Ok(self.tables.lock().await.preview_jobs.get(&id).cloned())
    }

    async fn update_preview_job(&self, job: &AiPreviewJob) -> Result<(), AtelierError> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .preview_jobs
            .get_mut(&job.id)
            .ok_or_else(|| AtelierError::NotFound(format!("Preview job {}", job.id)))?;
        ensure_mutable(existing.status, job.id)?;
        *existing = job.clone();
        Ok(())
    }

    async fn claim_next_preview_job(&self) -> Result<Option<AiPreviewJob>, AtelierError> {
        let mut tables = self.tables.lock().await;
        let next = tables
            .preview_jobs
            .values_mut()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by_key(|job| job.created_at);

        match next {
            Some(job) => {
                job.start_processing()?;
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn count_guest_preview_jobs(&self, guest_client_id: &str) -> Result<u32, AtelierError> {
        let tables = self.tables.lock().await;
        let count = tables
            .preview_jobs
            .values()
            .filter(|job| job.owner.guest_client_id() == Some(guest_client_id))
            .filter(|job| job.status != JobStatus::Failed)
            .count();
        Ok(count as u32)
    }

    async fn insert_analysis(&self, analysis: &UpgradeAnalysis) -> Result<(), AtelierError> {
        self.tables
            .lock()
            .await
            .analyses
            .insert(analysis.id, analysis.clone());
        Ok(())
    }

    async fn get_analysis(&self, id: Uuid) -> Result<Option<UpgradeAnalysis>, AtelierError> {
        Ok(self.tables.lock().await.analyses.get(&id).cloned())
    }

    async fn update_analysis(&self, analysis: &UpgradeAnalysis) -> Result<(), AtelierError> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .analyses
            .get_mut(&analysis.id)
            .ok_or_else(|| AtelierError::NotFound(format!("Analysis {}", analysis.id)))?;
        if existing.status.is_terminal() {
            return Err(AtelierError::InvalidTransition(format!(
                "analysis {} is already {:?}",
                analysis.id, existing.status
            )));
        }
        *existing = analysis.clone();
        Ok(())
    }

    async fn insert_upgrade_job(&self, job: &UpgradePreviewJob) -> Result<(), AtelierError> {
        self.tables
            .lock()
            .await
            .upgrade_jobs
            .insert(job.id, job.clone());
        Ok(())
    }

    async fn get_upgrade_job(&self, id: Uuid) -> Result<Option<UpgradePreviewJob>, AtelierError> {
        Ok(self.tables.lock().await.upgrade_jobs.get(&id).cloned())
    }

    async fn update_upgrade_job(&self, job: &UpgradePreviewJob) -> Result<(), AtelierError> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .upgrade_jobs
            .get_mut(&job.id)
            .ok_or_else(|| AtelierError::NotFound(format!("Upgrade preview job {}", job.id)))?;
        ensure_mutable(existing.status, job.id)?;
        *existing = job.clone();
        Ok(())
    }

    async fn claim_next_upgrade_job(&self) -> Result<Option<UpgradePreviewJob>, AtelierError> {
        let mut tables = self.tables.lock().await;
        let next = tables
            .upgrade_jobs
            .values_mut()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by_key(|job| job.created_at);

        match next {
            Some(job) => {
                job.start_processing()?;
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }
}
