// src/services/preview_orchestrator.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use uuid::Uuid;

use super::image_provider::ImageGenerator;
use super::job_store::JobStore;
use super::prompt::PromptBuilder;
use super::semantic::{SemanticConfigBuilder, SemanticConfiguration};
use super::worker::JobProcessor;
use crate::errors::AtelierError;
use crate::models::*;

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    /// Non-failed jobs a guest may create; 0 disables the check.
    pub guest_preview_limit: u32,
    pub default_frame_count: u32,
    pub max_frame_count: u32,
    pub job_timeout: Duration,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            guest_preview_limit: 0,
            default_frame_count: 12,
            max_frame_count: 36,
            job_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatePreviewRequest {
    pub configuration_id: Uuid,
    pub kind: PreviewKind,
    pub frame_count: Option<u32>,
    pub guest_client_id: Option<String>,
}

pub struct PreviewOrchestrator {
    jobs: Arc<dyn JobStore>,
    semantic: SemanticConfigBuilder,
    prompts: PromptBuilder,
    generator: Arc<ImageGenerator>,
    settings: PreviewSettings,
}

impl PreviewOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        semantic: SemanticConfigBuilder,
        prompts: PromptBuilder,
        generator: Arc<ImageGenerator>,
        settings: PreviewSettings,
    ) -> Self {
        Self {
            jobs,
            semantic,
            prompts,
            generator,
            settings,
        }
    }

    fn frame_count_for(&self, request: &CreatePreviewRequest) -> Result<u32, AtelierError> {
        match request.kind {
            PreviewKind::SingleImage => Ok(1),
            PreviewKind::Preview360 => {
                let count = request
                    .frame_count
                    .unwrap_or(self.settings.default_frame_count);
                if count == 0 || count > self.settings.max_frame_count {
                    return Err(AtelierError::Validation(format!(
                        "frameCount must be between 1 and {}",
                        self.settings.max_frame_count
                    )));
                }
                Ok(count)
            }
        }
    }

    async fn ensure_guest_quota(&self, owner: &Owner) -> Result<(), AtelierError> {
        let limit = self.settings.guest_preview_limit;
        let Some(guest) = owner.guest_client_id() else {
            return Ok(());
        };
        if limit == 0 {
            return Ok(());
        }

        let used = self.jobs.count_guest_preview_jobs(guest).await?;
        if used >= limit {
            info!("Guest {} hit the preview limit ({}/{})", guest, used, limit);
            return Err(AtelierError::QuotaExceeded { limit });
        }
        Ok(())
    }

    /// Validates and persists a Pending job. The semantic snapshot and prompt
    /// are captured now so the job records what was asked for.
    pub async fn create(
        &self,
        requester: Requester,
        request: CreatePreviewRequest,
    ) -> Result<AiPreviewJob, AtelierError> {
        let owner = Owner::resolve(requester.user_id, request.guest_client_id.as_deref())?;
        let frame_count = self.frame_count_for(&request)?;

        let semantic = self
            .semantic
            .build(request.configuration_id, requester.user_id)
            .await?;
        self.ensure_guest_quota(&owner).await?;

        let prompt = self.prompts.build_prompt(&semantic)?;
        let snapshot = serde_json::to_value(&semantic)
            .map_err(|e| AtelierError::Serialization(e.to_string()))?;

        let mut job = AiPreviewJob::new(request.configuration_id, owner, request.kind, frame_count);
        job.prompt = Some(prompt);
        job.semantic_snapshot = Some(snapshot);
        self.jobs.insert_preview_job(&job).await?;

        info!(
            "Created preview job {} for configuration {} ({:?}, {} frame(s))",
            job.id, job.configuration_id, job.kind, job.frame_count
        );
        Ok(job)
    }

    /// Jobs the requester may not see are reported as missing.
    pub async fn get(&self, requester: Requester, id: Uuid) -> Result<AiPreviewJob, AtelierError> {
        match self.jobs.get_preview_job(id).await? {
            Some(job) if job.owner.is_accessible_by(requester.user_id) => Ok(job),
            _ => Err(AtelierError::NotFound(format!("Preview job {}", id))),
        }
    }

    async fn prompt_for(&self, job: &AiPreviewJob) -> Result<String, AtelierError> {
        if let Some(prompt) = job.prompt.as_ref().filter(|p| !p.trim().is_empty()) {
            return Ok(prompt.clone());
        }

        let from_snapshot = job
            .semantic_snapshot
            .clone()
            .and_then(|value| serde_json::from_value::<SemanticConfiguration>(value).ok());
        let semantic = match from_snapshot {
            Some(semantic) => semantic,
            None => {
                self.semantic
                    .build(job.configuration_id, job.owner.user_id())
                    .await?
            }
        };
        self.prompts.build_prompt(&semantic)
    }

    async fn render(&self, job: &AiPreviewJob) -> Result<PreviewResult, AtelierError> {
        let prompt = self.prompt_for(job).await?;
        match job.kind {
            PreviewKind::SingleImage => {
                let image_url = self
                    .generator
                    .generate_single(&prompt, job.configuration_id, job.id)
                    .await?;
                Ok(PreviewResult::Single { image_url })
            }
            PreviewKind::Preview360 => {
                let frame_urls = self
                    .generator
                    .generate_frame_set(&prompt, job.configuration_id, job.id, job.frame_count)
                    .await?;
                Ok(PreviewResult::Frames { frame_urls })
            }
        }
    }

    /// Drives a claimed (Processing) job to a terminal state and persists it.
    /// Generation failures end up on the job, not in the returned error.
    pub async fn process(&self, mut job: AiPreviewJob) -> Result<AiPreviewJob, AtelierError> {
        info!("Processing preview job {} with {}", job.id, self.generator.provider_name());

        let outcome = match tokio::time::timeout(self.settings.job_timeout, self.render(&job)).await
        {
            Ok(result) => result,
            Err(_) => Err(AtelierError::Upstream(format!(
                "generation timed out after {}s",
                self.settings.job_timeout.as_secs()
            ))),
        };

        let completed = outcome.and_then(|result| job.complete(result));
        if let Err(e) = completed {
            warn!("Preview job {} failed: {}", job.id, e);
            job.fail(e.to_string())?;
        } else {
            info!("Preview job {} completed", job.id);
        }

        self.jobs.update_preview_job(&job).await?;
        Ok(job)
    }
}

#[async_trait]
impl JobProcessor for PreviewOrchestrator {
    fn name(&self) -> &str {
        "ai-preview"
    }

    async fn process_next(&self) -> Result<bool, AtelierError> {
        match self.jobs.claim_next_preview_job().await? {
            Some(job) => {
                self.process(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
