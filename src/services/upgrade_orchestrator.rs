// src/services/upgrade_orchestrator.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use super::image_processor::ImageProcessor;
use super::image_provider::ImageGenerator;
use super::job_store::JobStore;
use super::prompt::PromptBuilder;
use super::storage::{ObjectStorage, upgrade_image_key};
use super::vision::{VisionAnalysis, VisionAnalysisResult, VisionAnalyzer, VisionImage};
use super::worker::JobProcessor;
use crate::errors::AtelierError;
use crate::models::*;

/// Raw multipart upload handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: Option<String>,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct CreateUpgradePreviewRequest {
    pub analysis_id: Uuid,
    pub selected_suggestion_ids: Vec<String>,
    pub keep_original: bool,
    pub guest_client_id: Option<String>,
}

const MAX_KEY_CHANGES: usize = 4;

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Normalises a parsed vision answer into what an analysis stores.
pub fn findings_from(vision: VisionAnalysis) -> AnalysisFindings {
    let detected = vision.detected.clone();

    let jewelry_type = non_empty(detected.jewelry_type)
        .or_else(|| non_empty(Some(vision.description.clone())))
        .map(|text| JewelryType::from_description(&text));
    let metal = non_empty(detected.metal).map(|text| MetalFamily::from_description(&text));
    let style = non_empty(detected.style).map(|text| StyleFamily::from_description(&text));
    let stones = match detected.has_stones {
        Some(false) => None,
        _ => non_empty(detected.stone_description),
    };

    let suggestions = vision
        .suggestions
        .iter()
        .filter(|s| !s.title.trim().is_empty())
        .enumerate()
        .map(|(index, s)| Suggestion {
            id: format!("sug_{}", index + 1),
            category: SuggestionCategory::classify(&s.category, &s.title),
            title: s.title.trim().to_string(),
            description: s.description.trim().to_string(),
            benefit: s.benefit.trim().to_string(),
            impact: ImpactLevel::from_label(&s.impact),
            character_note: non_empty(s.character_note.clone()),
        })
        .collect();

    let keep_original = vision
        .keep_original
        .clone()
        .filter(|k| !k.title.trim().is_empty())
        .unwrap_or_default();

    let preview_guidance = vision
        .preview_guidance
        .clone()
        .map(|mut guidance| {
            guidance.key_changes.retain(|c| !c.trim().is_empty());
            guidance.key_changes.truncate(MAX_KEY_CHANGES);
            guidance
        })
        .filter(|g| !g.summary.trim().is_empty() || !g.key_changes.is_empty());

    let limitations = vision
        .limitations
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    let clarification = vision
        .clarification
        .clone()
        .filter(|c| !c.reason.trim().is_empty() || !c.requested_shots.is_empty());

    let confidence = vision.confidence.score;
    let payload = serde_json::to_value(&vision).unwrap_or(serde_json::Value::Null);

    AnalysisFindings {
        jewelry_type,
        metal,
        stones,
        style,
        confidence,
        payload,
        suggestions,
        keep_original,
        preview_guidance,
        limitations,
        clarification,
    }
}

pub struct UpgradeOrchestrator {
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn ObjectStorage>,
    images: ImageProcessor,
    vision: Arc<dyn VisionAnalyzer>,
    generator: Arc<ImageGenerator>,
    prompts: PromptBuilder,
    job_timeout: Duration,
}

impl UpgradeOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStorage>,
        images: ImageProcessor,
        vision: Arc<dyn VisionAnalyzer>,
        generator: Arc<ImageGenerator>,
        prompts: PromptBuilder,
        job_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            storage,
            images,
            vision,
            generator,
            prompts,
            job_timeout,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.images.max_upload_bytes()
    }

    /// Validates and stores the photo and records a Pending analysis. The
    /// caller schedules [`Self::run_analysis`].
    pub async fn upload_image(
        &self,
        requester: Requester,
        guest_client_id: Option<&str>,
        upload: UploadedImage,
    ) -> Result<UpgradeAnalysis, AtelierError> {
        let owner = Owner::resolve(requester.user_id, guest_client_id)?;
        let validated = self.images.validate_upload(
            upload.filename.as_deref(),
            &upload.content_type,
            &upload.data,
        )?;

        let random_id = Uuid::new_v4().simple().to_string();
        let key = upgrade_image_key(Utc::now(), &random_id, &validated.extension);
        let url = self
            .storage
            .upload(upload.data, &key, &validated.content_type)
            .await?;

        let analysis = UpgradeAnalysis::new(owner, url, key, validated.content_type);
        self.jobs.insert_analysis(&analysis).await?;
        info!(
            "Stored upgrade photo {} for analysis {}",
            analysis.original_image_key, analysis.id
        );
        Ok(analysis)
    }

    /// Pending -> Analyzing -> Completed | Failed. A clarification answer
    /// completes with the clarification recorded.
    pub async fn run_analysis(
        &self,
        analysis_id: Uuid,
        original: Bytes,
    ) -> Result<UpgradeAnalysis, AtelierError> {
        let mut analysis = self
            .jobs
            .get_analysis(analysis_id)
            .await?
            .ok_or_else(|| AtelierError::NotFound(format!("Analysis {}", analysis_id)))?;
        analysis.start_analyzing()?;
        self.jobs.update_analysis(&analysis).await?;

        let image = match self
            .images
            .prepare_for_vision(&original, &analysis.content_type)
        {
            Ok((bytes, media_type)) => VisionImage::from_bytes(&bytes, &media_type),
            Err(e) => {
                warn!("Could not prepare analysis {} image: {}", analysis_id, e);
                VisionImage::Url(analysis.original_image_url.clone())
            }
        };

        let result = match tokio::time::timeout(self.job_timeout, self.vision.analyze(&image)).await
        {
            Ok(result) => result,
            Err(_) => VisionAnalysisResult::failed(
                format!("vision analysis timed out after {}s", self.job_timeout.as_secs()),
                None,
            ),
        };

        match (result.success, result.analysis) {
            (true, Some(vision)) => {
                let findings = findings_from(vision);
                if findings.clarification.is_some() {
                    info!("Analysis {} needs clarification", analysis_id);
                }
                analysis.complete(findings)?;
                info!(
                    "Analysis {} completed with {} suggestion(s) via {}",
                    analysis_id,
                    analysis.suggestions.len(),
                    self.vision.name()
                );
            }
            _ => {
                let message = result
                    .error
                    .unwrap_or_else(|| "vision analysis returned no result".to_string());
                warn!("Analysis {} failed: {}", analysis_id, message);
                analysis.fail(message)?;
            }
        }

        self.jobs.update_analysis(&analysis).await?;
        Ok(analysis)
    }

    pub async fn get_analysis(
        &self,
        requester: Requester,
        id: Uuid,
    ) -> Result<UpgradeAnalysis, AtelierError> {
        match self.jobs.get_analysis(id).await? {
            Some(analysis) if analysis.owner.is_accessible_by(requester.user_id) => Ok(analysis),
            _ => Err(AtelierError::NotFound(format!("Analysis {}", id))),
        }
    }

    /// Suggestions exist only once the analysis has completed.
    pub async fn get_suggestions(
        &self,
        requester: Requester,
        id: Uuid,
    ) -> Result<UpgradeAnalysis, AtelierError> {
        let analysis = self.get_analysis(requester, id).await?;
        if analysis.status != AnalysisStatus::Completed {
            return Err(AtelierError::NotFound(format!(
                "Suggestions for analysis {}",
                id
            )));
        }
        Ok(analysis)
    }

    pub async fn create_preview(
        &self,
        requester: Requester,
        request: CreateUpgradePreviewRequest,
    ) -> Result<UpgradePreviewJob, AtelierError> {
        let analysis = self.get_analysis(requester, request.analysis_id).await?;
        if analysis.status != AnalysisStatus::Completed {
            return Err(AtelierError::Validation(format!(
                "Analysis {} has not completed",
                analysis.id
            )));
        }

        let mut selected = Vec::with_capacity(request.selected_suggestion_ids.len());
        for id in &request.selected_suggestion_ids {
            let suggestion = analysis.suggestion(id).ok_or_else(|| {
                AtelierError::Validation(format!("Unknown suggestion id '{}'", id))
            })?;
            selected.push(suggestion);
        }
        if !request.keep_original && selected.is_empty() {
            return Err(AtelierError::Validation(
                "Select at least one suggestion or keep the original".to_string(),
            ));
        }

        let guest = request
            .guest_client_id
            .as_deref()
            .or_else(|| analysis.owner.guest_client_id());
        let owner = Owner::resolve(requester.user_id, guest)?;

        let prompt = self
            .prompts
            .build_upgrade_prompt(&analysis, &selected, request.keep_original);
        let mut job = UpgradePreviewJob::new(
            analysis.id,
            owner,
            request.keep_original,
            request.selected_suggestion_ids,
        );
        job.prompt = Some(prompt);
        self.jobs.insert_upgrade_job(&job).await?;

        info!(
            "Created upgrade preview job {} for analysis {} (keep original: {})",
            job.id, analysis.id, job.keep_original
        );
        Ok(job)
    }

    pub async fn get_preview(
        &self,
        requester: Requester,
        id: Uuid,
    ) -> Result<UpgradePreviewJob, AtelierError> {
        match self.jobs.get_upgrade_job(id).await? {
            Some(job) if job.owner.is_accessible_by(requester.user_id) => Ok(job),
            _ => Err(AtelierError::NotFound(format!("Upgrade preview job {}", id))),
        }
    }

    async fn prompt_for(&self, job: &UpgradePreviewJob) -> Result<String, AtelierError> {
        if let Some(prompt) = job.prompt.as_ref().filter(|p| !p.trim().is_empty()) {
            return Ok(prompt.clone());
        }

        let analysis = self
            .jobs
            .get_analysis(job.analysis_id)
            .await?
            .ok_or_else(|| AtelierError::NotFound(format!("Analysis {}", job.analysis_id)))?;
        let selected: Vec<&Suggestion> = job
            .applied_suggestion_ids
            .iter()
            .filter_map(|id| analysis.suggestion(id))
            .collect();
        Ok(self
            .prompts
            .build_upgrade_prompt(&analysis, &selected, job.keep_original))
    }

    async fn render(&self, job: &UpgradePreviewJob) -> Result<String, AtelierError> {
        let prompt = self.prompt_for(job).await?;
        self.generator
            .generate_upgrade(&prompt, job.analysis_id, job.id)
            .await
    }

    /// Drives a claimed (Processing) job to a terminal state and persists it.
    pub async fn process_preview(
        &self,
        mut job: UpgradePreviewJob,
    ) -> Result<UpgradePreviewJob, AtelierError> {
        info!("Processing upgrade preview job {}", job.id);

        let outcome = match tokio::time::timeout(self.job_timeout, self.render(&job)).await {
            Ok(result) => result,
            Err(_) => Err(AtelierError::Upstream(format!(
                "generation timed out after {}s",
                self.job_timeout.as_secs()
            ))),
        };

        let completed = outcome.and_then(|url| job.complete(url));
        if let Err(e) = completed {
            warn!("Upgrade preview job {} failed: {}", job.id, e);
            job.fail(e.to_string())?;
        } else {
            info!("Upgrade preview job {} completed", job.id);
        }

        self.jobs.update_upgrade_job(&job).await?;
        Ok(job)
    }
}

#[async_trait]
impl JobProcessor for UpgradeOrchestrator {
    fn name(&self) -> &str {
        "upgrade-preview"
    }

    async fn process_next(&self) -> Result<bool, AtelierError> {
        match self.jobs.claim_next_upgrade_job().await? {
            Some(job) => {
                self.process_preview(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::image_provider::DryrunImageProvider;
    use crate::services::memory_store::MemoryJobStore;
    use crate::services::storage::MemoryObjectStorage;
    use crate::services::vision::{DryrunVisionAnalyzer, parse_model_output};
    use image::{ImageFormat as ImgFormat, Rgb, RgbImage};

    struct BrokenVision;

    #[async_trait]
    impl VisionAnalyzer for BrokenVision {
        fn name(&self) -> &str {
            "broken"
        }

        async fn analyze(&self, _image: &VisionImage) -> VisionAnalysisResult {
            VisionAnalysisResult::failed("Anthropic error (529): overloaded", None)
        }
    }

    fn png() -> Bytes {
        let mut out = Vec::new();
        RgbImage::from_pixel(4, 4, Rgb([212, 175, 55]))
            .write_to(&mut std::io::Cursor::new(&mut out), ImgFormat::Png)
            .unwrap();
        Bytes::from(out)
    }

    fn orchestrator(
        vision: Arc<dyn VisionAnalyzer>,
    ) -> (UpgradeOrchestrator, Arc<MemoryObjectStorage>) {
        let storage = Arc::new(MemoryObjectStorage::new("http://cdn"));
        let generator = Arc::new(ImageGenerator::new(
            Arc::new(DryrunImageProvider::new()),
            storage.clone(),
            PromptBuilder::default(),
        ));
        (
            UpgradeOrchestrator::new(
                Arc::new(MemoryJobStore::new()),
                storage.clone(),
                ImageProcessor::new(10 * 1024 * 1024),
                vision,
                generator,
                PromptBuilder::default(),
                Duration::from_secs(5),
            ),
            storage,
        )
    }

    fn upload() -> UploadedImage {
        UploadedImage {
            filename: Some("ring.png".into()),
            content_type: "image/png".into(),
            data: png(),
        }
    }

    async fn completed_analysis(orchestrator: &UpgradeOrchestrator) -> UpgradeAnalysis {
        let analysis = orchestrator
            .upload_image(Requester::anonymous(), Some("g1"), upload())
            .await
            .unwrap();
        orchestrator.run_analysis(analysis.id, png()).await.unwrap()
    }

    #[tokio::test]
    async fn upload_stores_photo_under_dated_key() {
        let (orchestrator, storage) = orchestrator(Arc::new(DryrunVisionAnalyzer));
        let analysis = orchestrator
            .upload_image(Requester::anonymous(), Some("g1"), upload())
            .await
            .unwrap();

        assert_eq!(analysis.status, AnalysisStatus::Pending);
        assert!(analysis.original_image_key.starts_with("upgrade-images/"));
        assert!(analysis.original_image_key.ends_with(".png"));
        assert!(storage.get(&analysis.original_image_key).await.is_some());
        assert_eq!(analysis.owner, Owner::Guest("g1".into()));
    }

    #[tokio::test]
    async fn upload_requires_an_owner() {
        let (orchestrator, _) = orchestrator(Arc::new(DryrunVisionAnalyzer));
        assert!(matches!(
            orchestrator
                .upload_image(Requester::anonymous(), None, upload())
                .await,
            Err(AtelierError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn analysis_normalises_vision_answer() {
        let (orchestrator, _) = orchestrator(Arc::new(DryrunVisionAnalyzer));
        let analysis = completed_analysis(&orchestrator).await;

        assert_eq!(analysis.status, AnalysisStatus::Completed);
        assert_eq!(analysis.jewelry_type, Some(JewelryType::Ring));
        assert_eq!(analysis.metal, Some(MetalFamily::YellowGold));
        assert_eq!(analysis.style, Some(StyleFamily::Classic));
        assert_eq!(analysis.suggestions.len(), 4);
        for category in SuggestionCategory::ALL {
            assert!(analysis.suggestions.iter().any(|s| s.category == category));
        }
        assert_eq!(analysis.suggestions[0].id, "sug_1");
        assert!(analysis.analysis_payload.is_some());
    }

    #[tokio::test]
    async fn vision_failure_fails_the_analysis() {
        let (orchestrator, _) = orchestrator(Arc::new(BrokenVision));
        let analysis = completed_analysis(&orchestrator).await;
        assert_eq!(analysis.status, AnalysisStatus::Failed);
        assert!(analysis.error_message.unwrap().contains("overloaded"));
        assert!(matches!(
            orchestrator
                .get_suggestions(Requester::anonymous(), analysis.id)
                .await,
            Err(AtelierError::NotFound(_))
        ));
    }

    #[test]
    fn clarification_answer_still_completes() {
        let vision = parse_model_output(
            r#"{"description":"blurry photo of a band","clarification":{"reason":"out of focus"},
                "limitations":["cannot see stones", " "]}"#,
        )
        .unwrap();
        let findings = findings_from(vision);
        assert_eq!(findings.clarification.unwrap().reason, "out of focus");
        assert_eq!(findings.limitations, vec!["cannot see stones".to_string()]);
        assert_eq!(findings.jewelry_type, Some(JewelryType::Ring));
        assert!(findings.suggestions.is_empty());
        assert!(findings.confidence.is_none());
    }

    #[tokio::test]
    async fn missing_confidence_stays_unset() {
        let (orchestrator, _) = orchestrator(Arc::new(DryrunVisionAnalyzer));
        let analysis = orchestrator
            .upload_image(Requester::anonymous(), Some("g1"), upload())
            .await
            .unwrap();
        let mut stored = orchestrator
            .get_analysis(Requester::anonymous(), analysis.id)
            .await
            .unwrap();

        let vision = parse_model_output(r#"{"description":"plain silver band"}"#).unwrap();
        stored.start_analyzing().unwrap();
        stored.complete(findings_from(vision)).unwrap();
        assert_eq!(stored.jewelry_type, Some(JewelryType::Ring));
        assert!(stored.confidence.is_none());
    }

    #[tokio::test]
    async fn other_users_cannot_reach_an_analysis_or_its_previews() {
        let (orchestrator, _) = orchestrator(Arc::new(DryrunVisionAnalyzer));
        let owner = Uuid::new_v4();
        let stranger = Requester::user(Uuid::new_v4());

        let analysis = orchestrator
            .upload_image(Requester::user(owner), None, upload())
            .await
            .unwrap();
        assert_eq!(analysis.owner, Owner::User(owner));
        orchestrator.run_analysis(analysis.id, png()).await.unwrap();

        let job = orchestrator
            .create_preview(
                Requester::user(owner),
                CreateUpgradePreviewRequest {
                    analysis_id: analysis.id,
                    selected_suggestion_ids: vec![],
                    keep_original: true,
                    guest_client_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(job.owner, Owner::User(owner));

        assert!(matches!(
            orchestrator.get_analysis(stranger, analysis.id).await,
            Err(AtelierError::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.get_suggestions(stranger, analysis.id).await,
            Err(AtelierError::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.get_preview(stranger, job.id).await,
            Err(AtelierError::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.get_analysis(Requester::anonymous(), analysis.id).await,
            Err(AtelierError::NotFound(_))
        ));

        let request = CreateUpgradePreviewRequest {
            analysis_id: analysis.id,
            selected_suggestion_ids: vec![],
            keep_original: true,
            guest_client_id: Some("g9".into()),
        };
        assert!(matches!(
            orchestrator.create_preview(stranger, request).await,
            Err(AtelierError::NotFound(_))
        ));

        // Only the owner's job was queued.
        assert!(orchestrator.process_next().await.unwrap());
        assert!(!orchestrator.process_next().await.unwrap());
        let done = orchestrator
            .get_preview(Requester::user(owner), job.id)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn preview_rejects_unknown_suggestion_ids() {
        let (orchestrator, _) = orchestrator(Arc::new(DryrunVisionAnalyzer));
        let analysis = completed_analysis(&orchestrator).await;

        let request = CreateUpgradePreviewRequest {
            analysis_id: analysis.id,
            selected_suggestion_ids: vec!["sug_1".into(), "sug_99".into()],
            keep_original: false,
            guest_client_id: None,
        };
        assert!(matches!(
            orchestrator.create_preview(Requester::anonymous(), request).await,
            Err(AtelierError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn preview_job_renders_enhanced_image() {
        let (orchestrator, _) = orchestrator(Arc::new(DryrunVisionAnalyzer));
        let analysis = completed_analysis(&orchestrator).await;

        let job = orchestrator
            .create_preview(
                Requester::anonymous(),
                CreateUpgradePreviewRequest {
                    analysis_id: analysis.id,
                    selected_suggestion_ids: vec!["sug_2".into()],
                    keep_original: false,
                    guest_client_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(job.owner, Owner::Guest("g1".into()));
        assert!(job.prompt.as_deref().unwrap().contains("Six-prong setting"));

        assert!(orchestrator.process_next().await.unwrap());
        let done = orchestrator
            .get_preview(Requester::anonymous(), job.id)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(
            done.enhanced_image_url
                .unwrap()
                .ends_with(&format!("upgrade-previews/{}/{}/enhanced.png", analysis.id, job.id))
        );
    }
}
