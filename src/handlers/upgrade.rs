// src/handlers/upgrade.rs
use actix_multipart::{Field, Multipart};
use actix_web::{HttpResponse, web};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::preview::failure_message;
use crate::AppState;
use crate::errors::AtelierError;
use crate::models::*;
use crate::services::{CreateUpgradePreviewRequest, UploadedImage};

const FILE_FIELD: &str = "file";
const GUEST_FIELD: &str = "guestClientId";
const MAX_TEXT_FIELD_BYTES: usize = 1024;

fn multipart_error(e: actix_multipart::MultipartError) -> AtelierError {
    AtelierError::Validation(format!("Invalid multipart payload: {}", e))
}

/// Drains a field, failing as soon as it grows past `limit`.
async fn read_field(field: &mut Field, limit: usize) -> Result<BytesMut, AtelierError> {
    let mut data = BytesMut::new();
    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
        if data.len() + chunk.len() > limit {
            return Err(AtelierError::Validation(format!(
                "Field '{}' exceeds {} bytes",
                field.name(),
                limit
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// Browsers sometimes send HEIC as application/octet-stream.
fn content_type_from_filename(filename: Option<&str>) -> Option<&'static str> {
    let extension = filename?.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub analysis_id: Uuid,
    pub image_url: String,
    pub status: AnalysisStatus,
}

pub async fn upload_image(
    requester: Requester,
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AtelierError> {
    let max_bytes = data.upgrade.max_upload_bytes();
    let mut upload: Option<UploadedImage> = None;
    let mut guest_client_id: Option<String> = None;

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let name = field.name().to_string();
        match name.as_str() {
            FILE_FIELD => {
                let filename = field
                    .content_disposition()
                    .get_filename()
                    .map(str::to_string);
                let declared = field
                    .content_type()
                    .map(|ct| ct.essence_str().to_string())
                    .filter(|ct| ct != "application/octet-stream");
                let content_type = declared
                    .or_else(|| content_type_from_filename(filename.as_deref()).map(str::to_string))
                    .unwrap_or_else(|| "application/octet-stream".to_string());

                let bytes = read_field(&mut field, max_bytes).await?;
                upload = Some(UploadedImage {
                    filename,
                    content_type,
                    data: bytes.freeze(),
                });
            }
            GUEST_FIELD => {
                let bytes = read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?;
                guest_client_id = Some(String::from_utf8_lossy(&bytes).trim().to_string());
            }
            _ => {
                // Unknown fields are drained and ignored.
                read_field(&mut field, max_bytes).await?;
            }
        }
    }

    let upload = upload.ok_or_else(|| {
        AtelierError::Validation(format!("Multipart field '{}' is required", FILE_FIELD))
    })?;
    let original = upload.data.clone();
    let analysis = data
        .upgrade
        .upload_image(requester, guest_client_id.as_deref(), upload)
        .await?;

    let orchestrator = data.upgrade.clone();
    let analysis_id = analysis.id;
    actix_web::rt::spawn(async move {
        if let Err(e) = orchestrator.run_analysis(analysis_id, original).await {
            error!("Analysis {} could not be recorded: {}", analysis_id, e);
        }
    });

    Ok(HttpResponse::Accepted().json(UploadResponse {
        analysis_id: analysis.id,
        image_url: analysis.original_image_url,
        status: analysis.status,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedAttributesResponse {
    pub jewelry_type: Option<JewelryType>,
    pub metal: Option<MetalFamily>,
    pub stones: Option<String>,
    pub style: Option<StyleFamily>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub id: Uuid,
    pub status: AnalysisStatus,
    pub original_image_url: String,
    pub detected: DetectedAttributesResponse,
    pub confidence: Option<f32>,
    pub suggestion_count: usize,
    pub keep_original: Option<KeepOriginalOption>,
    pub preview_guidance: Option<PreviewGuidance>,
    pub limitations: Vec<String>,
    pub clarification: Option<ClarificationRequest>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisResponse {
    pub fn from_analysis(analysis: &UpgradeAnalysis, expose_details: bool) -> Self {
        Self {
            id: analysis.id,
            status: analysis.status,
            original_image_url: analysis.original_image_url.clone(),
            detected: DetectedAttributesResponse {
                jewelry_type: analysis.jewelry_type,
                metal: analysis.metal,
                stones: analysis.stones.clone(),
                style: analysis.style,
            },
            confidence: analysis.confidence,
            suggestion_count: analysis.suggestions.len(),
            keep_original: analysis.keep_original.clone(),
            preview_guidance: analysis.preview_guidance.clone(),
            limitations: analysis.limitations.clone(),
            clarification: analysis.clarification.clone(),
            error_message: failure_message(analysis.error_message.as_deref(), expose_details),
            created_at: analysis.created_at,
            completed_at: analysis.completed_at,
        }
    }
}

pub async fn get_analysis(
    requester: Requester,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AtelierError> {
    let analysis = data
        .upgrade
        .get_analysis(requester, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(AnalysisResponse::from_analysis(
        &analysis,
        data.expose_error_details,
    )))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionGroup {
    pub id: &'static str,
    pub title: &'static str,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionsResponse {
    pub analysis_id: Uuid,
    pub categories: Vec<SuggestionGroup>,
    pub keep_original: KeepOriginalOption,
    pub preview_guidance: Option<PreviewGuidance>,
}

/// Groups in fixed category order; empty categories are left out.
pub fn group_suggestions(suggestions: &[Suggestion]) -> Vec<SuggestionGroup> {
    SuggestionCategory::ALL
        .into_iter()
        .map(|category| SuggestionGroup {
            id: category.id(),
            title: category.title(),
            suggestions: suggestions
                .iter()
                .filter(|s| s.category == category)
                .cloned()
                .collect(),
        })
        .filter(|group| !group.suggestions.is_empty())
        .collect()
}

pub async fn get_suggestions(
    requester: Requester,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AtelierError> {
    let analysis = data
        .upgrade
        .get_suggestions(requester, path.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(SuggestionsResponse {
        analysis_id: analysis.id,
        categories: group_suggestions(&analysis.suggestions),
        keep_original: analysis.keep_original.clone().unwrap_or_default(),
        preview_guidance: analysis.preview_guidance.clone(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUpgradePreviewBody {
    pub analysis_id: Uuid,
    #[serde(default)]
    pub selected_suggestion_ids: Vec<String>,
    #[serde(default)]
    pub keep_original: bool,
    #[serde(default)]
    pub guest_client_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePreviewResponse {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub status: JobStatus,
    pub keep_original: bool,
    pub applied_suggestion_ids: Vec<String>,
    pub enhanced_image_url: Option<String>,
    pub error_message: Option<String>,
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UpgradePreviewResponse {
    pub fn from_job(job: &UpgradePreviewJob, expose_details: bool) -> Self {
        Self {
            id: job.id,
            analysis_id: job.analysis_id,
            status: job.status,
            keep_original: job.keep_original,
            applied_suggestion_ids: job.applied_suggestion_ids.clone(),
            enhanced_image_url: job.enhanced_image_url.clone(),
            error_message: failure_message(job.error_message.as_deref(), expose_details),
            prompt: job.prompt.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

pub async fn create_upgrade_preview(
    requester: Requester,
    body: web::Json<CreateUpgradePreviewBody>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AtelierError> {
    let body = body.into_inner();
    let job = data
        .upgrade
        .create_preview(
            requester,
            CreateUpgradePreviewRequest {
                analysis_id: body.analysis_id,
                selected_suggestion_ids: body.selected_suggestion_ids,
                keep_original: body.keep_original,
                guest_client_id: body.guest_client_id,
            },
        )
        .await?;

    Ok(HttpResponse::Accepted().json(UpgradePreviewResponse::from_job(
        &job,
        data.expose_error_details,
    )))
}

pub async fn get_upgrade_preview(
    requester: Requester,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AtelierError> {
    let job = data
        .upgrade
        .get_preview(requester, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(UpgradePreviewResponse::from_job(
        &job,
        data.expose_error_details,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(id: &str, category: SuggestionCategory) -> Suggestion {
        Suggestion {
            id: id.to_string(),
            category,
            title: format!("title {}", id),
            description: String::new(),
            benefit: String::new(),
            impact: ImpactLevel::Medium,
            character_note: None,
        }
    }

    #[test]
    fn groups_follow_category_order_and_skip_empty() {
        let suggestions = vec![
            suggestion("sug_1", SuggestionCategory::CraftsmanshipDetail),
            suggestion("sug_2", SuggestionCategory::MaterialFinish),
            suggestion("sug_3", SuggestionCategory::CraftsmanshipDetail),
        ];
        let groups = group_suggestions(&suggestions);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id, "material_finish");
        assert_eq!(groups[0].title, "Material & Finish");
        assert_eq!(groups[1].id, "craftsmanship_detail");
        let ids: Vec<_> = groups[1].suggestions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["sug_1", "sug_3"]);
    }

    #[test]
    fn filename_extension_fills_missing_content_type() {
        assert_eq!(content_type_from_filename(Some("IMG_0042.HEIC")), Some("image/heic"));
        assert_eq!(content_type_from_filename(Some("ring.jpeg")), Some("image/jpeg"));
        assert_eq!(content_type_from_filename(Some("notes.txt")), None);
        assert_eq!(content_type_from_filename(None), None);
    }

    #[test]
    fn preview_body_defaults() {
        let body: CreateUpgradePreviewBody = serde_json::from_value(serde_json::json!({
            "analysisId": Uuid::new_v4(),
            "keepOriginal": true
        }))
        .unwrap();
        assert!(body.keep_original);
        assert!(body.selected_suggestion_ids.is_empty());
    }
}
