// src/handlers/preview.rs
use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::errors::AtelierError;
use crate::models::*;
use crate::services::CreatePreviewRequest;

pub(crate) const GENERIC_FAILURE_MESSAGE: &str = "Preview generation failed. Please try again.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePreviewBody {
    pub configuration_id: Uuid,
    #[serde(rename = "type")]
    pub kind: PreviewKind,
    #[serde(default)]
    pub frame_count: Option<u32>,
    #[serde(default)]
    pub guest_client_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewJobResponse {
    pub id: Uuid,
    pub configuration_id: Uuid,
    #[serde(rename = "type")]
    pub kind: PreviewKind,
    pub status: JobStatus,
    pub frame_count: u32,
    pub image_url: Option<String>,
    pub frame_urls: Option<Vec<String>>,
    pub error_message: Option<String>,
    pub prompt: Option<String>,
    pub semantic_snapshot: Option<serde_json::Value>,
    pub user_id: Option<Uuid>,
    pub guest_client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Raw provider errors stay server-side unless the deployment opts in.
pub(crate) fn failure_message(error: Option<&str>, expose_details: bool) -> Option<String> {
    error.map(|message| {
        if expose_details {
            message.to_string()
        } else {
            GENERIC_FAILURE_MESSAGE.to_string()
        }
    })
}

impl PreviewJobResponse {
    pub fn from_job(job: &AiPreviewJob, expose_details: bool) -> Self {
        Self {
            id: job.id,
            configuration_id: job.configuration_id,
            kind: job.kind,
            status: job.status,
            frame_count: job.frame_count,
            image_url: job.image_url().map(str::to_string),
            frame_urls: job.frame_urls().map(<[String]>::to_vec),
            error_message: failure_message(job.error_message.as_deref(), expose_details),
            prompt: job.prompt.clone(),
            semantic_snapshot: job.semantic_snapshot.clone(),
            user_id: job.owner.user_id(),
            guest_client_id: job.owner.guest_client_id().map(str::to_string),
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

pub async fn create_preview(
    requester: Requester,
    body: web::Json<CreatePreviewBody>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AtelierError> {
    let body = body.into_inner();
    let job = data
        .preview
        .create(
            requester,
            CreatePreviewRequest {
                configuration_id: body.configuration_id,
                kind: body.kind,
                frame_count: body.frame_count,
                guest_client_id: body.guest_client_id,
            },
        )
        .await?;

    Ok(HttpResponse::Accepted().json(PreviewJobResponse::from_job(
        &job,
        data.expose_error_details,
    )))
}

pub async fn get_preview(
    requester: Requester,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AtelierError> {
    let job = data.preview.get(requester, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(PreviewJobResponse::from_job(
        &job,
        data.expose_error_details,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_reads_integer_type() {
        let id = Uuid::new_v4();
        let body: CreatePreviewBody = serde_json::from_value(serde_json::json!({
            "configurationId": id,
            "type": 1,
            "frameCount": 8
        }))
        .unwrap();
        assert_eq!(body.kind, PreviewKind::Preview360);
        assert_eq!(body.frame_count, Some(8));
        assert!(body.guest_client_id.is_none());

        assert!(
            serde_json::from_value::<CreatePreviewBody>(serde_json::json!({
                "configurationId": id,
                "type": 4
            }))
            .is_err()
        );
    }

    #[test]
    fn failed_job_hides_details_unless_exposed() {
        let mut job = AiPreviewJob::new(
            Uuid::new_v4(),
            Owner::Guest("g1".into()),
            PreviewKind::SingleImage,
            1,
        );
        job.start_processing().unwrap();
        job.fail("stability returned 500: boom").unwrap();

        let hidden = PreviewJobResponse::from_job(&job, false);
        assert_eq!(hidden.error_message.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
        assert_eq!(hidden.status, JobStatus::Failed);

        let shown = PreviewJobResponse::from_job(&job, true);
        assert_eq!(
            shown.error_message.as_deref(),
            Some("stability returned 500: boom")
        );

        let json = serde_json::to_value(&hidden).unwrap();
        assert_eq!(json["status"], 3);
        assert_eq!(json["type"], 0);
        assert_eq!(json["guestClientId"], "g1");
    }

    #[test]
    fn response_carries_prompt_and_snapshot_while_pending() {
        let mut job = AiPreviewJob::new(
            Uuid::new_v4(),
            Owner::Guest("g1".into()),
            PreviewKind::SingleImage,
            1,
        );
        job.prompt = Some("A gold ring".into());
        job.semantic_snapshot = Some(serde_json::json!({ "metal": "gold" }));

        let json = serde_json::to_value(PreviewJobResponse::from_job(&job, false)).unwrap();
        assert_eq!(json["status"], 0);
        assert_eq!(json["prompt"], "A gold ring");
        assert_eq!(json["semanticSnapshot"]["metal"], "gold");
    }
}
