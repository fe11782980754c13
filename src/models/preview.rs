// src/models/preview.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobStatus, Owner};
use crate::errors::AtelierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PreviewKind {
    SingleImage = 0,
    Preview360 = 1,
}

impl From<PreviewKind> for u8 {
    fn from(kind: PreviewKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for PreviewKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PreviewKind::SingleImage),
            1 => Ok(PreviewKind::Preview360),
            other => Err(format!("unknown preview type {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PreviewResult {
    Single { image_url: String },
    Frames { frame_urls: Vec<String> },
}

/// One generation request for an existing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiPreviewJob {
    pub id: Uuid,
    pub configuration_id: Uuid,
    pub owner: Owner,
    pub kind: PreviewKind,
    /// 1 for single images, the requested number of angles for 360° sets.
    pub frame_count: u32,
    pub status: JobStatus,
    pub prompt: Option<String>,
    pub semantic_snapshot: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub result: Option<PreviewResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AiPreviewJob {
    pub fn new(configuration_id: Uuid, owner: Owner, kind: PreviewKind, frame_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            configuration_id,
            owner,
            kind,
            frame_count: match kind {
                PreviewKind::SingleImage => 1,
                PreviewKind::Preview360 => frame_count,
            },
            status: JobStatus::Pending,
            prompt: None,
            semantic_snapshot: None,
            error_message: None,
            result: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn start_processing(&mut self) -> Result<(), AtelierError> {
        self.status.advance(JobStatus::Processing)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Completes the job. The result shape must match the requested kind and,
    /// for 360° sets, the requested frame count.
    pub fn complete(&mut self, result: PreviewResult) -> Result<(), AtelierError> {
        match (&result, self.kind) {
            (PreviewResult::Single { image_url }, PreviewKind::SingleImage) => {
                if image_url.is_empty() {
                    return Err(AtelierError::Upstream("empty preview image URL".to_string()));
                }
            }
            (PreviewResult::Frames { frame_urls }, PreviewKind::Preview360) => {
                if frame_urls.len() != self.frame_count as usize {
                    return Err(AtelierError::Upstream(format!(
                        "expected {} frames, got {}",
                        self.frame_count,
                        frame_urls.len()
                    )));
                }
            }
            _ => {
                return Err(AtelierError::InvalidTransition(format!(
                    "result does not match preview kind {:?}",
                    self.kind
                )));
            }
        }

        self.status.advance(JobStatus::Completed)?;
        let now = Utc::now();
        self.result = Some(result);
        self.error_message = None;
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), AtelierError> {
        self.status.advance(JobStatus::Failed)?;
        let now = Utc::now();
        self.result = None;
        self.error_message = Some(message.into());
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn image_url(&self) -> Option<&str> {
        match &self.result {
            Some(PreviewResult::Single { image_url }) => Some(image_url),
            _ => None,
        }
    }

    pub fn frame_urls(&self) -> Option<&[String]> {
        match &self.result {
            Some(PreviewResult::Frames { frame_urls }) => Some(frame_urls),
            _ => None,
        }
    }
}
