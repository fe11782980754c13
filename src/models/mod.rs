// src/models/mod.rs
pub mod catalog;
pub mod preview;
pub mod upgrade;

pub use catalog::*;
pub use preview::*;
pub use upgrade::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AtelierError;

/// Lifecycle of a generation job. Sent over the wire as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum JobStatus {
    Pending = 0,
    Processing = 1,
    Completed = 2,
    Failed = 3,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Status only moves forward: Pending -> Processing -> {Completed, Failed}.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub(crate) fn advance(&mut self, next: JobStatus) -> Result<(), AtelierError> {
        if !self.can_advance_to(next) {
            return Err(AtelierError::InvalidTransition(format!(
                "{:?} -> {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

impl From<JobStatus> for u8 {
    fn from(status: JobStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for JobStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JobStatus::Pending),
            1 => Ok(JobStatus::Processing),
            2 => Ok(JobStatus::Completed),
            3 => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status {}", other)),
        }
    }
}

/// Who a job or analysis belongs to. Exactly one of user / guest by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Owner {
    User(Uuid),
    Guest(String),
}

impl Owner {
    /// An authenticated requester always owns what they create; otherwise a
    /// non-empty guest client id is required.
    pub fn resolve(
        user_id: Option<Uuid>,
        guest_client_id: Option<&str>,
    ) -> Result<Self, AtelierError> {
        if let Some(user_id) = user_id {
            return Ok(Owner::User(user_id));
        }

        match guest_client_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(guest) if guest.len() <= 128 => Ok(Owner::Guest(guest.to_string())),
            Some(_) => Err(AtelierError::Validation(
                "guestClientId must be at most 128 characters".to_string(),
            )),
            None => Err(AtelierError::Validation(
                "guestClientId is required for unauthenticated requests".to_string(),
            )),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Owner::User(id) => Some(*id),
            Owner::Guest(_) => None,
        }
    }

    pub fn guest_client_id(&self) -> Option<&str> {
        match self {
            Owner::User(_) => None,
            Owner::Guest(id) => Some(id.as_str()),
        }
    }

    /// User-owned records are private to that user; guest-owned records carry
    /// no authentication requirement.
    pub fn is_accessible_by(&self, requester: Option<Uuid>) -> bool {
        match self {
            Owner::User(owner) => requester == Some(*owner),
            Owner::Guest(_) => true,
        }
    }
}

/// Identity attached to every request by the upstream auth layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Option<Uuid>,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }
}
