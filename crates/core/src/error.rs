use thiserror::Error;
use uuid::Uuid;

use crate::types::CampaignStatus;

pub type DripResult<T> = Result<T, DripError>;

#[derive(Error, Debug)]
pub enum DripError {
    #[error("Campaign {campaign_id} is not ready for enrollment: {reason}")]
    CampaignNotReady { campaign_id: Uuid, reason: String },

    #[error("Campaign {0} not found")]
    CampaignNotFound(Uuid),

    #[error("Campaign {campaign_id} not found or not in required state {expected:?}")]
    NotFoundOrWrongState {
        campaign_id: Uuid,
        expected: CampaignStatus,
    },

    #[error("Invalid campaign definition: {0}")]
    InvalidCampaign(String),

    #[error("Recipient already has an active enrollment in campaign {campaign_id}")]
    DuplicateEnrollment { campaign_id: Uuid },

    #[error("Enrollment {0} not found")]
    EnrollmentNotFound(Uuid),

    #[error("Claim on enrollment {0} was lost")]
    ClaimLost(Uuid),

    #[error("Dispatch failed for enrollment {enrollment_id} at step {step_number}: {message}")]
    Dispatch {
        enrollment_id: Uuid,
        step_number: u32,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DripError {
    /// Whether the error belongs to a single item and should be counted
    /// rather than aborting a batch.
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            DripError::Dispatch { .. }
                | DripError::ClaimLost(_)
                | DripError::DuplicateEnrollment { .. }
                | DripError::EnrollmentNotFound(_)
        )
    }
}
