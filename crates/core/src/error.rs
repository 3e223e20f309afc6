use thiserror::Error;
use uuid::Uuid;

use crate::types::CampaignStatus;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for campaign {campaign_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        campaign_id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Messaging provider error: {0}")]
    Provider(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Template {template} requires parameters but none are stored")]
    MissingTemplateParameters { template: String },

    #[error("Invalid template parameters: {0}")]
    InvalidParameters(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    /// Whether the error invalidates the whole campaign rather than a single
    /// recipient.
    pub fn is_campaign_fatal(&self) -> bool {
        matches!(self, CampaignError::MissingTemplateParameters { .. })
    }
}
