use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bulk outbound template-message send job, as persisted by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub business_account_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Provider-side id of the approved template.
    pub message_template_id: String,
    /// Stored placeholder values (`{"body": [..], "header": [..], "buttons": [..]}`).
    #[serde(default)]
    pub template_parameters: Option<serde_json::Value>,
    /// Provider phone-number id the campaign sends from.
    pub phone_number_to_use: String,
    /// Target lists. Empty means every contact of the organization.
    #[serde(default)]
    pub contact_list_ids: Vec<Uuid>,
    /// Id of the last contact handed to a worker.
    #[serde(default)]
    pub last_contact_sent: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Cancelled,
    Finished,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Finished | CampaignStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Finished => "finished",
        }
    }
}

/// A messaging-platform identity with its own send budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessAccount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// WhatsApp Business Account id.
    pub waba_id: String,
    #[serde(default)]
    pub access_token: String,
    /// Overrides the default per-second ceiling when set.
    #[serde(default)]
    pub rate_limit_per_second: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub phone_number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub list_ids: Vec<Uuid>,
}

/// One row per dispatch attempt. Append-only from the engine's side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub business_account_id: Uuid,
    pub direction: MessageDirection,
    pub payload: serde_json::Value,
    pub provider_message_id: Option<String>,
    pub status: MessageStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Maps the provider's immediate acknowledgement onto a message status.
    pub fn from_provider_ack(ack: Option<&str>) -> Self {
        match ack.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("held_for_quality_assessment") | Some("queued") => MessageStatus::Queued,
            Some("delivered") => MessageStatus::Delivered,
            Some("read") => MessageStatus::Read,
            Some("failed") => MessageStatus::Failed,
            _ => MessageStatus::Sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&CampaignStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let status: CampaignStatus = serde_json::from_str("\"scheduled\"").unwrap();
        assert_eq!(status, CampaignStatus::Scheduled);
        assert_eq!(CampaignStatus::Finished.as_str(), "finished");
    }

    #[test]
    fn test_terminal_states() {
        assert!(CampaignStatus::Finished.is_terminal());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
        assert!(!CampaignStatus::Running.is_terminal());
    }

    #[test]
    fn test_provider_ack_mapping() {
        assert_eq!(MessageStatus::from_provider_ack(Some("accepted")), MessageStatus::Sent);
        assert_eq!(MessageStatus::from_provider_ack(None), MessageStatus::Sent);
        assert_eq!(
            MessageStatus::from_provider_ack(Some("held_for_quality_assessment")),
            MessageStatus::Queued
        );
    }
}
