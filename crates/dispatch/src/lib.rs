//! Campaign dispatch engine.
//!
//! Turns persisted campaigns into per-account, rate-limited streams of
//! WhatsApp template messages: a scanner discovers running campaigns, a
//! campaign queue drives cursor-based contact batches into per-account
//! business workers, and a finalize step reconciles the persisted status
//! once every handed-off message has resolved.

pub mod batch;
pub mod delivery;
pub mod manager;
pub mod publish;
pub mod rate_limit;
pub mod registry;
pub mod running;
pub mod scanner;
pub mod store;
pub mod worker;

pub use batch::BatchOutcome;
pub use delivery::Delivery;
pub use manager::CampaignManager;
pub use publish::NatsProgressPublisher;
pub use rate_limit::SlidingWindowLimiter;
pub use running::RunningCampaign;
pub use scanner::ScanReport;
pub use store::{CampaignStore, InMemoryCampaignStore, SeedData};
pub use worker::{BusinessWorker, PendingMessage};

#[cfg(test)]
pub(crate) mod test_support {
    use campaign_channels::TemplateDefinition;
    use campaign_core::types::{BusinessAccount, Campaign, CampaignStatus, Contact};
    use chrono::Utc;
    use uuid::Uuid;

    pub const ORG: Uuid = Uuid::from_u128(0xA0);
    pub const ACCOUNT: Uuid = Uuid::from_u128(0xB0);
    pub const LIST: Uuid = Uuid::from_u128(0xC0);

    pub fn account() -> BusinessAccount {
        BusinessAccount {
            id: ACCOUNT,
            organization_id: ORG,
            name: "Acme".into(),
            waba_id: "waba-1".into(),
            access_token: "token".into(),
            rate_limit_per_second: None,
        }
    }

    pub fn campaign(id: u128, status: CampaignStatus) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::from_u128(id),
            organization_id: ORG,
            business_account_id: ACCOUNT,
            name: format!("campaign-{id}"),
            status,
            scheduled_at: None,
            message_template_id: "tpl-plain".into(),
            template_parameters: None,
            phone_number_to_use: "phone-1".into(),
            contact_list_ids: vec![LIST],
            last_contact_sent: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contact(id: u128) -> Contact {
        Contact {
            id: Uuid::from_u128(id),
            organization_id: ORG,
            phone_number: format!("+1555{id:07}"),
            name: None,
            list_ids: vec![LIST],
        }
    }

    pub fn plain_template() -> TemplateDefinition {
        serde_json::from_value(serde_json::json!({
            "id": "tpl-plain",
            "name": "plain",
            "language": "en_US",
            "components": [{"type": "BODY", "text": "Hello from Acme"}]
        }))
        .unwrap()
    }

    pub fn parameterized_template() -> TemplateDefinition {
        serde_json::from_value(serde_json::json!({
            "id": "tpl-params",
            "name": "greeting",
            "language": "en_US",
            "components": [
                {"type": "BODY", "text": "Hi {{1}}", "example": {"body_text": [["Ana"]]}}
            ]
        }))
        .unwrap()
    }
}
