//! Single send attempt for one contact of one campaign.

use crate::running::RunningCampaign;
use crate::store::CampaignStore;
use crate::worker::PendingMessage;
use campaign_channels::{MessagingProvider, SendResponse, TemplateMessage, TemplateMessageBuilder};
use campaign_core::event_bus::{AlertKind, AlertSink, OperationalAlert, ProgressPublisher};
use campaign_core::types::{CampaignStatus, Contact, Message, MessageDirection, MessageStatus};
use campaign_core::{CampaignError, CampaignResult};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a business worker needs to turn a pending message into a
/// provider call plus its bookkeeping.
pub struct Delivery {
    provider: Arc<dyn MessagingProvider>,
    store: Arc<dyn CampaignStore>,
    publisher: Arc<dyn ProgressPublisher>,
    alerts: Arc<dyn AlertSink>,
    builder: TemplateMessageBuilder,
}

impl Delivery {
    pub fn new(
        provider: Arc<dyn MessagingProvider>,
        store: Arc<dyn CampaignStore>,
        publisher: Arc<dyn ProgressPublisher>,
        alerts: Arc<dyn AlertSink>,
        builder: TemplateMessageBuilder,
    ) -> Self {
        Self {
            provider,
            store,
            publisher,
            alerts,
            builder,
        }
    }

    /// Sends one template message and records the outcome.
    ///
    /// Per-message failures are counted and persisted as Failed rows. A
    /// missing-parameters error stops the whole campaign instead.
    pub async fn deliver(&self, pending: &PendingMessage) {
        let campaign = &pending.campaign;
        let contact = &pending.contact;

        let message = match self.prepare(campaign, contact).await {
            Ok(message) => message,
            Err(e) if e.is_campaign_fatal() => {
                self.halt_campaign(campaign, &e).await;
                return;
            }
            Err(e) => {
                self.record_failure(campaign, contact, serde_json::Value::Null, &e).await;
                return;
            }
        };

        let payload = serde_json::to_value(&message).unwrap_or(serde_json::Value::Null);
        match self
            .provider
            .send(&campaign.campaign().phone_number_to_use, &message)
            .await
        {
            Ok(response) => self.record_success(campaign, contact, payload, &response).await,
            Err(e) => self.record_failure(campaign, contact, payload, &e).await,
        }
    }

    async fn prepare(
        &self,
        campaign: &RunningCampaign,
        contact: &Contact,
    ) -> CampaignResult<TemplateMessage> {
        let snapshot = campaign.campaign();
        let template = self
            .provider
            .fetch_template(&snapshot.message_template_id)
            .await?;
        self.builder.build(
            &template,
            snapshot.template_parameters.as_ref(),
            &contact.phone_number,
        )
    }

    async fn record_success(
        &self,
        campaign: &RunningCampaign,
        contact: &Contact,
        payload: serde_json::Value,
        response: &SendResponse,
    ) {
        let sent = campaign.record_sent();
        metrics::counter!("dispatch.sent").increment(1);
        debug!(
            campaign_id = %campaign.id(),
            contact_id = %contact.id,
            provider_message_id = ?response.message_id(),
            sent,
            "Template message sent"
        );

        let row = self.message_row(
            campaign,
            contact,
            payload,
            response.message_id().map(str::to_string),
            MessageStatus::from_provider_ack(response.ack_status()),
            None,
        );
        self.persist(row).await;
        self.publisher.publish(campaign.progress(CampaignStatus::Running));
    }

    async fn record_failure(
        &self,
        campaign: &RunningCampaign,
        contact: &Contact,
        payload: serde_json::Value,
        err: &CampaignError,
    ) {
        let error_count = campaign.record_error();
        metrics::counter!("dispatch.failed").increment(1);
        warn!(
            campaign_id = %campaign.id(),
            contact_id = %contact.id,
            error = %err,
            error_count,
            "Template message failed"
        );

        let row = self.message_row(
            campaign,
            contact,
            payload,
            None,
            MessageStatus::Failed,
            Some(err.to_string()),
        );
        self.persist(row).await;
        self.publisher.publish(campaign.progress(CampaignStatus::Running));
    }

    async fn halt_campaign(&self, campaign: &RunningCampaign, err: &CampaignError) {
        if !campaign.mark_fatal() {
            return;
        }
        let snapshot = campaign.campaign();
        metrics::counter!("dispatch.fatal").increment(1);
        error!(
            campaign_id = %snapshot.id,
            template = %snapshot.message_template_id,
            error = %err,
            "Campaign cannot build messages; stopping it"
        );
        self.alerts.alert(
            OperationalAlert::new(AlertKind::CampaignMisconfigured, err.to_string())
                .for_campaign(snapshot.organization_id, snapshot.id)
                .for_account(snapshot.business_account_id),
        );

        match self
            .store
            .transition_status(snapshot.id, CampaignStatus::Running, CampaignStatus::Paused)
            .await
        {
            Ok(true) => info!(campaign_id = %snapshot.id, "Campaign paused"),
            Ok(false) => debug!(campaign_id = %snapshot.id, "Campaign already left running"),
            Err(e) => error!(campaign_id = %snapshot.id, error = %e, "Failed to pause campaign"),
        }
    }

    fn message_row(
        &self,
        campaign: &RunningCampaign,
        contact: &Contact,
        payload: serde_json::Value,
        provider_message_id: Option<String>,
        status: MessageStatus,
        error: Option<String>,
    ) -> Message {
        let snapshot = campaign.campaign();
        Message {
            id: Uuid::new_v4(),
            organization_id: snapshot.organization_id,
            campaign_id: snapshot.id,
            contact_id: contact.id,
            business_account_id: snapshot.business_account_id,
            direction: MessageDirection::Outbound,
            payload,
            provider_message_id,
            status,
            error,
            created_at: Utc::now(),
        }
    }

    async fn persist(&self, row: Message) {
        let message_id = row.id;
        if let Err(e) = self.store.insert_message(row).await {
            error!(message_id = %message_id, error = %e, "Failed to persist message row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCampaignStore;
    use crate::test_support::{account, campaign, contact, parameterized_template, plain_template};
    use crate::worker::BusinessWorker;
    use campaign_channels::RecordingProvider;
    use campaign_core::config::DispatchConfig;
    use campaign_core::event_bus::{capture_sink, CaptureSink};
    use campaign_core::types::Campaign;

    struct Fixture {
        provider: Arc<RecordingProvider>,
        store: Arc<InMemoryCampaignStore>,
        sink: Arc<CaptureSink>,
        delivery: Delivery,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(
            RecordingProvider::new()
                .with_template(plain_template())
                .with_template(parameterized_template()),
        );
        let store = Arc::new(InMemoryCampaignStore::new());
        let sink = capture_sink();
        let delivery = Delivery::new(
            provider.clone(),
            store.clone(),
            sink.clone(),
            sink.clone(),
            TemplateMessageBuilder::new(),
        );
        Fixture {
            provider,
            store,
            sink,
            delivery,
        }
    }

    fn pending(f: &Fixture, c: Campaign, contact_id: u128) -> PendingMessage {
        f.store.insert_campaign(c.clone());
        let (worker, _rx) = BusinessWorker::unstarted(account(), &DispatchConfig::default());
        PendingMessage {
            campaign: Arc::new(RunningCampaign::new(c, worker)),
            contact: contact(contact_id),
        }
    }

    #[tokio::test]
    async fn test_success_counts_persists_and_publishes() {
        let f = fixture();
        let p = pending(&f, campaign(1, CampaignStatus::Running), 42);

        f.delivery.deliver(&p).await;

        assert_eq!(p.campaign.sent(), 1);
        assert_eq!(p.campaign.error_count(), 0);
        assert_eq!(f.provider.sends_to(&p.contact.phone_number), 1);
        assert_eq!(f.provider.sends()[0].from_phone_number_id, "phone-1");

        let rows = f.store.messages();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, MessageStatus::Sent);
        assert_eq!(rows[0].direction, MessageDirection::Outbound);
        assert!(rows[0].provider_message_id.is_some());
        assert_eq!(rows[0].payload["template"]["name"], "plain");

        let event = f.sink.last_event_for(p.campaign.id()).unwrap();
        assert_eq!((event.sent, event.error_count), (1, 0));
        assert_eq!(event.status, CampaignStatus::Running);
    }

    #[tokio::test]
    async fn test_send_failure_is_counted_not_fatal() {
        let f = fixture();
        let p = pending(&f, campaign(1, CampaignStatus::Running), 42);
        f.provider.fail_recipient(p.contact.phone_number.clone());

        f.delivery.deliver(&p).await;

        assert_eq!(p.campaign.sent(), 0);
        assert_eq!(p.campaign.error_count(), 1);
        assert!(!p.campaign.is_stopped());
        let rows = f.store.messages();
        assert_eq!(rows[0].status, MessageStatus::Failed);
        assert!(rows[0].error.as_deref().unwrap().contains("not a valid WhatsApp user"));
        assert_eq!(f.sink.last_event_for(p.campaign.id()).unwrap().error_count, 1);
    }

    #[tokio::test]
    async fn test_template_fetch_failure_is_per_message() {
        let f = fixture();
        f.provider.fail_template("tpl-plain");
        let p = pending(&f, campaign(1, CampaignStatus::Running), 42);

        f.delivery.deliver(&p).await;

        assert_eq!(p.campaign.error_count(), 1);
        assert!(!p.campaign.is_stopped());
        assert_eq!(f.store.messages()[0].payload, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_malformed_parameters_are_per_message() {
        let f = fixture();
        let mut c = campaign(1, CampaignStatus::Running);
        c.message_template_id = "tpl-params".into();
        c.template_parameters = Some(serde_json::json!("{not json"));
        let p = pending(&f, c, 42);

        f.delivery.deliver(&p).await;

        assert_eq!(p.campaign.error_count(), 1);
        assert!(!p.campaign.is_stopped());
        assert!(f.sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_parameters_stop_campaign_once() {
        let f = fixture();
        let mut c = campaign(1, CampaignStatus::Running);
        c.message_template_id = "tpl-params".into();
        let p = pending(&f, c.clone(), 42);

        f.delivery.deliver(&p).await;
        let second = PendingMessage {
            campaign: p.campaign.clone(),
            contact: contact(43),
        };
        f.delivery.deliver(&second).await;

        assert!(p.campaign.is_stopped());
        assert!(p.campaign.is_fatal());
        assert_eq!(p.campaign.sent(), 0);
        assert_eq!(p.campaign.error_count(), 0);
        assert_eq!(f.provider.send_count(), 0);
        assert!(f.store.messages().is_empty());
        assert_eq!(f.sink.alert_count(AlertKind::CampaignMisconfigured), 1);
        assert_eq!(f.sink.alerts()[0].campaign_id, Some(c.id));
        assert_eq!(f.store.campaign(c.id).unwrap().status, CampaignStatus::Paused);
    }

    #[tokio::test]
    async fn test_failed_row_insert_leaves_counters_alone() {
        let f = fixture();
        let p = pending(&f, campaign(1, CampaignStatus::Running), 42);
        f.store.set_unavailable(true);

        f.delivery.deliver(&p).await;

        assert_eq!(p.campaign.sent(), 1);
        assert_eq!(p.campaign.error_count(), 0);
        f.store.set_unavailable(false);
        assert!(f.store.messages().is_empty());
    }
}
