//! In-process provider that records every send instead of calling the
//! network. Backs `--dry-run` and the dispatch tests.

use crate::whatsapp::{
    MessagingProvider, ProviderFactory, SendMessageAck, SendResponse, TemplateDefinition,
    TemplateMessage,
};
use async_trait::async_trait;
use campaign_core::types::BusinessAccount;
use campaign_core::{CampaignError, CampaignResult};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

/// A send captured by [`RecordingProvider`].
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub from_phone_number_id: String,
    pub to: String,
    pub template: String,
    pub message: TemplateMessage,
    pub at: Instant,
}

pub struct RecordingProvider {
    templates: DashMap<String, TemplateDefinition>,
    fallback_templates: bool,
    failing_recipients: DashSet<String>,
    failing_templates: DashSet<String>,
    send_delay: Option<Duration>,
    sends: Mutex<Vec<RecordedSend>>,
    template_fetches: AtomicUsize,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
            fallback_templates: false,
            failing_recipients: DashSet::new(),
            failing_templates: DashSet::new(),
            send_delay: None,
            sends: Mutex::new(Vec::new()),
            template_fetches: AtomicUsize::new(0),
        }
    }

    /// Unknown template ids resolve to a parameterless body-only template.
    pub fn dry_run() -> Self {
        Self {
            fallback_templates: true,
            ..Self::new()
        }
    }

    pub fn with_template(self, template: TemplateDefinition) -> Self {
        self.templates.insert(template.id.clone(), template);
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Every send to `phone_number` fails.
    pub fn fail_recipient(&self, phone_number: impl Into<String>) {
        self.failing_recipients.insert(phone_number.into());
    }

    /// Every fetch of `template_id` fails.
    pub fn fail_template(&self, template_id: impl Into<String>) {
        self.failing_templates.insert(template_id.into());
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().expect("recording mutex poisoned").clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().expect("recording mutex poisoned").len()
    }

    pub fn sends_to(&self, phone_number: &str) -> usize {
        self.sends
            .lock()
            .expect("recording mutex poisoned")
            .iter()
            .filter(|s| s.to == phone_number)
            .count()
    }

    pub fn template_fetches(&self) -> usize {
        self.template_fetches.load(Ordering::Relaxed)
    }

    fn fallback_template(template_id: &str) -> TemplateDefinition {
        TemplateDefinition {
            id: template_id.to_string(),
            name: template_id.to_string(),
            language: "en_US".to_string(),
            status: Some("APPROVED".to_string()),
            category: Some("MARKETING".to_string()),
            components: Vec::new(),
        }
    }
}

impl Default for RecordingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn fetch_template(&self, template_id: &str) -> CampaignResult<TemplateDefinition> {
        self.template_fetches.fetch_add(1, Ordering::Relaxed);
        if self.failing_templates.contains(template_id) {
            return Err(CampaignError::Provider(format!(
                "template {template_id} unavailable"
            )));
        }
        if let Some(template) = self.templates.get(template_id) {
            return Ok(template.clone());
        }
        if self.fallback_templates {
            return Ok(Self::fallback_template(template_id));
        }
        Err(CampaignError::NotFound(format!("template {template_id}")))
    }

    async fn send(
        &self,
        from_phone_number_id: &str,
        message: &TemplateMessage,
    ) -> CampaignResult<SendResponse> {
        let at = Instant::now();
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_recipients.contains(&message.to) {
            return Err(CampaignError::Provider(format!(
                "recipient {} is not a valid WhatsApp user",
                message.to
            )));
        }

        if self.fallback_templates {
            info!(
                from = from_phone_number_id,
                to = %message.to,
                template = %message.template.name,
                "Dry run: template message not sent"
            );
        }

        self.sends
            .lock()
            .expect("recording mutex poisoned")
            .push(RecordedSend {
                from_phone_number_id: from_phone_number_id.to_string(),
                to: message.to.clone(),
                template: message.template.name.clone(),
                message: message.clone(),
                at,
            });

        Ok(SendResponse {
            messaging_product: Some("whatsapp".to_string()),
            contacts: Vec::new(),
            messages: vec![SendMessageAck {
                id: format!("wamid.{}", Uuid::new_v4().simple()),
                message_status: Some("accepted".to_string()),
            }],
        })
    }
}

/// Hands out one shared [`RecordingProvider`] for every account.
pub struct RecordingProviderFactory {
    provider: Arc<RecordingProvider>,
    unavailable_accounts: DashSet<Uuid>,
}

impl RecordingProviderFactory {
    pub fn new(provider: Arc<RecordingProvider>) -> Self {
        Self {
            provider,
            unavailable_accounts: DashSet::new(),
        }
    }

    /// Building a client for `account_id` fails from now on.
    pub fn make_unavailable(&self, account_id: Uuid) {
        self.unavailable_accounts.insert(account_id);
    }

    pub fn provider(&self) -> Arc<RecordingProvider> {
        self.provider.clone()
    }
}

impl ProviderFactory for RecordingProviderFactory {
    fn provider_for(&self, account: &BusinessAccount) -> CampaignResult<Arc<dyn MessagingProvider>> {
        if self.unavailable_accounts.contains(&account.id) {
            return Err(CampaignError::Config(format!(
                "no provider client for business account {}",
                account.id
            )));
        }
        Ok(self.provider.clone())
    }
}
