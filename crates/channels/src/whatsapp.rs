//! WhatsApp Business (Cloud API) integration for template messaging.

use async_trait::async_trait;
use campaign_core::config::WhatsAppConfig;
use campaign_core::types::BusinessAccount;
use campaign_core::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// ─── Template definitions (as returned by the provider) ────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDefinition {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub components: Vec<TemplateComponent>,
}

impl TemplateDefinition {
    pub fn component(&self, kind: ComponentKind) -> Option<&TemplateComponent> {
        self.components.iter().find(|c| c.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default)]
    pub format: Option<HeaderFormat>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub example: Option<ComponentExample>,
    #[serde(default)]
    pub buttons: Vec<TemplateButton>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentKind {
    Header,
    Body,
    Footer,
    Buttons,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderFormat {
    Text,
    Image,
    Video,
    Document,
    Location,
    #[serde(other)]
    Other,
}

/// Sample values the provider stores for each placeholder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentExample {
    #[serde(default)]
    pub header_text: Vec<String>,
    #[serde(default)]
    pub header_handle: Vec<String>,
    #[serde(default)]
    pub body_text: Vec<Vec<String>>,
}

impl ComponentExample {
    pub fn has_header_placeholders(&self) -> bool {
        !self.header_text.is_empty() || !self.header_handle.is_empty()
    }

    pub fn has_body_placeholders(&self) -> bool {
        self.body_text.iter().any(|row| !row.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateButton {
    #[serde(rename = "type")]
    pub kind: ButtonKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub example: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ButtonKind {
    QuickReply,
    Url,
    PhoneNumber,
    CopyCode,
    Otp,
    Flow,
    #[serde(other)]
    Other,
}

// ─── Outbound payload ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMessage {
    pub messaging_product: String,
    pub recipient_type: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub template: TemplatePayload,
}

impl TemplateMessage {
    pub fn new(to: impl Into<String>, template: TemplatePayload) -> Self {
        Self {
            messaging_product: "whatsapp".to_string(),
            recipient_type: "individual".to_string(),
            to: to.into(),
            kind: "template".to_string(),
            template,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatePayload {
    pub name: String,
    pub language: LanguagePayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePayload {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    pub parameters: Vec<Parameter>,
}

impl ComponentPayload {
    pub fn header(parameters: Vec<Parameter>) -> Self {
        Self {
            kind: "header".to_string(),
            sub_type: None,
            index: None,
            parameters,
        }
    }

    pub fn body(parameters: Vec<Parameter>) -> Self {
        Self {
            kind: "body".to_string(),
            sub_type: None,
            index: None,
            parameters,
        }
    }

    pub fn button(sub_type: &str, index: usize, parameter: Parameter) -> Self {
        Self {
            kind: "button".to_string(),
            sub_type: Some(sub_type.to_string()),
            index: Some(index.to_string()),
            parameters: vec![parameter],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parameter {
    Text { text: String },
    Payload { payload: String },
    Image { image: MediaLink },
    Video { video: MediaLink },
    Document { document: MediaLink },
    Location { location: LocationParameter },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLink {
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationParameter {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

// ─── Provider response ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub contacts: Vec<SendContact>,
    #[serde(default)]
    pub messages: Vec<SendMessageAck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendContact {
    pub input: String,
    #[serde(default)]
    pub wa_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageAck {
    pub id: String,
    #[serde(default)]
    pub message_status: Option<String>,
}

impl SendResponse {
    pub fn message_id(&self) -> Option<&str> {
        self.messages.first().map(|m| m.id.as_str())
    }

    pub fn ack_status(&self) -> Option<&str> {
        self.messages.first().and_then(|m| m.message_status.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

// ─── Provider abstraction ──────────────────────────────────────────────────

/// Client for a messaging provider, scoped to one business account.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the live template definition by provider id.
    async fn fetch_template(&self, template_id: &str) -> CampaignResult<TemplateDefinition>;

    /// Send a template message from the given phone-number id.
    async fn send(
        &self,
        from_phone_number_id: &str,
        message: &TemplateMessage,
    ) -> CampaignResult<SendResponse>;
}

/// Builds a provider client for a business account.
pub trait ProviderFactory: Send + Sync {
    fn provider_for(&self, account: &BusinessAccount) -> CampaignResult<Arc<dyn MessagingProvider>>;
}

/// WhatsApp Cloud API client for a single business account.
pub struct WhatsAppProvider {
    client: reqwest::Client,
    api_base_url: String,
    access_token: String,
    waba_id: String,
}

impl WhatsAppProvider {
    pub fn new(
        client: reqwest::Client,
        config: &WhatsAppConfig,
        access_token: String,
        waba_id: String,
    ) -> Self {
        Self {
            client,
            api_base_url: format!(
                "{}/{}",
                config.api_base_url.trim_end_matches('/'),
                config.api_version
            ),
            access_token,
            waba_id,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> CampaignError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<GraphErrorEnvelope>(&body) {
            Ok(envelope) => CampaignError::Provider(format!(
                "{} (status {}, code {})",
                envelope.error.message,
                status.as_u16(),
                envelope.error.code.unwrap_or_default()
            )),
            Err(_) => CampaignError::Provider(format!("status {}: {}", status.as_u16(), body)),
        }
    }
}

#[async_trait]
impl MessagingProvider for WhatsAppProvider {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn fetch_template(&self, template_id: &str) -> CampaignResult<TemplateDefinition> {
        let url = format!(
            "{}/{}?fields=id,name,language,status,category,components",
            self.api_base_url, template_id
        );
        debug!(template_id = template_id, waba_id = %self.waba_id, "Fetching WhatsApp template");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| CampaignError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<TemplateDefinition>()
            .await
            .map_err(|e| CampaignError::Template(format!("invalid template {template_id}: {e}")))
    }

    async fn send(
        &self,
        from_phone_number_id: &str,
        message: &TemplateMessage,
    ) -> CampaignResult<SendResponse> {
        let url = format!("{}/{}/messages", self.api_base_url, from_phone_number_id);
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(message)
            .send()
            .await
            .map_err(|e| CampaignError::Provider(e.to_string()))?;

        metrics::histogram!("provider.send_latency_ms", "provider" => "whatsapp")
            .record(start.elapsed().as_millis() as f64);

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<SendResponse>()
            .await
            .map_err(|e| CampaignError::Provider(format!("invalid send response: {e}")))
    }
}

/// Builds [`WhatsAppProvider`] clients sharing one HTTP connection pool.
pub struct WhatsAppProviderFactory {
    client: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppProviderFactory {
    pub fn new(config: WhatsAppConfig) -> CampaignResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| CampaignError::Config(format!("failed to build HTTP client: {e}")))?;

        info!(
            base = %config.api_base_url,
            version = %config.api_version,
            timeout_ms = config.request_timeout_ms,
            "WhatsApp provider factory initialized"
        );

        Ok(Self { client, config })
    }
}

impl ProviderFactory for WhatsAppProviderFactory {
    fn provider_for(&self, account: &BusinessAccount) -> CampaignResult<Arc<dyn MessagingProvider>> {
        if account.access_token.trim().is_empty() {
            return Err(CampaignError::Config(format!(
                "business account {} has no access token",
                account.id
            )));
        }
        Ok(Arc::new(WhatsAppProvider::new(
            self.client.clone(),
            &self.config,
            account.access_token.clone(),
            account.waba_id.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_parse_graph_template() {
        let raw = r#"{
            "id": "1234",
            "name": "spring_sale",
            "language": "en_US",
            "status": "APPROVED",
            "category": "MARKETING",
            "components": [
                {"type": "HEADER", "format": "IMAGE", "example": {"header_handle": ["https://x/h.png"]}},
                {"type": "BODY", "text": "Hi {{1}}, {{2}} off", "example": {"body_text": [["Ana", "20%"]]}},
                {"type": "FOOTER", "text": "Reply STOP to opt out"},
                {"type": "BUTTONS", "buttons": [
                    {"type": "URL", "text": "Shop", "url": "https://shop/{{1}}", "example": ["https://shop/a"]},
                    {"type": "QUICK_REPLY", "text": "Stop"},
                    {"type": "CATALOG", "text": "View"}
                ]}
            ]
        }"#;
        let template: TemplateDefinition = serde_json::from_str(raw).unwrap();
        assert_eq!(template.components.len(), 4);

        let header = template.component(ComponentKind::Header).unwrap();
        assert_eq!(header.format, Some(HeaderFormat::Image));
        assert!(header.example.as_ref().unwrap().has_header_placeholders());

        let buttons = template.component(ComponentKind::Buttons).unwrap();
        assert_eq!(buttons.buttons[0].kind, ButtonKind::Url);
        assert_eq!(buttons.buttons[1].kind, ButtonKind::QuickReply);
        assert_eq!(buttons.buttons[2].kind, ButtonKind::Other);
    }

    #[test]
    fn test_template_message_wire_format() {
        let message = TemplateMessage::new(
            "+15550001111",
            TemplatePayload {
                name: "spring_sale".into(),
                language: LanguagePayload { code: "en_US".into() },
                components: vec![
                    ComponentPayload::body(vec![Parameter::Text { text: "Ana".into() }]),
                    ComponentPayload::button(
                        "quick_reply",
                        1,
                        Parameter::Payload {
                            payload: "STOP".into(),
                        },
                    ),
                ],
            },
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["messaging_product"], "whatsapp");
        assert_eq!(json["type"], "template");
        assert_eq!(json["template"]["language"]["code"], "en_US");
        assert_eq!(json["template"]["components"][0]["parameters"][0]["type"], "text");
        assert_eq!(json["template"]["components"][1]["sub_type"], "quick_reply");
        assert_eq!(json["template"]["components"][1]["index"], "1");
        assert!(json["template"]["components"][0].get("sub_type").is_none());
    }

    #[test]
    fn test_send_response_ack() {
        let raw = r#"{
            "messaging_product": "whatsapp",
            "contacts": [{"input": "+15550001111", "wa_id": "15550001111"}],
            "messages": [{"id": "wamid.ABC", "message_status": "accepted"}]
        }"#;
        let response: SendResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.message_id(), Some("wamid.ABC"));
        assert_eq!(response.ack_status(), Some("accepted"));
    }

    #[test]
    fn test_factory_rejects_account_without_token() {
        let factory = WhatsAppProviderFactory::new(WhatsAppConfig::default()).unwrap();
        let mut account = BusinessAccount {
            id: Uuid::from_u128(1),
            organization_id: Uuid::from_u128(2),
            name: "Acme".into(),
            waba_id: "waba-1".into(),
            access_token: "  ".into(),
            rate_limit_per_second: None,
        };
        assert!(matches!(
            factory.provider_for(&account),
            Err(CampaignError::Config(_))
        ));

        account.access_token = "token".into();
        let provider = factory.provider_for(&account).unwrap();
        assert_eq!(provider.name(), "whatsapp");
    }
}
