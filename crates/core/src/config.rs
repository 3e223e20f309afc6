use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `CAMPAIGN_DISPATCH__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_campaign_queue_capacity")]
    pub campaign_queue_capacity: usize,
    #[serde(default = "default_worker_queue_capacity")]
    pub worker_queue_capacity: usize,
    /// Account-wide send ceiling per rolling second.
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: u32,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    /// Delay before a campaign blocked on a full worker queue is retried.
    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_whatsapp_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_whatsapp_api_version")]
    pub api_version: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_nats_enabled")]
    pub enabled: bool,
    #[serde(default = "default_nats_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_progress_subject")]
    pub progress_subject: String,
    #[serde(default = "default_nats_max_reconnects")]
    pub max_reconnects: usize,
    #[serde(default = "default_publish_buffer")]
    pub publish_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "dispatch-01".to_string()
}
fn default_scan_interval_secs() -> u64 {
    5
}
fn default_batch_size() -> usize {
    100
}
fn default_campaign_queue_capacity() -> usize {
    100
}
fn default_worker_queue_capacity() -> usize {
    1000
}
fn default_rate_limit_per_second() -> u32 {
    80
}
fn default_rate_limit_backoff_ms() -> u64 {
    20
}
fn default_requeue_delay_ms() -> u64 {
    250
}
fn default_whatsapp_base_url() -> String {
    "https://graph.facebook.com".to_string()
}
fn default_whatsapp_api_version() -> String {
    "v21.0".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_nats_enabled() -> bool {
    true
}
fn default_nats_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}
fn default_progress_subject() -> String {
    "campaigns.progress".to_string()
}
fn default_nats_max_reconnects() -> usize {
    60
}
fn default_publish_buffer() -> usize {
    10_000
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            batch_size: default_batch_size(),
            campaign_queue_capacity: default_campaign_queue_capacity(),
            worker_queue_capacity: default_worker_queue_capacity(),
            rate_limit_per_second: default_rate_limit_per_second(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            requeue_delay_ms: default_requeue_delay_ms(),
        }
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_whatsapp_base_url(),
            api_version: default_whatsapp_api_version(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: default_nats_enabled(),
            urls: default_nats_urls(),
            progress_subject: default_progress_subject(),
            max_reconnects: default_nats_max_reconnects(),
            publish_buffer: default_publish_buffer(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            host: default_host(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            dispatch: DispatchConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            nats: NatsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("CAMPAIGN_DISPATCH")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("nats.urls"),
            )
            .build()?;
        config.try_deserialize()
    }
}
