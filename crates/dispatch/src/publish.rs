//! NATS progress publisher with a background writer.
//! Publishing never blocks the dispatch path: events go through a bounded
//! channel and are dropped (and counted) when it is full.

use campaign_core::config::NatsConfig;
use campaign_core::event_bus::{ProgressEvent, ProgressPublisher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct NatsProgressPublisher {
    sender: mpsc::Sender<ProgressEvent>,
}

impl NatsProgressPublisher {
    /// Connects to the first configured NATS url and spawns the writer.
    pub async fn connect(config: &NatsConfig) -> anyhow::Result<Self> {
        let nats_url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "nats://localhost:4222".to_string());

        info!(url = %nats_url, "Connecting to NATS");
        let client = async_nats::ConnectOptions::new()
            .max_reconnects(Some(config.max_reconnects))
            .connect(&nats_url)
            .await?;
        info!("NATS connection established");

        let (sender, receiver) = mpsc::channel(config.publish_buffer.max(1));
        let writer = ProgressWriter {
            client,
            subject_prefix: config.progress_subject.clone(),
        };
        tokio::spawn(writer.run(receiver));

        Ok(Self { sender })
    }
}

impl ProgressPublisher for NatsProgressPublisher {
    fn publish(&self, event: ProgressEvent) {
        if let Err(e) = self.sender.try_send(event) {
            metrics::counter!("progress.dropped").increment(1);
            warn!("Progress event dropped: {}", e);
        }
    }
}

/// `{prefix}.{campaignId}`.
pub fn progress_subject(prefix: &str, campaign_id: &str) -> String {
    format!("{prefix}.{campaign_id}")
}

struct ProgressWriter {
    client: async_nats::Client,
    subject_prefix: String,
}

impl ProgressWriter {
    async fn run(self, mut receiver: mpsc::Receiver<ProgressEvent>) {
        while let Some(event) = receiver.recv().await {
            let subject = progress_subject(&self.subject_prefix, &event.campaign_id);
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Failed to encode progress event");
                    continue;
                }
            };
            if let Err(e) = self.client.publish(subject, payload.into()).await {
                metrics::counter!("progress.dropped").increment(1);
                warn!(campaign_id = %event.campaign_id, error = %e, "Progress publish failed");
            }
        }
        if let Err(e) = self.client.flush().await {
            debug!(error = %e, "NATS flush on shutdown failed");
        }
        info!("Progress writer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_subject() {
        assert_eq!(
            progress_subject("campaigns.progress", "8c1f"),
            "campaigns.progress.8c1f"
        );
    }
}
