//! Progress and alert plumbing: traits the dispatch engine emits through.
//!
//! Modules accept an `Arc<dyn ProgressPublisher>` for campaign progress
//! (NATS in production) and an `Arc<dyn AlertSink>` for operational alerts.

use crate::types::CampaignStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use uuid::Uuid;

/// Progress snapshot published after every dispatch attempt and on finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub campaign_id: String,
    pub sent: u64,
    pub error_count: u64,
    pub status: CampaignStatus,
}

impl ProgressEvent {
    pub fn new(campaign_id: Uuid, sent: u64, error_count: u64, status: CampaignStatus) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            sent,
            error_count,
            status,
        }
    }
}

/// Trait for publishing progress events. Implementations must not block.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A campaign references a business account that does not exist.
    MissingBusinessAccount,
    /// No provider client could be built for the business account.
    WorkerUnavailable,
    /// The campaign's stored configuration cannot produce a valid message.
    CampaignMisconfigured,
}

/// An operational alert for configuration or data-integrity problems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalAlert {
    pub kind: AlertKind,
    pub organization_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub business_account_id: Option<Uuid>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl OperationalAlert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            organization_id: None,
            campaign_id: None,
            business_account_id: None,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }

    pub fn for_campaign(mut self, organization_id: Uuid, campaign_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn for_account(mut self, business_account_id: Uuid) -> Self {
        self.business_account_id = Some(business_account_id);
        self
    }
}

/// Sink for operational alerts.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: OperationalAlert);
}

/// No-op publisher for modules that don't need progress emission.
pub struct NoOpSink;

impl ProgressPublisher for NoOpSink {
    fn publish(&self, _event: ProgressEvent) {}
}

impl AlertSink for NoOpSink {
    fn alert(&self, _alert: OperationalAlert) {}
}

/// Publisher that only writes progress to the log.
pub struct LogPublisher;

impl ProgressPublisher for LogPublisher {
    fn publish(&self, event: ProgressEvent) {
        info!(
            campaign_id = %event.campaign_id,
            sent = event.sent,
            error_count = event.error_count,
            status = event.status.as_str(),
            "Campaign progress"
        );
    }
}

/// Alert sink that raises alerts as error-level log records.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: OperationalAlert) {
        metrics::counter!("alerts.raised", "kind" => alert_kind_label(alert.kind)).increment(1);
        error!(
            kind = ?alert.kind,
            organization_id = ?alert.organization_id,
            campaign_id = ?alert.campaign_id,
            business_account_id = ?alert.business_account_id,
            message = %alert.message,
            "Operational alert"
        );
    }
}

fn alert_kind_label(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::MissingBusinessAccount => "missing_business_account",
        AlertKind::WorkerUnavailable => "worker_unavailable",
        AlertKind::CampaignMisconfigured => "campaign_misconfigured",
    }
}

/// In-memory sink that captures progress events and alerts for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<ProgressEvent>>,
    alerts: Mutex<Vec<OperationalAlert>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn events_for(&self, campaign_id: Uuid) -> Vec<ProgressEvent> {
        let id = campaign_id.to_string();
        self.events()
            .into_iter()
            .filter(|e| e.campaign_id == id)
            .collect()
    }

    pub fn last_event_for(&self, campaign_id: Uuid) -> Option<ProgressEvent> {
        self.events_for(campaign_id).pop()
    }

    pub fn alerts(&self) -> Vec<OperationalAlert> {
        self.alerts.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn alert_count(&self, kind: AlertKind) -> usize {
        self.alerts
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
        self.alerts.lock().expect("event bus mutex poisoned").clear();
    }
}

impl ProgressPublisher for CaptureSink {
    fn publish(&self, event: ProgressEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

impl AlertSink for CaptureSink {
    fn alert(&self, alert: OperationalAlert) {
        self.alerts.lock().expect("event bus mutex poisoned").push(alert);
    }
}

/// Convenience: create a no-op publisher for modules that don't need it.
pub fn noop_publisher() -> Arc<dyn ProgressPublisher> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
