//! Periodic discovery of campaigns that need driving.

use crate::manager::CampaignManager;
use crate::running::RunningCampaign;
use campaign_core::event_bus::{AlertKind, OperationalAlert};
use campaign_core::types::Campaign;
use campaign_core::CampaignResult;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What one scan tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Scheduled campaigns moved to running.
    pub promoted: usize,
    /// Running campaigns registered and queued.
    pub queued: usize,
    /// Running campaigns skipped for this tick.
    pub skipped: usize,
}

impl CampaignManager {
    pub(crate) async fn run_scanner(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }
            if self.shutdown_requested() {
                break;
            }
            match self.scan_once().await {
                Ok(report) if report != ScanReport::default() => {
                    info!(
                        promoted = report.promoted,
                        queued = report.queued,
                        skipped = report.skipped,
                        "Scan tick"
                    );
                }
                Ok(_) => debug!("Scan tick found nothing"),
                Err(e) => {
                    metrics::counter!("scanner.errors").increment(1);
                    error!(error = %e, "Scan tick aborted");
                }
            }
        }
        debug!("Scanner exited");
    }

    /// One scan tick: promote due scheduled campaigns, then register and
    /// queue every running campaign not already tracked. A storage error
    /// aborts the tick.
    pub async fn scan_once(&self) -> CampaignResult<ScanReport> {
        metrics::counter!("scanner.ticks").increment(1);
        let mut report = ScanReport::default();

        let promoted = self.store.promote_due_campaigns(Utc::now()).await?;
        for campaign_id in &promoted {
            info!(campaign_id = %campaign_id, "Scheduled campaign started");
        }
        report.promoted = promoted.len();
        metrics::counter!("scanner.promoted").increment(promoted.len() as u64);

        let tracked = self.campaigns.ids();
        let running = self.store.running_campaigns(&tracked).await?;
        for campaign in running {
            if self.track(campaign).await? {
                report.queued += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    /// Registers a discovered campaign and pushes it onto the campaign queue.
    /// Returns false when the campaign was skipped for this tick.
    async fn track(&self, campaign: Campaign) -> CampaignResult<bool> {
        let campaign_id = campaign.id;
        let account = match self.store.business_account(campaign.business_account_id).await? {
            Some(account) => account,
            None => {
                self.alerts.alert(
                    OperationalAlert::new(
                        AlertKind::MissingBusinessAccount,
                        format!(
                            "campaign {} references unknown business account {}",
                            campaign_id, campaign.business_account_id
                        ),
                    )
                    .for_campaign(campaign.organization_id, campaign_id)
                    .for_account(campaign.business_account_id),
                );
                return Ok(false);
            }
        };

        // `stop` has drained the worker registry; a worker spawned now
        // would never be stopped.
        if self.shutdown_requested() {
            debug!(campaign_id = %campaign_id, "Shutting down; campaign not picked up");
            return Ok(false);
        }

        let worker = match self.ensure_worker(&account) {
            Ok(worker) => worker,
            Err(e) => {
                self.alerts.alert(
                    OperationalAlert::new(AlertKind::WorkerUnavailable, e.to_string())
                        .for_campaign(campaign.organization_id, campaign_id)
                        .for_account(account.id),
                );
                return Ok(false);
            }
        };

        let running = Arc::new(RunningCampaign::new(campaign, worker));
        if !self.campaigns.insert_if_absent(running.clone()) {
            return Ok(false);
        }
        match self.queue_tx.try_send(running) {
            Ok(()) => {
                info!(
                    campaign_id = %campaign_id,
                    business_account_id = %account.id,
                    "Campaign picked up"
                );
                Ok(true)
            }
            Err(mpsc::error::TrySendError::Full(_)) | Err(mpsc::error::TrySendError::Closed(_)) => {
                self.campaigns.remove(campaign_id);
                warn!(campaign_id = %campaign_id, "Campaign queue full; retrying next tick");
                Ok(false)
            }
        }
    }
}
