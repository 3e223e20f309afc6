//! Campaign manager: owns the registries, the campaign queue and the
//! background loops that drive campaigns to completion.

use crate::batch::{self, BatchOutcome};
use crate::delivery::Delivery;
use crate::registry::{CampaignRegistry, WorkerRegistry};
use crate::running::RunningCampaign;
use crate::store::CampaignStore;
use crate::worker::BusinessWorker;
use campaign_channels::{ProviderFactory, TemplateMessageBuilder};
use campaign_core::config::DispatchConfig;
use campaign_core::event_bus::{AlertSink, ProgressPublisher};
use campaign_core::types::{BusinessAccount, CampaignStatus};
use campaign_core::{CampaignError, CampaignResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct CampaignManager {
    pub(crate) config: DispatchConfig,
    pub(crate) store: Arc<dyn CampaignStore>,
    pub(crate) providers: Arc<dyn ProviderFactory>,
    pub(crate) publisher: Arc<dyn ProgressPublisher>,
    pub(crate) alerts: Arc<dyn AlertSink>,
    pub(crate) campaigns: CampaignRegistry,
    pub(crate) workers: WorkerRegistry,
    pub(crate) queue_tx: mpsc::Sender<Arc<RunningCampaign>>,
    queue_rx: Mutex<Option<mpsc::Receiver<Arc<RunningCampaign>>>>,
    pub(crate) shutdown: watch::Sender<bool>,
}

impl CampaignManager {
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn CampaignStore>,
        providers: Arc<dyn ProviderFactory>,
        publisher: Arc<dyn ProgressPublisher>,
        alerts: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.campaign_queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            store,
            providers,
            publisher,
            alerts,
            campaigns: CampaignRegistry::new(),
            workers: WorkerRegistry::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            shutdown,
        })
    }

    /// Runs the scanner and the campaign-queue consumer until [`stop`](Self::stop).
    /// Can only be called once per manager.
    pub async fn run(self: Arc<Self>) -> CampaignResult<()> {
        let receiver = self.queue_rx.lock().take().ok_or_else(|| {
            CampaignError::Internal(anyhow::anyhow!("campaign manager is already running"))
        })?;

        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            batch_size = self.config.batch_size,
            rate_limit_per_second = self.config.rate_limit_per_second,
            "Campaign manager started"
        );

        let scanner = tokio::spawn(self.clone().run_scanner());
        let consumer = tokio::spawn(self.clone().consume_campaigns(receiver));
        let (scanner, consumer) = tokio::join!(scanner, consumer);
        for (task, result) in [("scanner", scanner), ("campaign consumer", consumer)] {
            if let Err(e) = result {
                error!(task = task, error = %e, "Manager task terminated abnormally");
            }
        }

        info!("Campaign manager stopped");
        Ok(())
    }

    /// Sets the stop flag of a tracked campaign. The persisted status is
    /// left to the caller. Returns false when the campaign isn't tracked.
    pub fn stop_campaign(&self, campaign_id: Uuid) -> bool {
        match self.campaigns.get(campaign_id) {
            Some(campaign) => {
                if campaign.stop() {
                    info!(campaign_id = %campaign_id, "Campaign stop requested");
                }
                true
            }
            None => {
                debug!(campaign_id = %campaign_id, "Stop requested for untracked campaign");
                false
            }
        }
    }

    /// Shuts down the loops and every business worker.
    pub fn stop(&self) {
        info!(workers = self.workers.len(), "Campaign manager shutting down");
        self.shutdown.send_replace(true);
        for worker in self.workers.drain() {
            worker.stop();
        }
    }

    pub fn tracked_campaigns(&self) -> Vec<Uuid> {
        self.campaigns.ids()
    }

    pub fn is_tracked(&self, campaign_id: Uuid) -> bool {
        self.campaigns.contains(campaign_id)
    }

    pub fn running_campaign(&self, campaign_id: Uuid) -> Option<Arc<RunningCampaign>> {
        self.campaigns.get(campaign_id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Returns the account's worker, spawning it on first use.
    pub(crate) fn ensure_worker(&self, account: &BusinessAccount) -> CampaignResult<Arc<BusinessWorker>> {
        self.workers.get_or_try_insert_with(account.id, || {
            let provider = self.providers.provider_for(account)?;
            let delivery = Arc::new(Delivery::new(
                provider,
                self.store.clone(),
                self.publisher.clone(),
                self.alerts.clone(),
                TemplateMessageBuilder::new(),
            ));
            Ok(BusinessWorker::spawn(account.clone(), delivery, &self.config))
        })
    }

    async fn consume_campaigns(self: Arc<Self>, mut receiver: mpsc::Receiver<Arc<RunningCampaign>>) {
        let mut shutdown = self.shutdown.subscribe();
        let retry_delay = Duration::from_millis(self.config.requeue_delay_ms);
        loop {
            if self.shutdown_requested() {
                break;
            }
            let campaign = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = receiver.recv() => match next {
                    Some(campaign) => campaign,
                    None => break,
                },
            };

            if campaign.is_stopped() {
                self.spawn_finalize(campaign);
                continue;
            }

            match batch::next_contacts_batch(self.store.as_ref(), &campaign, self.config.batch_size).await {
                Ok(BatchOutcome::Exhausted) => {
                    info!(
                        campaign_id = %campaign.id(),
                        offered = campaign.offered(),
                        "All contacts handed off"
                    );
                    self.spawn_finalize(campaign);
                }
                Ok(BatchOutcome::Continue { .. }) => self.requeue(campaign, None),
                Ok(BatchOutcome::Backpressure { .. }) => self.requeue(campaign, Some(retry_delay)),
                Err(e) => {
                    warn!(campaign_id = %campaign.id(), error = %e, "Batch step failed; retrying");
                    self.requeue(campaign, Some(retry_delay));
                }
            }
        }
        debug!("Campaign queue consumer exited");
    }

    /// Puts the campaign back on the queue, immediately when there is room
    /// and no delay was asked for, otherwise from a delayed task.
    fn requeue(&self, campaign: Arc<RunningCampaign>, delay: Option<Duration>) {
        let campaign = match delay {
            Some(_) => campaign,
            None => match self.queue_tx.try_send(campaign) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(campaign)) => campaign,
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            },
        };
        let delay = delay.unwrap_or(Duration::from_millis(self.config.requeue_delay_ms));
        let queue = self.queue_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if queue.send(campaign).await.is_err() {
                debug!("Campaign queue closed; requeue dropped");
            }
        });
    }

    /// Waits for the campaign's outstanding messages, then reconciles its
    /// status. Runs at most once per campaign.
    fn spawn_finalize(self: &Arc<Self>, campaign: Arc<RunningCampaign>) {
        if !campaign.begin_finalize() {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            campaign.wait_drained().await;
            manager.finalize(&campaign).await;
        });
    }

    /// Finishes a campaign that ran out of contacts. A stopped campaign, or
    /// one whose persisted status moved away from running, keeps that status.
    /// The final progress event carries whichever status was kept, so
    /// consumers see Finished only for a complete dispatch.
    async fn finalize(&self, campaign: &RunningCampaign) {
        let campaign_id = campaign.id();
        let status = if campaign.is_stopped() {
            self.persisted_status(campaign).await
        } else {
            match self
                .store
                .transition_status(campaign_id, CampaignStatus::Running, CampaignStatus::Finished)
                .await
            {
                Ok(true) => CampaignStatus::Finished,
                Ok(false) => {
                    let status = self.persisted_status(campaign).await;
                    info!(
                        campaign_id = %campaign_id,
                        status = status.as_str(),
                        "Campaign left running before finalize; status kept"
                    );
                    status
                }
                Err(e) => {
                    error!(campaign_id = %campaign_id, error = %e, "Failed to finish campaign");
                    self.persisted_status(campaign).await
                }
            }
        };

        self.campaigns.remove(campaign_id);
        self.publisher.publish(campaign.progress(status));
        info!(
            campaign_id = %campaign_id,
            status = status.as_str(),
            sent = campaign.sent(),
            error_count = campaign.error_count(),
            "Campaign finalized"
        );
    }

    async fn persisted_status(&self, campaign: &RunningCampaign) -> CampaignStatus {
        match self.store.campaign_status(campaign.id()).await {
            Ok(status) => status,
            Err(e) => {
                warn!(campaign_id = %campaign.id(), error = %e, "Could not read campaign status");
                campaign.campaign().status
            }
        }
    }
}
