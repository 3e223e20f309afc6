//! Per-business-account worker.
//!
//! Every campaign of an account feeds the same bounded queue. A single
//! consumer task pulls messages in order, drops those whose campaign has
//! been stopped, and spawns a delivery task for each message the account's
//! limiter admits. A denied message stays at the head of the queue and is
//! retried after a short backoff.

use crate::delivery::Delivery;
use crate::rate_limit::SlidingWindowLimiter;
use crate::running::RunningCampaign;
use campaign_core::config::DispatchConfig;
use campaign_core::types::{BusinessAccount, Contact};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

/// One contact of one campaign, waiting for its send slot.
pub struct PendingMessage {
    pub campaign: Arc<RunningCampaign>,
    pub contact: Contact,
}

pub struct BusinessWorker {
    account: BusinessAccount,
    sender: mpsc::Sender<PendingMessage>,
    limiter: Arc<SlidingWindowLimiter>,
    capacity: usize,
    shutdown: watch::Sender<bool>,
}

impl BusinessWorker {
    /// Creates the worker and starts its consumer task.
    pub fn spawn(
        account: BusinessAccount,
        delivery: Arc<Delivery>,
        config: &DispatchConfig,
    ) -> Arc<Self> {
        let (worker, receiver) = Self::unstarted(account, config);
        let consumer = Consumer {
            account_id: worker.account.id,
            receiver,
            limiter: worker.limiter.clone(),
            delivery,
            backoff: Duration::from_millis(config.rate_limit_backoff_ms.max(1)),
            shutdown: worker.shutdown.subscribe(),
        };
        tokio::spawn(consumer.run());

        info!(
            business_account_id = %worker.account.id,
            rate_limit_per_second = worker.limiter.ceiling(),
            queue_capacity = worker.capacity,
            "Business worker started"
        );
        worker
    }

    /// Worker whose queue nobody consumes yet.
    pub(crate) fn unstarted(
        account: BusinessAccount,
        config: &DispatchConfig,
    ) -> (Arc<Self>, mpsc::Receiver<PendingMessage>) {
        let capacity = config.worker_queue_capacity.max(1);
        let ceiling = account
            .rate_limit_per_second
            .unwrap_or(config.rate_limit_per_second);
        let (sender, receiver) = mpsc::channel(capacity);
        let (shutdown, _) = watch::channel(false);
        let worker = Arc::new(Self {
            account,
            sender,
            limiter: Arc::new(SlidingWindowLimiter::per_second(ceiling)),
            capacity,
            shutdown,
        });
        (worker, receiver)
    }

    pub fn account_id(&self) -> Uuid {
        self.account.id
    }

    /// Non-blocking hand-off. Gives the message back when the queue is full
    /// or the worker has shut down.
    pub fn try_enqueue(&self, message: PendingMessage) -> Result<(), PendingMessage> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(m) | mpsc::error::TrySendError::Closed(m) => m,
        })
    }

    /// Messages currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Stops the consumer. Messages still queued are dropped and their
    /// campaigns stopped.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

struct Consumer {
    account_id: Uuid,
    receiver: mpsc::Receiver<PendingMessage>,
    limiter: Arc<SlidingWindowLimiter>,
    delivery: Arc<Delivery>,
    backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Consumer {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let message = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                next = self.receiver.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };
            if !self.process(message).await {
                break;
            }
        }
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            abandon(&message);
        }
        info!(business_account_id = %self.account_id, "Business worker stopped");
    }

    /// Returns false when shutdown interrupted the wait for a send slot.
    async fn process(&mut self, message: PendingMessage) -> bool {
        loop {
            if message.campaign.is_stopped() {
                metrics::counter!("dispatch.discarded").increment(1);
                debug!(
                    campaign_id = %message.campaign.id(),
                    contact_id = %message.contact.id,
                    "Campaign stopped; message discarded"
                );
                message.campaign.complete_one();
                return true;
            }

            if self.limiter.try_acquire() {
                let delivery = self.delivery.clone();
                tokio::spawn(async move {
                    delivery.deliver(&message).await;
                    message.campaign.complete_one();
                });
                return true;
            }

            metrics::counter!("dispatch.rate_limited").increment(1);
            let wait = match self.limiter.retry_after() {
                d if d.is_zero() => self.backoff,
                d => d.min(self.backoff),
            };
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    abandon(&message);
                    return false;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Resolves a message that will never be sent. The campaign is stopped
/// first so its finalize step keeps the persisted status instead of
/// finishing a partly dispatched campaign.
fn abandon(message: &PendingMessage) {
    message.campaign.stop();
    message.campaign.complete_one();
}
