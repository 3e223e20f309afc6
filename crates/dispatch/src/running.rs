//! In-memory state of a campaign the manager is driving.

use crate::worker::BusinessWorker;
use campaign_core::event_bus::ProgressEvent;
use campaign_core::types::{Campaign, CampaignStatus};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// A campaign registered with the manager.
///
/// Counters are updated by delivery tasks running concurrently on the
/// account's worker. `pending` tracks messages handed to the worker that
/// have not resolved yet; finalize waits for it to reach zero.
pub struct RunningCampaign {
    campaign: Campaign,
    worker: Arc<BusinessWorker>,
    cursor: Mutex<Option<Uuid>>,
    sent: AtomicU64,
    error_count: AtomicU64,
    offered: AtomicU64,
    stopped: AtomicBool,
    fatal: AtomicBool,
    finalizing: AtomicBool,
    pending: AtomicUsize,
    drained: Notify,
}

impl RunningCampaign {
    pub fn new(campaign: Campaign, worker: Arc<BusinessWorker>) -> Self {
        let cursor = campaign.last_contact_sent;
        Self {
            campaign,
            worker,
            cursor: Mutex::new(cursor),
            sent: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            offered: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            finalizing: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.campaign.id
    }

    /// Snapshot taken when the scanner picked the campaign up.
    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn worker(&self) -> &Arc<BusinessWorker> {
        &self.worker
    }

    pub fn cursor(&self) -> Option<Uuid> {
        *self.cursor.lock()
    }

    /// Moves the cursor forward. Never moves it backwards.
    pub fn advance_cursor(&self, to: Uuid) -> bool {
        let mut cursor = self.cursor.lock();
        if cursor.is_some_and(|current| current >= to) {
            return false;
        }
        *cursor = Some(to);
        true
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }

    /// Contacts handed to the worker so far.
    pub fn offered(&self) -> u64 {
        self.offered.load(Ordering::SeqCst)
    }

    pub fn record_sent(&self) -> u64 {
        self.sent.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_error(&self) -> u64 {
        self.error_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Sets the stop flag. Returns false if it was already set.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Marks the campaign as unable to produce messages and stops it.
    /// Returns true only for the first caller.
    pub fn mark_fatal(&self) -> bool {
        let first = !self.fatal.swap(true, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        first
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// Claims the finalize step. Returns true only once.
    pub fn begin_finalize(&self) -> bool {
        !self.finalizing.swap(true, Ordering::SeqCst)
    }

    /// Registers a message about to be handed to the worker.
    pub fn track(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Undoes [`track`](Self::track) for a message the worker refused.
    pub fn untrack(&self) {
        self.resolve();
    }

    /// Marks a handed-off message as resolved (sent, failed or discarded).
    pub fn complete_one(&self) {
        self.resolve();
    }

    /// Counts a contact as handed off for good.
    pub fn record_offered(&self) {
        self.offered.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolves once no handed-off message is outstanding.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn progress(&self, status: CampaignStatus) -> ProgressEvent {
        ProgressEvent::new(self.id(), self.sent(), self.error_count(), status)
    }

    fn resolve(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "pending underflow");
        if previous == 1 {
            self.drained.notify_waiters();
        }
    }
}
