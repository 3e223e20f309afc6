//! Cursor-based contact pagination feeding the business workers.

use crate::running::RunningCampaign;
use crate::store::CampaignStore;
use crate::worker::PendingMessage;
use campaign_core::CampaignResult;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one batch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// No contact left past the cursor.
    Exhausted,
    /// Every fetched contact was handed to the worker.
    Continue { handed_off: usize },
    /// The worker queue filled up part-way; retry after a delay.
    Backpressure { handed_off: usize },
}

impl BatchOutcome {
    pub fn work_remains(&self) -> bool {
        !matches!(self, BatchOutcome::Exhausted)
    }

    pub fn handed_off(&self) -> usize {
        match self {
            BatchOutcome::Exhausted => 0,
            BatchOutcome::Continue { handed_off } | BatchOutcome::Backpressure { handed_off } => {
                *handed_off
            }
        }
    }
}

/// Fetches the next contacts past the campaign's cursor and hands them to
/// its worker without blocking.
///
/// The cursor moves to the last contact actually handed off, in memory
/// first and then in the store, so a contact is never offered twice. A
/// cursor write failure is returned after the in-memory cursor moved.
pub async fn next_contacts_batch(
    store: &dyn CampaignStore,
    campaign: &Arc<RunningCampaign>,
    batch_size: usize,
) -> CampaignResult<BatchOutcome> {
    if campaign.is_stopped() {
        return Ok(BatchOutcome::Exhausted);
    }

    let snapshot = campaign.campaign();
    let contacts = store
        .contacts_after(
            snapshot.organization_id,
            &snapshot.contact_list_ids,
            campaign.cursor(),
            batch_size.max(1),
        )
        .await?;
    if contacts.is_empty() {
        debug!(campaign_id = %campaign.id(), "No contacts past cursor");
        return Ok(BatchOutcome::Exhausted);
    }

    let worker = campaign.worker();
    let fetched = contacts.len();
    let mut last_handed_off = None;
    let mut handed_off = 0;
    let mut rejected = false;
    for contact in contacts {
        let contact_id = contact.id;
        campaign.track();
        let message = PendingMessage {
            campaign: campaign.clone(),
            contact,
        };
        if worker.try_enqueue(message).is_err() {
            campaign.untrack();
            rejected = true;
            break;
        }
        campaign.record_offered();
        last_handed_off = Some(contact_id);
        handed_off += 1;
    }

    if let Some(last) = last_handed_off {
        campaign.advance_cursor(last);
        store.save_cursor(campaign.id(), last).await?;
    }

    if rejected {
        warn!(
            campaign_id = %campaign.id(),
            business_account_id = %worker.account_id(),
            handed_off,
            fetched,
            "Worker queue full; batch will be retried"
        );
        Ok(BatchOutcome::Backpressure { handed_off })
    } else {
        debug!(campaign_id = %campaign.id(), handed_off, "Batch handed off");
        Ok(BatchOutcome::Continue { handed_off })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCampaignStore;
    use crate::test_support::{account, campaign, contact};
    use crate::worker::BusinessWorker;
    use campaign_core::config::DispatchConfig;
    use campaign_core::types::CampaignStatus;
    use campaign_core::CampaignError;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn setup(
        contacts: u128,
        queue_capacity: usize,
    ) -> (
        Arc<InMemoryCampaignStore>,
        Arc<RunningCampaign>,
        mpsc::Receiver<PendingMessage>,
    ) {
        let store = Arc::new(InMemoryCampaignStore::new());
        store.insert_contacts((1..=contacts).map(contact));
        let c = campaign(1, CampaignStatus::Running);
        store.insert_campaign(c.clone());
        let config = DispatchConfig {
            worker_queue_capacity: queue_capacity,
            ..DispatchConfig::default()
        };
        let (worker, rx) = BusinessWorker::unstarted(account(), &config);
        (store, Arc::new(RunningCampaign::new(c, worker)), rx)
    }

    #[tokio::test]
    async fn test_pages_until_exhausted() {
        let (store, c, _rx) = setup(25, 100);

        let first = next_contacts_batch(store.as_ref(), &c, 10).await.unwrap();
        assert_eq!(first, BatchOutcome::Continue { handed_off: 10 });
        let second = next_contacts_batch(store.as_ref(), &c, 10).await.unwrap();
        assert_eq!(second.handed_off(), 10);
        let third = next_contacts_batch(store.as_ref(), &c, 10).await.unwrap();
        assert_eq!(third.handed_off(), 5);
        assert_eq!(
            next_contacts_batch(store.as_ref(), &c, 10).await.unwrap(),
            BatchOutcome::Exhausted
        );
        assert_eq!(
            next_contacts_batch(store.as_ref(), &c, 10).await.unwrap(),
            BatchOutcome::Exhausted
        );

        let writes = store.cursor_writes(c.id());
        assert_eq!(
            writes,
            vec![Uuid::from_u128(10), Uuid::from_u128(20), Uuid::from_u128(25)]
        );
        assert!(writes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(c.pending(), 25);
        assert_eq!(c.offered(), 25);
        assert_eq!(
            store.campaign(c.id()).unwrap().last_contact_sent,
            Some(Uuid::from_u128(25))
        );
    }

    #[tokio::test]
    async fn test_full_queue_reports_backpressure_and_keeps_cursor() {
        let (store, c, mut rx) = setup(10, 4);

        let outcome = next_contacts_batch(store.as_ref(), &c, 10).await.unwrap();
        assert_eq!(outcome, BatchOutcome::Backpressure { handed_off: 4 });
        assert!(outcome.work_remains());
        assert_eq!(c.pending(), 4);
        assert_eq!(c.cursor(), Some(Uuid::from_u128(4)));

        while rx.try_recv().is_ok() {}
        let outcome = next_contacts_batch(store.as_ref(), &c, 10).await.unwrap();
        assert_eq!(outcome, BatchOutcome::Backpressure { handed_off: 4 });
        assert_eq!(c.cursor(), Some(Uuid::from_u128(8)));
    }

    #[tokio::test]
    async fn test_resumes_from_persisted_cursor() {
        let store = Arc::new(InMemoryCampaignStore::new());
        store.insert_contacts((1..=5).map(contact));
        let mut snapshot = campaign(1, CampaignStatus::Running);
        snapshot.last_contact_sent = Some(Uuid::from_u128(3));
        let (worker, mut rx) = BusinessWorker::unstarted(account(), &DispatchConfig::default());
        store.insert_campaign(snapshot.clone());
        let c = Arc::new(RunningCampaign::new(snapshot, worker));

        let outcome = next_contacts_batch(store.as_ref(), &c, 100).await.unwrap();
        assert_eq!(outcome.handed_off(), 2);
        assert_eq!(rx.try_recv().unwrap().contact.id, Uuid::from_u128(4));
    }

    #[tokio::test]
    async fn test_stopped_campaign_is_not_fetched() {
        let (store, c, _rx) = setup(5, 100);
        c.stop();
        let outcome = next_contacts_batch(store.as_ref(), &c, 10).await.unwrap();
        assert_eq!(outcome, BatchOutcome::Exhausted);
        assert!(store.cursor_writes(c.id()).is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let (store, c, _rx) = setup(5, 100);
        store.set_unavailable(true);
        let result = next_contacts_batch(store.as_ref(), &c, 10).await;
        assert!(matches!(result, Err(CampaignError::Storage(_))));
        assert_eq!(c.pending(), 0);
    }
}
