//! Registries of running campaigns and business workers.
//!
//! Lookups take the shared lock, create/delete take the exclusive lock.
//! Neither lock is ever held across an `.await`.

use crate::running::RunningCampaign;
use crate::worker::BusinessWorker;
use campaign_core::CampaignResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
pub struct CampaignRegistry {
    inner: RwLock<HashMap<Uuid, Arc<RunningCampaign>>>,
}

impl CampaignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, campaign_id: Uuid) -> Option<Arc<RunningCampaign>> {
        self.inner.read().get(&campaign_id).cloned()
    }

    pub fn contains(&self, campaign_id: Uuid) -> bool {
        self.inner.read().contains_key(&campaign_id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.inner.read().keys().copied().collect()
    }

    /// Registers the campaign unless its id is already tracked.
    pub fn insert_if_absent(&self, campaign: Arc<RunningCampaign>) -> bool {
        let mut inner = self.inner.write();
        if inner.contains_key(&campaign.id()) {
            return false;
        }
        inner.insert(campaign.id(), campaign);
        true
    }

    pub fn remove(&self, campaign_id: Uuid) -> Option<Arc<RunningCampaign>> {
        self.inner.write().remove(&campaign_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[derive(Default)]
pub struct WorkerRegistry {
    inner: RwLock<HashMap<Uuid, Arc<BusinessWorker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: Uuid) -> Option<Arc<BusinessWorker>> {
        self.inner.read().get(&account_id).cloned()
    }

    /// Returns the account's worker, creating it with `create` on first use.
    /// `create` runs under the write lock, so at most one worker exists per
    /// account.
    pub fn get_or_try_insert_with<F>(&self, account_id: Uuid, create: F) -> CampaignResult<Arc<BusinessWorker>>
    where
        F: FnOnce() -> CampaignResult<Arc<BusinessWorker>>,
    {
        if let Some(worker) = self.get(account_id) {
            return Ok(worker);
        }
        let mut inner = self.inner.write();
        if let Some(worker) = inner.get(&account_id) {
            return Ok(worker.clone());
        }
        let worker = create()?;
        inner.insert(account_id, worker.clone());
        Ok(worker)
    }

    /// Removes and returns every worker.
    pub fn drain(&self) -> Vec<Arc<BusinessWorker>> {
        self.inner.write().drain().map(|(_, w)| w).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
