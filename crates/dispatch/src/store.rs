//! Persistence seam for the dispatch engine.
//!
//! The engine only ever talks to [`CampaignStore`]. [`InMemoryCampaignStore`]
//! backs the binary's seed mode and the tests; a relational implementation
//! plugs in behind the same trait.

use async_trait::async_trait;
use campaign_core::lifecycle;
use campaign_core::types::{BusinessAccount, Campaign, CampaignStatus, Contact, Message};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Moves every scheduled campaign whose start time has passed to
    /// running. Returns the promoted ids.
    async fn promote_due_campaigns(&self, now: DateTime<Utc>) -> CampaignResult<Vec<Uuid>>;

    /// Running campaigns, excluding `exclude`.
    async fn running_campaigns(&self, exclude: &[Uuid]) -> CampaignResult<Vec<Campaign>>;

    async fn campaign_status(&self, campaign_id: Uuid) -> CampaignResult<CampaignStatus>;

    async fn business_account(&self, account_id: Uuid) -> CampaignResult<Option<BusinessAccount>>;

    /// Up to `limit` distinct contacts of the organization that belong to any
    /// of `list_ids` (all contacts when empty), ordered by ascending id and
    /// strictly greater than `after`.
    async fn contacts_after(
        &self,
        organization_id: Uuid,
        list_ids: &[Uuid],
        after: Option<Uuid>,
        limit: usize,
    ) -> CampaignResult<Vec<Contact>>;

    async fn save_cursor(&self, campaign_id: Uuid, last_contact_sent: Uuid) -> CampaignResult<()>;

    /// Compare-and-set status change. `Ok(false)` when the campaign is no
    /// longer in `from`.
    async fn transition_status(
        &self,
        campaign_id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> CampaignResult<bool>;

    async fn insert_message(&self, message: Message) -> CampaignResult<()>;
}

/// Seed file layout accepted by [`InMemoryCampaignStore::from_seed`].
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub business_accounts: Vec<BusinessAccount>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

/// Thread-safe in-memory store backed by DashMap.
pub struct InMemoryCampaignStore {
    campaigns: DashMap<Uuid, Campaign>,
    accounts: DashMap<Uuid, BusinessAccount>,
    contacts: RwLock<BTreeMap<Uuid, Contact>>,
    messages: Mutex<Vec<Message>>,
    cursor_writes: DashMap<Uuid, Vec<Uuid>>,
    unavailable: AtomicBool,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self {
            campaigns: DashMap::new(),
            accounts: DashMap::new(),
            contacts: RwLock::new(BTreeMap::new()),
            messages: Mutex::new(Vec::new()),
            cursor_writes: DashMap::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        for account in seed.business_accounts {
            store.insert_account(account);
        }
        for campaign in seed.campaigns {
            store.insert_campaign(campaign);
        }
        for contact in seed.contacts {
            store.insert_contact(contact);
        }
        info!(
            campaigns = store.campaigns.len(),
            accounts = store.accounts.len(),
            contacts = store.contacts.read().len(),
            "Campaign store seeded (in-memory)"
        );
        store
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id, campaign);
    }

    pub fn insert_account(&self, account: BusinessAccount) {
        self.accounts.insert(account.id, account);
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.contacts.write().insert(contact.id, contact);
    }

    pub fn insert_contacts(&self, contacts: impl IntoIterator<Item = Contact>) {
        let mut guard = self.contacts.write();
        for contact in contacts {
            guard.insert(contact.id, contact);
        }
    }

    /// Status change as the API layer performs it (pause, resume, cancel).
    pub fn set_status(&self, campaign_id: Uuid, status: CampaignStatus) -> CampaignResult<()> {
        let mut entry = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {campaign_id}")))?;
        if entry.status != status && !lifecycle::can_transition(entry.status, status) {
            return Err(CampaignError::InvalidTransition {
                campaign_id,
                from: entry.status,
                to: status,
            });
        }
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn campaign(&self, campaign_id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&campaign_id).map(|r| r.value().clone())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn messages_for(&self, campaign_id: Uuid) -> Vec<Message> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    /// Every persisted cursor value for the campaign, in write order.
    pub fn cursor_writes(&self, campaign_id: Uuid) -> Vec<Uuid> {
        self.cursor_writes
            .get(&campaign_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Simulates a database outage: every read fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> CampaignResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CampaignError::Storage("campaign store unavailable".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn promote_due_campaigns(&self, now: DateTime<Utc>) -> CampaignResult<Vec<Uuid>> {
        self.check_available()?;
        let mut promoted = Vec::new();
        for mut entry in self.campaigns.iter_mut() {
            let due = entry.status == CampaignStatus::Scheduled
                && entry.scheduled_at.is_some_and(|at| at <= now);
            if due {
                entry.status = CampaignStatus::Running;
                entry.updated_at = now;
                promoted.push(entry.id);
            }
        }
        Ok(promoted)
    }

    async fn running_campaigns(&self, exclude: &[Uuid]) -> CampaignResult<Vec<Campaign>> {
        self.check_available()?;
        let mut running: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|r| r.status == CampaignStatus::Running && !exclude.contains(&r.id))
            .map(|r| r.value().clone())
            .collect();
        running.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(running)
    }

    async fn campaign_status(&self, campaign_id: Uuid) -> CampaignResult<CampaignStatus> {
        self.check_available()?;
        self.campaigns
            .get(&campaign_id)
            .map(|r| r.status)
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {campaign_id}")))
    }

    async fn business_account(&self, account_id: Uuid) -> CampaignResult<Option<BusinessAccount>> {
        self.check_available()?;
        Ok(self.accounts.get(&account_id).map(|r| r.value().clone()))
    }

    async fn contacts_after(
        &self,
        organization_id: Uuid,
        list_ids: &[Uuid],
        after: Option<Uuid>,
        limit: usize,
    ) -> CampaignResult<Vec<Contact>> {
        self.check_available()?;
        let contacts = self.contacts.read();
        let in_scope = |c: &&Contact| {
            c.organization_id == organization_id
                && (list_ids.is_empty() || c.list_ids.iter().any(|l| list_ids.contains(l)))
        };
        let batch: Vec<Contact> = match after {
            Some(cursor) => contacts
                .range((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded))
                .map(|(_, c)| c)
                .filter(in_scope)
                .take(limit)
                .cloned()
                .collect(),
            None => contacts.values().filter(in_scope).take(limit).cloned().collect(),
        };
        Ok(batch)
    }

    async fn save_cursor(&self, campaign_id: Uuid, last_contact_sent: Uuid) -> CampaignResult<()> {
        self.check_available()?;
        let mut entry = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {campaign_id}")))?;
        entry.last_contact_sent = Some(last_contact_sent);
        entry.updated_at = Utc::now();
        drop(entry);
        self.cursor_writes
            .entry(campaign_id)
            .or_default()
            .push(last_contact_sent);
        debug!(campaign_id = %campaign_id, cursor = %last_contact_sent, "Cursor persisted");
        Ok(())
    }

    async fn transition_status(
        &self,
        campaign_id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> CampaignResult<bool> {
        self.check_available()?;
        if !lifecycle::can_transition(from, to) {
            return Err(CampaignError::InvalidTransition {
                campaign_id,
                from,
                to,
            });
        }
        let mut entry = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {campaign_id}")))?;
        if entry.status != from {
            return Ok(false);
        }
        entry.status = to;
        entry.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_message(&self, message: Message) -> CampaignResult<()> {
        self.check_available()?;
        self.messages.lock().push(message);
        Ok(())
    }
}
