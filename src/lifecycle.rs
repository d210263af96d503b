//! Client-side view of a transfer's progress.
//!
//! A request carries no transaction id, so `SENT` cannot be acknowledged.
//! Settlement is correlated purely by `transaction_id` as each side's feed
//! republishes it; an event that never arrives leaves the transfer in flight
//! forever.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::stream::context::Role;
use crate::stream::feed::{EventFeed, SubscriptionId};
use crate::stream::proto::{Transaction, TransactionRequest};

/// Which sides have republished a settlement event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sightings {
    pub originator: bool,
    pub beneficiary: bool,
}

impl Sightings {
    pub fn both(&self) -> bool {
        self.originator && self.beneficiary
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    /// Validated but nothing dispatched yet.
    Formed,
    /// Dispatched over the originator's connection; no settlement seen.
    Sent,
    /// At least one side republished a matching transaction.
    Observed(Sightings),
}

#[derive(Debug, Default)]
struct TrackerState {
    sent: Vec<TransactionRequest>,
    sightings: Vec<(String, Sightings)>,
}

/// Records dispatched requests and per-side settlement sightings.
#[derive(Clone, Debug, Default)]
pub struct TransferTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, request: TransactionRequest) {
        self.lock().sent.push(request);
    }

    /// Requests dispatched so far, oldest first.
    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.lock().sent.clone()
    }

    pub fn observe(&self, role: Role, transaction: &Transaction) {
        let mut state = self.lock();
        let index = match state
            .sightings
            .iter()
            .position(|(id, _)| *id == transaction.transaction_id)
        {
            Some(index) => index,
            None => {
                state
                    .sightings
                    .push((transaction.transaction_id.clone(), Sightings::default()));
                state.sightings.len() - 1
            }
        };

        let sightings = &mut state.sightings[index].1;
        match role {
            Role::Originator => sightings.originator = true,
            Role::Beneficiary => sightings.beneficiary = true,
        }
        debug!(
            event = "transfer_observed",
            transaction_id = %transaction.transaction_id,
            role = %role,
            settled_both_sides = sightings.both()
        );
    }

    /// Feeds `role`'s settlement events into the tracker.
    pub fn watch(&self, role: Role, transactions: &EventFeed<Transaction>) -> SubscriptionId {
        let tracker = self.clone();
        transactions.subscribe(move |transaction: &Transaction| tracker.observe(role, transaction))
    }

    pub fn state(&self, transaction_id: &str) -> TransferState {
        let state = self.lock();
        if let Some((_, sightings)) = state.sightings.iter().find(|(id, _)| id == transaction_id) {
            return TransferState::Observed(*sightings);
        }
        if state.sent.is_empty() {
            TransferState::Formed
        } else {
            TransferState::Sent
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
