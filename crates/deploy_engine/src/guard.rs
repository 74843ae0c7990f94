//! Single-slot request lifecycle tracking.
//!
//! Each logical slot (a dropdown, a side panel, the running job) owns at most
//! one live request. Starting a new request in a slot cancels the previous one,
//! and a completion is only delivered while its ticket is still the slot's
//! latest.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use deploy_logging::deploy_trace;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct SlotState {
    epoch: u64,
    token: CancellationToken,
}

/// Proof that a request was started in a slot at a given epoch.
#[derive(Debug, Clone)]
pub struct SlotTicket<K> {
    slot: K,
    epoch: u64,
    token: CancellationToken,
}

impl<K> SlotTicket<K> {
    pub fn slot(&self) -> &K {
        &self.slot
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Why a guarded request produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<E> {
    /// Superseded or explicitly cancelled. Not an error condition.
    Cancelled,
    Failed(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionFetch<T> {
    /// The response belongs to the latest selection.
    Applied(T),
    /// The selection was emptied; nothing was requested.
    Cleared,
    /// A newer selection or a cancellation overtook this request.
    Superseded,
}

#[derive(Debug)]
pub struct RequestGuard<K: Eq + Hash + Clone> {
    slots: Mutex<HashMap<K, SlotState>>,
}

impl<K: Eq + Hash + Clone> Default for RequestGuard<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> RequestGuard<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, SlotState>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels whatever the slot was doing and hands out a fresh ticket.
    pub fn begin(&self, slot: K) -> SlotTicket<K> {
        let mut slots = self.slots();
        let state = slots.entry(slot.clone()).or_default();
        state.token.cancel();
        state.epoch += 1;
        state.token = CancellationToken::new();
        deploy_trace!("Slot {:?} now at epoch {}", slot, state.epoch);
        SlotTicket {
            slot,
            epoch: state.epoch,
            token: state.token.clone(),
        }
    }

    pub fn is_current(&self, ticket: &SlotTicket<K>) -> bool {
        self.slots()
            .get(&ticket.slot)
            .is_some_and(|state| state.epoch == ticket.epoch && !state.token.is_cancelled())
    }

    pub fn cancel(&self, slot: &K) {
        if let Some(state) = self.slots().get(slot) {
            state.token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        for state in self.slots().values() {
            state.token.cancel();
        }
    }

    /// Runs `request` under `ticket`, resolving to [`Guarded::Cancelled`] as soon
    /// as the slot moves on.
    pub async fn run<T, E, F>(&self, ticket: &SlotTicket<K>, request: F) -> Result<T, Guarded<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => return Err(Guarded::Cancelled),
            outcome = request => outcome,
        };
        if !self.is_current(ticket) {
            return Err(Guarded::Cancelled);
        }
        outcome.map_err(Guarded::Failed)
    }

    /// Fetches data that depends on a selection value.
    ///
    /// The slot is updated immediately: an empty key cancels it without
    /// touching the network, any other key starts a new request. The returned
    /// future can be spawned; stale completions resolve to
    /// [`SelectionFetch::Superseded`], never to errors.
    pub fn fetch_for_selection<T, E, F, Fut>(
        self: &Arc<Self>,
        slot: K,
        key: Option<&str>,
        fetch: F,
    ) -> impl Future<Output = Result<SelectionFetch<T>, E>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = Arc::clone(self);
        let started = match key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => Some((guard.begin(slot), fetch(key.to_string()))),
            None => {
                guard.cancel(&slot);
                None
            }
        };
        async move {
            let Some((ticket, request)) = started else {
                return Ok(SelectionFetch::Cleared);
            };
            match guard.run(&ticket, request).await {
                Ok(value) => Ok(SelectionFetch::Applied(value)),
                Err(Guarded::Cancelled) => Ok(SelectionFetch::Superseded),
                Err(Guarded::Failed(err)) => Err(err),
            }
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for RequestGuard<K> {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);
        for state in slots.values() {
            state.token.cancel();
        }
    }
}
