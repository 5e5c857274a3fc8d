//! Process-local store, used when no database is configured and in tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use crate::tournament::Tournament;

use super::{StoreError, TournamentStore};

#[derive(Default)]
pub struct MemoryStore {
    tournaments: Mutex<HashMap<Uuid, Tournament>>,
    /// Number of upcoming `save` calls that fail
    failures_left: AtomicU32,
    /// Number of upcoming `load_all` calls that fail
    load_failures_left: AtomicU32,
}

/// Spend one unit of a failure budget, if any is left
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose next `failures` saves report `Unavailable`
    #[cfg(test)]
    pub(crate) fn failing(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    /// Make the next `failures` loads report `Unavailable`
    #[cfg(test)]
    pub(crate) fn fail_next_loads(&self, failures: u32) {
        self.load_failures_left.store(failures, Ordering::SeqCst);
    }

    pub fn get(&self, id: Uuid) -> Option<Tournament> {
        self.tournaments.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tournaments.lock().len()
    }
}

#[async_trait]
impl TournamentStore for MemoryStore {
    async fn save(&self, tournament: &Tournament) -> Result<(), StoreError> {
        if take_failure(&self.failures_left) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }

        self.tournaments
            .lock()
            .insert(tournament.id, tournament.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Tournament>, StoreError> {
        if take_failure(&self.load_failures_left) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(self.tournaments.lock().values().cloned().collect())
    }
}
