//! Persistence seam.
//!
//! The hub never owns durable storage; it talks to a [`SpotStore`] that saves
//! spot rows and appends audit entries. [`MemoryStore`] is the in-process
//! implementation used by the binary and the tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::spot::{LogEntry, LogRecord, ParkingSpot, SpotId, SpotStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("write rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SpotStore: Send + Sync {
    /// Every stored spot, used to seed the hub's view at startup.
    async fn load_spots(&self) -> Result<Vec<ParkingSpot>, PersistenceError>;

    /// Upserts the row for `id`.
    async fn save_spot(
        &self,
        id: SpotId,
        status: SpotStatus,
        user_id: Option<UserId>,
    ) -> Result<(), PersistenceError>;

    async fn append_log(&self, entry: LogEntry) -> Result<(), PersistenceError>;

    /// Audit trail, newest first.
    async fn logs(&self) -> Result<Vec<LogRecord>, PersistenceError>;
}

#[derive(Default)]
struct MemoryState {
    spots: BTreeMap<SpotId, ParkingSpot>,
    logs: Vec<LogRecord>,
    next_log_id: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with spots `1..=count`, all vacant.
    pub fn with_vacant_spots(count: u32) -> Self {
        let spots = (1..=SpotId::from(count))
            .map(|id| (id, ParkingSpot::vacant(id)))
            .collect();
        Self {
            state: Mutex::new(MemoryState {
                spots,
                ..MemoryState::default()
            }),
        }
    }
}

#[async_trait]
impl SpotStore for MemoryStore {
    async fn load_spots(&self) -> Result<Vec<ParkingSpot>, PersistenceError> {
        Ok(self.state.lock().await.spots.values().cloned().collect())
    }

    async fn save_spot(
        &self,
        id: SpotId,
        status: SpotStatus,
        user_id: Option<UserId>,
    ) -> Result<(), PersistenceError> {
        self.state
            .lock()
            .await
            .spots
            .insert(id, ParkingSpot { id, status, user_id });
        Ok(())
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        state.next_log_id += 1;
        let id = state.next_log_id;
        state.logs.push(LogRecord { id, entry });
        Ok(())
    }

    async fn logs(&self) -> Result<Vec<LogRecord>, PersistenceError> {
        Ok(self.state.lock().await.logs.iter().rev().cloned().collect())
    }
}
