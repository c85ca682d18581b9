//! Single owner of parking-spot status.
//!
//! Every write goes through [`StateAuthority::update_spot`], which holds a
//! per-spot lock across persist, apply, audit and broadcast. Updates to the
//! same spot therefore land (and are announced) in arrival order, while
//! updates to different spots proceed independently.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    broadcast::Broadcaster,
    message::OutboundMessage,
    spot::{LogEntry, ParkingSpot, SpotId, SpotStatus, UserId},
    store::{PersistenceError, SpotStore},
};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to persist spot {spot_id}: {source}")]
    Persistence {
        spot_id: SpotId,
        #[source]
        source: PersistenceError,
    },
}

pub struct StateAuthority {
    spots: RwLock<BTreeMap<SpotId, ParkingSpot>>,
    spot_locks: Mutex<HashMap<SpotId, Arc<Mutex<()>>>>,
    store: Arc<dyn SpotStore>,
    broadcaster: Broadcaster,
}

impl StateAuthority {
    /// Builds the authority from whatever the store currently holds.
    pub async fn load(
        store: Arc<dyn SpotStore>,
        broadcaster: Broadcaster,
    ) -> Result<Self, PersistenceError> {
        let spots: BTreeMap<_, _> = store
            .load_spots()
            .await?
            .into_iter()
            .map(|spot| (spot.id, spot))
            .collect();
        info!(spots = spots.len(), "loaded parking spots");

        Ok(Self {
            spots: RwLock::new(spots),
            spot_locks: Mutex::new(HashMap::new()),
            store,
            broadcaster,
        })
    }

    /// Point-in-time copy of every known spot, ordered by id.
    pub async fn get_all(&self) -> Vec<ParkingSpot> {
        self.spots.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: SpotId) -> Option<ParkingSpot> {
        self.spots.read().await.get(&id).cloned()
    }

    /// Number of vacant spots, counted from the live map on every call.
    pub async fn available_count(&self) -> usize {
        self.spots
            .read()
            .await
            .values()
            .filter(|spot| spot.status == SpotStatus::Vacant)
            .count()
    }

    /// Records a new status for `id`, creating the spot if it is unknown.
    ///
    /// The store write must succeed before anything becomes visible; on
    /// failure the in-memory view is untouched and nothing is broadcast. A
    /// failed audit append is only logged. Identical repeated updates are
    /// each persisted, audited and broadcast.
    pub async fn update_spot(
        &self,
        id: SpotId,
        status: SpotStatus,
        user_id: Option<UserId>,
    ) -> Result<(), UpdateError> {
        let lock = self.spot_lock(id).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_update(id, status, user_id).await
        };
        self.release_spot_lock(id, lock).await;
        result
    }

    async fn apply_update(
        &self,
        id: SpotId,
        status: SpotStatus,
        user_id: Option<UserId>,
    ) -> Result<(), UpdateError> {
        self.store
            .save_spot(id, status, user_id)
            .await
            .map_err(|source| UpdateError::Persistence {
                spot_id: id,
                source,
            })?;

        self.spots.write().await.insert(
            id,
            ParkingSpot {
                id,
                status,
                user_id,
            },
        );

        if let Err(err) = self
            .store
            .append_log(LogEntry::spot(id, user_id, status))
            .await
        {
            warn!(spot = id, error = %err, "failed to record spot log entry");
        }

        let delivered = self
            .broadcaster
            .notify(&OutboundMessage::SpotStatusChange { spot_id: id, status })
            .await;
        info!(spot = id, ?status, delivered, "spot status updated");
        Ok(())
    }

    async fn spot_lock(&self, id: SpotId) -> Arc<Mutex<()>> {
        let mut locks = self.spot_locks.lock().await;
        Arc::clone(locks.entry(id).or_default())
    }

    // Clones are only handed out under the map lock, so a count of two (map
    // plus ours) means no other update for this spot is queued.
    async fn release_spot_lock(&self, id: SpotId, lock: Arc<Mutex<()>>) {
        let mut locks = self.spot_locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&id);
        }
    }
}
