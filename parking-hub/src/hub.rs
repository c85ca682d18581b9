//! The hub object: owns connections, spot state and the barrier, and routes
//! device frames to them.
//!
//! Routing never waits for the routed work. Each connection gets two ordered
//! lanes, one for spot updates and one for barrier commands, each drained by
//! its own task; count requests are answered on a spawned task. A device's
//! updates reach the authority in the order it sent them, and a slow store
//! write does not hold up that device's barrier commands or count requests.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::{
    authority::StateAuthority,
    barrier::BarrierController,
    broadcast::Broadcaster,
    config::HubConfig,
    message::{BarrierAction, InboundMessage, OutboundMessage, decode_inbound},
    registry::{ConnectError, ConnectionId, ConnectionRegistry, DeviceConnection},
    spot::{SpotId, SpotStatus},
    store::{PersistenceError, SpotStore},
};

/// Owns every piece of shared hub state: live connections, spot state and
/// the barrier. Created once at startup and cheap to clone into handlers.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    broadcaster: Broadcaster,
    authority: StateAuthority,
    barrier: BarrierController,
    store: Arc<dyn SpotStore>,
    lanes: Mutex<HashMap<ConnectionId, InboundLanes>>,
}

/// Ordered work queues for one connection. Dropping the senders lets the
/// lane tasks drain what is queued and exit.
#[derive(Clone)]
struct InboundLanes {
    spots: mpsc::Sender<(SpotId, SpotStatus)>,
    barrier: mpsc::Sender<BarrierAction>,
}

impl Hub {
    pub async fn start(
        config: HubConfig,
        store: Arc<dyn SpotStore>,
    ) -> Result<Self, PersistenceError> {
        let broadcaster = Broadcaster::new(Arc::new(ConnectionRegistry::new()));
        let authority = StateAuthority::load(Arc::clone(&store), broadcaster.clone()).await?;
        let barrier = BarrierController::new(
            Arc::clone(&store),
            broadcaster.clone(),
            config.auto_close_after,
        );

        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                broadcaster,
                authority,
                barrier,
                store,
                lanes: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn authority(&self) -> &StateAuthority {
        &self.inner.authority
    }

    pub fn barrier(&self) -> &BarrierController {
        &self.inner.barrier
    }

    pub fn store(&self) -> &Arc<dyn SpotStore> {
        &self.inner.store
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.broadcaster.registry().len().await
    }

    /// Registers a new device and returns its id plus the queue of encoded
    /// frames to write to it. The first frame is always `initial_data`.
    pub async fn connect(&self) -> Result<(ConnectionId, mpsc::Receiver<String>), ConnectError> {
        let (tx, rx) = mpsc::channel(self.inner.config.outbound_buffer);
        let id = self.inner.broadcaster.registry().next_id();
        self.inner
            .broadcaster
            .connect(DeviceConnection::new(id, tx), self.inner.authority.get_all())
            .await?;
        self.open_lanes(id).await;
        info!(connection = id, "device connected");
        Ok((id, rx))
    }

    /// Unregisters `id` and closes its lanes. Work already queued on the lanes
    /// still runs.
    pub async fn disconnect(&self, id: ConnectionId) {
        let had_lanes = self.inner.lanes.lock().await.remove(&id).is_some();
        let registered = self.inner.broadcaster.registry().unregister(id).await;
        if had_lanes || registered {
            info!(connection = id, "device disconnected");
        }
    }

    /// Decodes one frame from connection `id` and hands it to the matching
    /// lane or task.
    ///
    /// Bad frames are logged and dropped; the connection stays open. Device
    /// updates have no caller to report to, so persistence failures are only
    /// logged.
    pub async fn handle_inbound(&self, id: ConnectionId, payload: &[u8]) {
        let message = match decode_inbound(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(connection = id, error = %err, "dropping inbound message");
                return;
            }
        };
        debug!(connection = id, ?message, "inbound message");

        match message {
            InboundMessage::SpotUpdate {
                spot_id,
                is_occupied,
            } => {
                let Some(lanes) = self.lanes(id).await else {
                    warn!(connection = id, "spot update from unknown connection");
                    return;
                };
                let status = SpotStatus::from_occupied(is_occupied);
                if lanes.spots.send((spot_id, status)).await.is_err() {
                    debug!(connection = id, "spot lane closed");
                }
            }
            InboundMessage::RequestCount => {
                let hub = self.clone();
                tokio::spawn(async move { hub.reply_count(id).await });
            }
            InboundMessage::BarrierCommand { action } => {
                let Some(lanes) = self.lanes(id).await else {
                    warn!(connection = id, "barrier command from unknown connection");
                    return;
                };
                if lanes.barrier.send(action).await.is_err() {
                    debug!(connection = id, "barrier lane closed");
                }
            }
        }
    }

    /// Cancels the barrier timer, closes every lane and drops every
    /// connection.
    pub async fn shutdown(&self) {
        self.inner.barrier.shutdown().await;
        self.inner.lanes.lock().await.clear();
        let dropped = self.inner.broadcaster.registry().clear().await;
        info!(connections = dropped, "hub shut down");
    }

    async fn lanes(&self, id: ConnectionId) -> Option<InboundLanes> {
        self.inner.lanes.lock().await.get(&id).cloned()
    }

    async fn open_lanes(&self, id: ConnectionId) {
        let depth = self.inner.config.outbound_buffer;
        let (spots_tx, mut spots_rx) = mpsc::channel(depth);
        let (barrier_tx, mut barrier_rx) = mpsc::channel(depth);

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some((spot_id, status)) = spots_rx.recv().await {
                if let Err(err) = hub.inner.authority.update_spot(spot_id, status, None).await {
                    warn!(connection = id, error = %err, "device spot update not applied");
                }
            }
            debug!(connection = id, "spot lane drained");
        });

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(action) = barrier_rx.recv().await {
                match action {
                    BarrierAction::Open => hub.inner.barrier.open().await,
                    BarrierAction::Close => hub.inner.barrier.close().await,
                }
            }
            debug!(connection = id, "barrier lane drained");
        });

        self.inner.lanes.lock().await.insert(
            id,
            InboundLanes {
                spots: spots_tx,
                barrier: barrier_tx,
            },
        );
    }

    async fn reply_count(&self, id: ConnectionId) {
        let count = self.inner.authority.available_count().await;
        self.inner
            .broadcaster
            .reply(id, &OutboundMessage::AvailableCount { count })
            .await;
    }
}
