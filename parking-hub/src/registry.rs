//! Live set of device connections and best-effort fan-out over it.

use std::{
    collections::HashMap,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::sync::{
    Mutex,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, warn};

use crate::message::ProtocolError;

pub type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("connection {0} is not keeping up with outbound messages")]
    Backpressure(ConnectionId),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to build initial snapshot: {0}")]
    Snapshot(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Registry-side handle for one device: its id plus the queue drained by the
/// connection's writer task.
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

impl DeviceConnection {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<String>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    // Never waits: a peer whose queue is full is treated like a dead one so a
    // single slow socket cannot stall fan-out to everyone else.
    fn try_send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Backpressure(self.id),
            TrySendError::Closed(_) => TransportError::Closed(self.id),
        })
    }
}

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, DeviceConnection>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds `connection` to the live set after queueing `initial` to it.
    ///
    /// The initial frame is produced while the set is locked, so no broadcast
    /// can slip in ahead of it and every broadcast that runs afterwards is
    /// reflected either in the snapshot or as a later message.
    pub async fn register<F>(
        &self,
        connection: DeviceConnection,
        initial: F,
    ) -> Result<(), ConnectError>
    where
        F: Future<Output = Result<String, ProtocolError>>,
    {
        let mut connections = self.connections.lock().await;
        let frame = initial.await?;
        connection.try_send(frame)?;
        debug!(connection = connection.id(), "registered connection");
        connections.insert(connection.id(), connection);
        Ok(())
    }

    /// Removes a connection. Returns whether it was still registered.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().await.remove(&id).is_some();
        if removed {
            debug!(connection = id, "unregistered connection");
        }
        removed
    }

    /// Queues `frame` to every registered connection and returns how many
    /// accepted it. Connections that fail are dropped from the set; the rest
    /// still receive the frame.
    pub async fn broadcast(&self, frame: &str) -> usize {
        let mut connections = self.connections.lock().await;
        let mut failed = Vec::new();

        for connection in connections.values() {
            if let Err(err) = connection.try_send(frame.to_owned()) {
                warn!(error = %err, "dropping connection after failed send");
                failed.push(connection.id());
            }
        }

        for id in &failed {
            connections.remove(id);
        }
        connections.len()
    }

    /// Queues `frame` to one connection, dropping it from the set on failure.
    pub async fn send_to(&self, id: ConnectionId, frame: String) -> Result<(), TransportError> {
        let mut connections = self.connections.lock().await;
        let Some(connection) = connections.get(&id) else {
            return Err(TransportError::Closed(id));
        };
        if let Err(err) = connection.try_send(frame) {
            connections.remove(&id);
            return Err(err);
        }
        Ok(())
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every connection. Writer tasks observe their queue closing and
    /// shut their sockets down.
    pub async fn clear(&self) -> usize {
        let mut connections = self.connections.lock().await;
        let dropped = connections.len();
        connections.clear();
        dropped
    }
}
