//! Outbound side of the hub: encodes messages once and queues them to one or
//! every registered connection.

use std::{future::Future, sync::Arc};

use tracing::{debug, warn};

use crate::{
    message::{OutboundMessage, encode_outbound},
    registry::{ConnectError, ConnectionId, ConnectionRegistry, DeviceConnection},
    spot::ParkingSpot,
};

/// Encodes outbound messages and hands them to the registry.
///
/// Delivery is best effort: no acknowledgement, retry or replay. A device that
/// reconnects gets a fresh `initial_data` snapshot instead of missed events.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Registers `connection`, sending it `initial_data` built from `spots`
    /// before anything else.
    pub async fn connect<F>(
        &self,
        connection: DeviceConnection,
        spots: F,
    ) -> Result<(), ConnectError>
    where
        F: Future<Output = Vec<ParkingSpot>>,
    {
        let initial = async move {
            encode_outbound(&OutboundMessage::InitialData {
                spots: spots.await,
            })
        };
        self.registry.register(connection, initial).await
    }

    /// Fans `message` out to every registered connection and returns how many
    /// accepted it.
    pub async fn notify(&self, message: &OutboundMessage) -> usize {
        let frame = match encode_outbound(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode broadcast");
                return 0;
            }
        };
        let delivered = self.registry.broadcast(&frame).await;
        debug!(kind = message.kind(), delivered, "broadcast sent");
        delivered
    }

    /// Sends `message` to a single connection. Returns whether it was queued.
    pub async fn reply(&self, id: ConnectionId, message: &OutboundMessage) -> bool {
        let frame = match encode_outbound(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection = id, error = %err, "failed to encode reply");
                return false;
            }
        };
        match self.registry.send_to(id, frame).await {
            Ok(()) => true,
            Err(err) => {
                debug!(connection = id, error = %err, "reply not delivered");
                false
            }
        }
    }
}
