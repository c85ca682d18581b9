//! JSON wire protocol spoken with sensors, the barrier controller board and
//! browser observers. Every message travels as one WebSocket frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::spot::{ParkingSpot, SpotId, SpotStatus};

/// Discriminators this hub knows how to decode.
const INBOUND_TYPES: &[&str] = &["spot_update", "request_count", "barrier_command"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierAction {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    SpotUpdate {
        #[serde(rename = "spotId")]
        spot_id: SpotId,
        #[serde(rename = "isOccupied")]
        is_occupied: bool,
    },
    RequestCount,
    BarrierCommand {
        action: BarrierAction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    InitialData {
        spots: Vec<ParkingSpot>,
    },
    SpotStatusChange {
        #[serde(rename = "spotId")]
        spot_id: SpotId,
        status: SpotStatus,
    },
    AvailableCount {
        count: usize,
    },
    BarrierControl {
        action: BarrierAction,
    },
}

impl OutboundMessage {
    /// Wire discriminator, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::InitialData { .. } => "initial_data",
            OutboundMessage::SpotStatusChange { .. } => "spot_status_change",
            OutboundMessage::AvailableCount { .. } => "available_count",
            OutboundMessage::BarrierControl { .. } => "barrier_control",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes one inbound frame.
///
/// Unknown `type` values are reported separately from malformed payloads so
/// callers can drop messages from newer device firmware without treating the
/// peer as broken.
pub fn decode_inbound(payload: &[u8]) -> Result<InboundMessage, ProtocolError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|err| ProtocolError::Malformed(err.to_string()))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(_) => return Err(ProtocolError::Malformed("'type' must be a string".into())),
        None => return Err(ProtocolError::Malformed("missing 'type' field".into())),
    };
    if !INBOUND_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|err| ProtocolError::Malformed(err.to_string()))
}

pub fn encode_outbound(message: &OutboundMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|source| ProtocolError::Encode {
        kind: message.kind(),
        source,
    })
}
