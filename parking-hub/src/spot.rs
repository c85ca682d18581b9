//! Domain types shared by the hub: parking spots and audit log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SpotId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotStatus {
    Vacant,
    Occupied,
}

impl SpotStatus {
    /// Maps a sensor reading onto a status.
    pub fn from_occupied(is_occupied: bool) -> Self {
        if is_occupied {
            SpotStatus::Occupied
        } else {
            SpotStatus::Vacant
        }
    }

    /// Audit action recorded when a spot moves to this status.
    ///
    /// Derived from the new status alone, so re-announcing the current
    /// status still records a fresh entry.
    pub fn log_action(self) -> LogAction {
        match self {
            SpotStatus::Occupied => LogAction::Entry,
            SpotStatus::Vacant => LogAction::Exit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingSpot {
    pub id: SpotId,
    pub status: SpotStatus,
    /// User currently holding the spot, if one was named by the update.
    pub user_id: Option<UserId>,
}

impl ParkingSpot {
    pub fn vacant(id: SpotId) -> Self {
        Self {
            id,
            status: SpotStatus::Vacant,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Entry,
    Exit,
    BarrierOpen,
    BarrierClose,
    BarrierCloseAuto,
}

/// One audit trail record. `spot_id` is `None` for barrier events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub user_id: Option<UserId>,
    pub spot_id: Option<SpotId>,
    pub action: LogAction,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn spot(spot_id: SpotId, user_id: Option<UserId>, status: SpotStatus) -> Self {
        Self {
            user_id,
            spot_id: Some(spot_id),
            action: status.log_action(),
            timestamp: Utc::now(),
        }
    }

    pub fn barrier(action: LogAction) -> Self {
        Self {
            user_id: None,
            spot_id: None,
            action,
            timestamp: Utc::now(),
        }
    }
}

/// A log entry as returned by a store, with the sequence number it was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    #[serde(flatten)]
    pub entry: LogEntry,
}
