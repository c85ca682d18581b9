//! Hub configuration.

use std::time::Duration;

/// Fixed delay before an opened barrier closes on its own.
pub const DEFAULT_AUTO_CLOSE: Duration = Duration::from_secs(30);

/// Frames a single connection may have queued before it is considered stuck.
/// Also the depth of each connection's inbound lanes.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub auto_close_after: Duration,
    pub outbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            auto_close_after: DEFAULT_AUTO_CLOSE,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl HubConfig {
    #[must_use]
    pub fn with_auto_close_after(mut self, delay: Duration) -> Self {
        self.auto_close_after = delay;
        self
    }

    /// Sets the per-connection queue depth, outbound and inbound. Zero is bumped to one, since the
    /// initial snapshot always needs a slot.
    #[must_use]
    pub fn with_outbound_buffer(mut self, frames: usize) -> Self {
        self.outbound_buffer = frames.max(1);
        self
    }
}
