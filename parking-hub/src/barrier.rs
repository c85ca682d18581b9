//! Open/close state machine for the single entrance barrier.
//!
//! Opening arms an auto-close timer; any later open or close cancels it. All
//! transitions, including the timer firing, take the same async lock, and a
//! firing timer only acts if it is still the pending one. That makes cancel
//! and fire mutually exclusive: a stale timer can never produce a second
//! close.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    message::{BarrierAction, OutboundMessage},
    spot::{LogAction, LogEntry},
    store::SpotStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPhase {
    Closed,
    Open,
}

struct PendingClose {
    generation: u64,
    task: JoinHandle<()>,
}

struct BarrierState {
    phase: BarrierPhase,
    pending: Option<PendingClose>,
    generation: u64,
}

impl BarrierState {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
            debug!(generation = pending.generation, "cancelled auto-close");
        }
    }
}

struct BarrierInner {
    state: Mutex<BarrierState>,
    store: Arc<dyn SpotStore>,
    broadcaster: Broadcaster,
    auto_close_after: Duration,
}

#[derive(Clone)]
pub struct BarrierController {
    inner: Arc<BarrierInner>,
}

impl BarrierController {
    pub fn new(
        store: Arc<dyn SpotStore>,
        broadcaster: Broadcaster,
        auto_close_after: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                state: Mutex::new(BarrierState {
                    phase: BarrierPhase::Closed,
                    pending: None,
                    generation: 0,
                }),
                store,
                broadcaster,
                auto_close_after,
            }),
        }
    }

    pub fn auto_close_after(&self) -> Duration {
        self.inner.auto_close_after
    }

    pub async fn phase(&self) -> BarrierPhase {
        self.inner.state.lock().await.phase
    }

    /// Whether an auto-close is currently armed.
    pub async fn auto_close_pending(&self) -> bool {
        self.inner.state.lock().await.pending.is_some()
    }

    /// Opens the barrier and (re)arms the auto-close timer. Valid from any
    /// phase; opening an open barrier restarts the countdown.
    pub async fn open(&self) {
        let mut state = self.inner.state.lock().await;

        self.signal(BarrierAction::Open).await;
        state.phase = BarrierPhase::Open;
        self.inner.record(LogAction::BarrierOpen).await;

        state.cancel_pending();
        state.generation += 1;
        let generation = state.generation;
        let controller = self.clone();
        let delay = self.inner.auto_close_after;
        let task = tokio::spawn(async move {
            sleep(delay).await;
            controller.auto_close(generation).await;
        });
        state.pending = Some(PendingClose { generation, task });

        info!(auto_close_secs = delay.as_secs_f64(), "barrier opened");
    }

    /// Manual close. Idempotent: always cancels the timer and re-sends the
    /// close signal.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;

        state.cancel_pending();
        state.phase = BarrierPhase::Closed;
        self.signal(BarrierAction::Close).await;
        self.inner.record(LogAction::BarrierClose).await;

        info!("barrier closed");
    }

    /// Cancels any armed timer without signalling the device. The phase is
    /// left as it is: no close was sent, so an open barrier is still open.
    pub async fn shutdown(&self) {
        self.inner.state.lock().await.cancel_pending();
    }

    async fn auto_close(&self, generation: u64) {
        let mut state = self.inner.state.lock().await;

        let current = state.pending.as_ref().map(|pending| pending.generation);
        if current != Some(generation) {
            debug!(generation, ?current, "ignoring superseded auto-close");
            return;
        }
        // Dropping our own handle detaches it; the task is the one running.
        state.pending = None;
        state.phase = BarrierPhase::Closed;
        self.signal(BarrierAction::Close).await;
        self.inner.record(LogAction::BarrierCloseAuto).await;

        info!("barrier auto-closed");
    }

    async fn signal(&self, action: BarrierAction) {
        self.inner
            .broadcaster
            .notify(&OutboundMessage::BarrierControl { action })
            .await;
    }
}

impl BarrierInner {
    async fn record(&self, action: LogAction) {
        if let Err(err) = self.store.append_log(LogEntry::barrier(action)).await {
            warn!(?action, error = %err, "failed to record barrier log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        registry::{ConnectionRegistry, DeviceConnection},
        store::{MemoryStore, testing::FlakyStore},
    };

    const DELAY: Duration = Duration::from_secs(30);

    async fn controller_with(
        store: Arc<dyn SpotStore>,
    ) -> (BarrierController, mpsc::Receiver<String>) {
        let broadcaster = Broadcaster::new(Arc::new(ConnectionRegistry::new()));
        let (tx, mut rx) = mpsc::channel(32);
        let id = broadcaster.registry().next_id();
        broadcaster
            .connect(DeviceConnection::new(id, tx), async { Vec::new() })
            .await
            .expect("connect");
        rx.recv().await.expect("initial data");
        (BarrierController::new(store, broadcaster, DELAY), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("json"));
        }
        frames
    }

    async fn actions(store: &dyn SpotStore) -> Vec<LogAction> {
        let mut actions: Vec<_> = store
            .logs()
            .await
            .expect("logs")
            .into_iter()
            .map(|record| record.entry.action)
            .collect();
        actions.reverse();
        actions
    }

    fn control(action: &str) -> Value {
        json!({"type": "barrier_control", "action": action})
    }

    #[tokio::test(start_paused = true)]
    async fn open_then_manual_close_never_auto_closes() {
        let store = Arc::new(MemoryStore::new());
        let (barrier, mut rx) = controller_with(store.clone()).await;

        barrier.open().await;
        sleep(Duration::from_secs(10)).await;
        barrier.close().await;
        sleep(DELAY * 2).await;

        assert_eq!(
            actions(store.as_ref()).await,
            vec![LogAction::BarrierOpen, LogAction::BarrierClose]
        );
        assert_eq!(drain(&mut rx), vec![control("open"), control("close")]);
        assert_eq!(barrier.phase().await, BarrierPhase::Closed);
        assert!(!barrier.auto_close_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn open_without_close_auto_closes_once() {
        let store = Arc::new(MemoryStore::new());
        let (barrier, mut rx) = controller_with(store.clone()).await;

        barrier.open().await;
        assert_eq!(barrier.phase().await, BarrierPhase::Open);
        assert!(barrier.auto_close_pending().await);

        sleep(DELAY - Duration::from_secs(1)).await;
        assert_eq!(barrier.phase().await, BarrierPhase::Open);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(
            actions(store.as_ref()).await,
            vec![LogAction::BarrierOpen, LogAction::BarrierCloseAuto]
        );
        assert_eq!(drain(&mut rx), vec![control("open"), control("close")]);
        assert_eq!(barrier.phase().await, BarrierPhase::Closed);
        assert!(!barrier.auto_close_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_rearms_instead_of_stacking_timers() {
        let store = Arc::new(MemoryStore::new());
        let (barrier, mut rx) = controller_with(store.clone()).await;

        barrier.open().await;
        sleep(Duration::from_secs(20)).await;
        barrier.open().await;

        // Past the first deadline, before the second.
        sleep(Duration::from_secs(20)).await;
        assert_eq!(barrier.phase().await, BarrierPhase::Open);
        assert!(!actions(store.as_ref()).await.contains(&LogAction::BarrierCloseAuto));

        sleep(DELAY).await;
        let recorded = actions(store.as_ref()).await;
        assert_eq!(
            recorded
                .iter()
                .filter(|action| **action == LogAction::BarrierCloseAuto)
                .count(),
            1
        );
        assert_eq!(
            drain(&mut rx),
            vec![control("open"), control("open"), control("close")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let (barrier, mut rx) = controller_with(store.clone()).await;

        barrier.close().await;
        barrier.close().await;

        assert_eq!(
            actions(store.as_ref()).await,
            vec![LogAction::BarrierClose, LogAction::BarrierClose]
        );
        assert_eq!(drain(&mut rx), vec![control("close"), control("close")]);
    }

    #[tokio::test(start_paused = true)]
    async fn log_failure_does_not_block_signal() {
        let store = Arc::new(FlakyStore::default());
        store.fail_logs(true);
        let (barrier, mut rx) = controller_with(store.clone()).await;

        barrier.open().await;
        sleep(DELAY + Duration::from_secs(1)).await;

        assert_eq!(drain(&mut rx), vec![control("open"), control("close")]);
        assert_eq!(barrier.phase().await, BarrierPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timer_silently() {
        let store = Arc::new(MemoryStore::new());
        let (barrier, mut rx) = controller_with(store.clone()).await;

        barrier.open().await;
        barrier.shutdown().await;
        sleep(DELAY * 2).await;

        assert_eq!(drain(&mut rx), vec![control("open")]);
        assert_eq!(actions(store.as_ref()).await, vec![LogAction::BarrierOpen]);
        assert_eq!(barrier.phase().await, BarrierPhase::Open);
        assert!(!barrier.auto_close_pending().await);
    }
}
