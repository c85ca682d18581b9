use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use parking_hub::{
    config::HubConfig,
    hub::Hub,
    server::router,
    spot::{LogEntry, LogRecord, ParkingSpot, SpotId, SpotStatus, UserId},
    store::{MemoryStore, PersistenceError, SpotStore},
};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Store whose spot writes can be made to fail, to exercise the error path.
#[derive(Default)]
struct SwitchableStore {
    inner: MemoryStore,
    reject_saves: AtomicBool,
}

#[async_trait]
impl SpotStore for SwitchableStore {
    async fn load_spots(&self) -> Result<Vec<ParkingSpot>, PersistenceError> {
        self.inner.load_spots().await
    }

    async fn save_spot(
        &self,
        id: SpotId,
        status: SpotStatus,
        user_id: Option<UserId>,
    ) -> Result<(), PersistenceError> {
        if self.reject_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("database offline".into()));
        }
        self.inner.save_spot(id, status, user_id).await
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), PersistenceError> {
        self.inner.append_log(entry).await
    }

    async fn logs(&self) -> Result<Vec<LogRecord>, PersistenceError> {
        self.inner.logs().await
    }
}

async fn app_with(store: Arc<dyn SpotStore>) -> Result<(Router, Hub)> {
    let hub = Hub::start(HubConfig::default(), store).await?;
    Ok((router(hub.clone()), hub))
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body)?).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn update_then_read_back_spots_and_logs() -> Result<()> {
    let (app, _hub) = app_with(Arc::new(MemoryStore::with_vacant_spots(3))).await?;

    let (status, body) = call(
        &app,
        "POST",
        "/api/parking/update",
        Some(json!({"id": 2, "status": "occupied", "user_id": 11})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Parking spot updated and logged");

    let (_, spots) = call(&app, "GET", "/api/parking", None).await?;
    assert_eq!(
        spots[1],
        json!({"id": 2, "status": "occupied", "user_id": 11})
    );

    let (_, spot) = call(&app, "GET", "/api/parking/2", None).await?;
    assert_eq!(spot["user_id"], 11);

    let (_, available) = call(&app, "GET", "/api/parking/available", None).await?;
    assert_eq!(available, json!({"count": 2}));

    let (_, logs) = call(&app, "GET", "/api/logs", None).await?;
    assert_eq!(logs.as_array().map(Vec::len), Some(1));
    assert_eq!(logs[0]["action"], "entry");
    assert_eq!(logs[0]["spot_id"], 2);
    assert_eq!(logs[0]["user_id"], 11);
    Ok(())
}

#[tokio::test]
async fn unknown_spot_lookup_is_not_found() -> Result<()> {
    let (app, _hub) = app_with(Arc::new(MemoryStore::with_vacant_spots(1))).await?;

    let (status, body) = call(&app, "GET", "/api/parking/99", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    Ok(())
}

#[tokio::test]
async fn failed_persistence_is_reported_and_not_broadcast() -> Result<()> {
    let store = Arc::new(SwitchableStore::default());
    let (app, hub) = app_with(store.clone()).await?;
    let (_, mut observer) = hub.connect().await?;
    observer.recv().await;
    store.reject_saves.store(true, Ordering::SeqCst);

    let (status, body) = call(
        &app,
        "POST",
        "/api/parking/update",
        Some(json!({"id": 5, "status": "occupied"})),
    )
    .await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "persistence_failed");
    assert!(observer.try_recv().is_err());
    assert!(hub.authority().get(5).await.is_none());
    Ok(())
}

#[tokio::test]
async fn barrier_routes_drive_the_controller() -> Result<()> {
    let (app, hub) = app_with(Arc::new(MemoryStore::new())).await?;
    let (_, mut observer) = hub.connect().await?;
    observer.recv().await;

    let (status, body) = call(&app, "POST", "/api/barrier/open", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "Barrier opened successfully (will auto-close in 30 seconds)"
    );

    let (_, barrier) = call(&app, "GET", "/api/barrier", None).await?;
    assert_eq!(barrier, json!({"phase": "open", "auto_close_pending": true}));

    let (status, _) = call(&app, "POST", "/api/barrier/close", None).await?;
    assert_eq!(status, StatusCode::OK);

    let (_, barrier) = call(&app, "GET", "/api/barrier", None).await?;
    assert_eq!(barrier, json!({"phase": "closed", "auto_close_pending": false}));

    let frames: Vec<Value> = std::iter::from_fn(|| observer.try_recv().ok())
        .map(|frame| serde_json::from_str(&frame))
        .collect::<Result<_, _>>()?;
    assert_eq!(
        frames,
        vec![
            json!({"type": "barrier_control", "action": "open"}),
            json!({"type": "barrier_control", "action": "close"}),
        ]
    );

    let (_, logs) = call(&app, "GET", "/api/logs", None).await?;
    assert_eq!(logs[0]["action"], "barrier_close");
    assert_eq!(logs[1]["action"], "barrier_open");
    assert!(logs[0]["spot_id"].is_null());
    Ok(())
}
