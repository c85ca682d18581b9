//! HTTP surface: the `/ws` device endpoint plus REST routes that drive the
//! same hub operations.

use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    barrier::BarrierPhase,
    error::ApiError,
    hub::Hub,
    registry::ConnectionId,
    spot::{LogRecord, ParkingSpot, SpotId, SpotStatus, UserId},
};

pub struct Server {
    listener: TcpListener,
    hub: Hub,
}

impl Server {
    pub fn new(listener: TcpListener, hub: Hub) -> Self {
        Self { listener, hub }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` resolves, then tears the hub down.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server { listener, hub } = self;
        axum::serve(listener, router(hub.clone()))
            .with_graceful_shutdown(shutdown)
            .await?;
        hub.shutdown().await;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/api/parking", get(list_spots))
        .route("/api/parking/available", get(available_count))
        .route("/api/parking/update", post(update_spot))
        .route("/api/parking/:id", get(get_spot))
        .route("/api/barrier", get(barrier_status))
        .route("/api/barrier/open", post(open_barrier))
        .route("/api/barrier/close", post(close_barrier))
        .route("/api/logs", get(list_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn ws_upgrade(State(hub): State<Hub>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (mut sink, mut stream) = socket.split();

    let (id, mut outbound) = match hub.connect().await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(error = %err, "failed to register device");
            return;
        }
    };

    // The registry only ever queues; this task owns the socket's write half.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(err) = sink.send(Message::Text(frame)).await {
                debug!(connection = id, error = %err, "socket write failed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    read_frames(&hub, id, &mut stream).await;

    hub.disconnect(id).await;
    writer.abort();
}

async fn read_frames(
    hub: &Hub,
    id: ConnectionId,
    stream: &mut futures::stream::SplitStream<WebSocket>,
) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => hub.handle_inbound(id, text.as_bytes()).await,
            Ok(Message::Binary(bytes)) => hub.handle_inbound(id, &bytes).await,
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum.
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(err) => {
                debug!(connection = id, error = %err, "socket read failed");
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSpotRequest {
    pub id: SpotId,
    pub status: SpotStatus,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierStatus {
    pub phase: BarrierPhase,
    pub auto_close_pending: bool,
}

async fn list_spots(State(hub): State<Hub>) -> Json<Vec<ParkingSpot>> {
    Json(hub.authority().get_all().await)
}

async fn get_spot(
    State(hub): State<Hub>,
    Path(id): Path<SpotId>,
) -> Result<Json<ParkingSpot>, ApiError> {
    hub.authority()
        .get(id)
        .await
        .map(Json)
        .ok_or(ApiError::SpotNotFound(id))
}

async fn available_count(State(hub): State<Hub>) -> Json<CountResponse> {
    Json(CountResponse {
        count: hub.authority().available_count().await,
    })
}

async fn update_spot(
    State(hub): State<Hub>,
    Json(request): Json<UpdateSpotRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    hub.authority()
        .update_spot(request.id, request.status, request.user_id)
        .await?;
    Ok(MessageResponse::new("Parking spot updated and logged"))
}

async fn barrier_status(State(hub): State<Hub>) -> Json<BarrierStatus> {
    let barrier = hub.barrier();
    Json(BarrierStatus {
        phase: barrier.phase().await,
        auto_close_pending: barrier.auto_close_pending().await,
    })
}

async fn open_barrier(State(hub): State<Hub>) -> Json<MessageResponse> {
    let barrier = hub.barrier();
    barrier.open().await;
    info!("barrier opened via api");
    MessageResponse::new(format!(
        "Barrier opened successfully (will auto-close in {} seconds)",
        barrier.auto_close_after().as_secs()
    ))
}

async fn close_barrier(State(hub): State<Hub>) -> Json<MessageResponse> {
    hub.barrier().close().await;
    info!("barrier closed via api");
    MessageResponse::new("Barrier closed successfully")
}

async fn list_logs(State(hub): State<Hub>) -> Result<Json<Vec<LogRecord>>, ApiError> {
    Ok(Json(hub.store().logs().await?))
}
