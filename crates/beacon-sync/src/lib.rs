//! Realtime sync service: WebSocket sessions per user, reconnect backfill
//! against the durable event log, and fan-out of `sync.delta` events to every
//! live connection of the affected user.

pub mod fanout;
pub mod protocol;
pub mod registry;
pub mod ws;

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use fanout::SyncFanoutConsumer;
pub use protocol::{ClientFrame, ClientHello, ServerFrame};
pub use registry::{ConnectionRegistry, PushReport};

#[derive(Clone)]
pub struct AppState {
    pub db_path: String,
    pub registry: ConnectionRegistry,
}

pub fn app(state: AppState) -> Router {
    ws::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await
}
