//! Read-only JSON status endpoint
//!
//! `GET /status` answers with one `nodes` object keyed by callsign. The
//! handler asks the dispatcher for a snapshot through the event channel,
//! so the endpoint never touches session state directly. `HEAD` returns
//! the same status with an empty body, any other method 501, any other
//! path 404.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::{mpsc, oneshot};

use crate::reflector::Event;

type Events = mpsc::UnboundedSender<Event>;

pub fn router(events: Events) -> Router {
    Router::new()
        .route("/status", get(status).fallback(not_implemented))
        .fallback(not_found)
        .with_state(events)
}

/// Serve the status endpoint until the process stops
pub async fn serve(port: u16, events: Events) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "status endpoint bind failed");
            return;
        }
    };
    tracing::info!(addr = %addr, "status endpoint listening");
    if let Err(e) = axum::serve(listener, router(events)).await {
        tracing::error!(error = %e, "status endpoint failed");
    }
}

async fn status(State(events): State<Events>) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    if events
        .send(Event::StatusQuery { reply: reply_tx })
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match reply_rx.await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn not_implemented(method: Method) -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({
            "msg": format!("{method}: Method not implemented")
        })),
    )
        .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "msg": "Not found!" })),
    )
        .into_response()
}
