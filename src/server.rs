//! HTTP trigger.
//!
//! Any request runs a pass.  `?vhost=<name>` forces that vhost into the
//! pass so it exists in the registry even with no endpoints; when the
//! parameter repeats, the last value counts.  The reply is
//! `200 OK` on success, `400` for an unusable vhost name and `500` with the
//! failure reason otherwise.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::signal;

use crate::engine::Reconciler;
use crate::error::SyncError;

pub fn router(engine: Arc<Reconciler>) -> Router {
    Router::new()
        .route("/", any(trigger))
        .fallback(trigger)
        .with_state(engine)
}

async fn trigger(
    State(engine): State<Arc<Reconciler>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let vhost = params
        .into_iter()
        .filter(|(key, _)| key == "vhost")
        .map(|(_, value)| value)
        .last();
    // An empty `vhost=` means no forced vhost.
    let forced = vhost.as_deref().filter(|v| !v.is_empty());
    match engine.reconcile(forced).await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(e @ SyncError::InvalidVhost(_)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn run_server(addr: SocketAddr, engine: Arc<Reconciler>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("Unable to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
