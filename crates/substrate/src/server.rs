//! HTTP transport: `POST /rpc` for method calls, `GET /health` for probes.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use substrate_core::{Error, Substrate};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

use crate::{
    json::{http_status, JsonError, JsonSuccess},
    rpc::{dispatch, RpcRequest},
};

pub fn router(substrate: Arc<Substrate>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rpc", post(rpc_handler))
        .with_state(substrate)
}

/// Bind `addr` and serve until Ctrl+C or SIGTERM.
pub async fn serve(substrate: Arc<Substrate>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!(%addr, "substrate listening");

    axum::serve(listener, router(substrate))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("substrate shutting down");
    Ok(())
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn rpc_handler(
    State(substrate): State<Arc<Substrate>>,
    body: std::result::Result<Json<RpcRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(&Error::InvalidInput(rejection.body_text()));
        }
    };

    let method = request.method.clone();
    match dispatch(&substrate, request).await {
        Ok(data) => (StatusCode::OK, Json(JsonSuccess::new(data))).into_response(),
        Err(err) => {
            warn!(%method, code = err.code(), error = %err, "rpc call failed");
            error_response(&err)
        }
    }
}

fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(http_status(err)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(JsonError::from(err))).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
