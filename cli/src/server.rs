// Webhook HTTP endpoint
//
// POST /webhook with `Authorization: <token>`. The body, if any, is relayed
// as one line to a random connected peer. The listener speaks plain HTTP;
// TLS is terminated in front of it (see `WebhookConfig::check_tls`).

use bytes::Bytes;
use oracle_core::WebhookBridge;
use tokio_util::sync::CancellationToken;
use warp::http::StatusCode;
use warp::Filter;

/// Largest accepted webhook body
const MAX_BODY_BYTES: u64 = 64 * 1024;

/// The `POST /webhook` filter
pub fn routes(
    bridge: WebhookBridge,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let bridge_filter = warp::any().map(move || bridge.clone());

    warp::path("webhook")
        .and(warp::path::end())
        .and(warp::post())
        .and(bridge_filter)
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and_then(handle_webhook)
}

pub async fn handle_webhook(
    bridge: WebhookBridge,
    authorization: Option<String>,
    body: Bytes,
) -> Result<impl warp::Reply, warp::Rejection> {
    let payload = String::from_utf8_lossy(&body);
    let reply = bridge
        .relay(authorization.as_deref(), Some(payload.as_ref()))
        .await;

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok(warp::reply::with_status(warp::reply::json(&reply.body), status))
}

/// Serve the webhook route until `shutdown` fires
pub async fn serve(bridge: WebhookBridge, port: u16, shutdown: CancellationToken) {
    tracing::info!("Starting webhook server on 0.0.0.0:{}", port);

    tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("Webhook server stopped");
        }
        _ = warp::serve(routes(bridge)).run(([0, 0, 0, 0], port)) => {
            tracing::warn!("Webhook server exited");
        }
    }
}
