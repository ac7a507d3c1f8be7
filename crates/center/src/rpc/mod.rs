//! The agent-facing RPC plane: bincode request/response bodies over the
//! mutually-authenticated HTTP/2 listener. Transport authentication is the
//! client certificate; handlers trust the connection and validate only the
//! message contents.

pub mod agents;
pub mod challenges;
pub mod evaluate;
pub mod stream;

use axum::body::Bytes;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;

use mfasrv_protocol::{decode_message, encode_message, RPC_CONTENT_TYPE};

use crate::state::AppState;

/// Build the RPC router. Paths live under [`mfasrv_protocol::RPC_PREFIX`].
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rpc/v1/evaluate", post(evaluate::evaluate))
        .route("/rpc/v1/verify_challenge", post(challenges::verify))
        .route("/rpc/v1/check_challenge_status", post(challenges::status))
        .route("/rpc/v1/register_agent", post(agents::register))
        .route("/rpc/v1/heartbeat", post(agents::heartbeat))
        .route("/rpc/v1/enroll_certificate", post(agents::enroll_certificate))
        .route("/rpc/v1/sync_policies", post(stream::sync_policies))
}

/// Decode a bincode request body, or answer 400.
pub(crate) fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    decode_message(body).map_err(|e| {
        tracing::debug!(error = %e, "rejecting malformed RPC body");
        StatusCode::BAD_REQUEST.into_response()
    })
}

/// Encode a bincode response body.
pub(crate) fn respond<T: Serialize>(msg: &T) -> Response {
    match encode_message(msg) {
        Ok(body) => (
            [(header::CONTENT_TYPE, RPC_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "RPC response encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Transient infrastructure failure: a plain 500 tells the agent to fold
/// this call into its degraded-mode decision.
pub(crate) fn unavailable(err: mfasrv_domain::Error) -> Response {
    tracing::warn!(error = %err, "RPC handler hit transient failure");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
