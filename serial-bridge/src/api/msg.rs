//! The `/msg` endpoint.
//!
//! ```bash
//! curl 'http://localhost:8080/msg?msg=voltage0'
//! ```

use axum::extract::{rejection::QueryRejection, Json, Query, State};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::tracing::prelude::*;

/// Reply text when the request carries no message.
pub const NO_MESSAGE: &str = "no message";

/// Query parameters for `/msg`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgQuery {
    /// Line to send to the device
    pub msg: Option<String>,
}

impl MsgQuery {
    /// Pick `msg` out of decoded query pairs. When it repeats, the first
    /// value wins.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self {
            msg: pairs
                .into_iter()
                .find(|(key, _)| key == "msg")
                .map(|(_, value)| value),
        }
    }
}

/// Result envelope for `/msg`.
///
/// Always sent with status 200; `success` carries the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MsgResponse {
    pub success: bool,
    /// Device reply on success, error text otherwise
    pub message: String,
}

impl MsgResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Forward `msg` to the device and return its reply.
pub(super) async fn send_message(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Json<MsgResponse> {
    // Every outcome is a 200 with the JSON envelope, including a query
    // string that won't decode.
    let query = match query {
        Ok(Query(pairs)) => MsgQuery::from_pairs(pairs),
        Err(e) => {
            warn!(error = %e, "Unreadable query string.");
            return Json(MsgResponse::failure(e.body_text()));
        }
    };

    let msg = match query.msg {
        Some(msg) if !msg.is_empty() => msg,
        _ => return Json(MsgResponse::failure(NO_MESSAGE)),
    };

    // Run the exchange on its own task so a client hanging up can't cut it
    // short and leave a reply unread on the line.
    let bridge = state.bridge.clone();
    let result = tokio::spawn(async move { bridge.send(&msg).await }).await;

    match result {
        Ok(Ok(reply)) => Json(MsgResponse::success(reply)),
        Ok(Err(e)) => {
            error!(error = %e, "Serial exchange failed.");
            Json(MsgResponse::failure(e.to_string()))
        }
        Err(e) => {
            error!(error = %e, "Serial exchange task failed.");
            Json(MsgResponse::failure(e.to_string()))
        }
    }
}
