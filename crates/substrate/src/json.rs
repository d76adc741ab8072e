//! JSON response envelopes.
//!
//! Every response, over HTTP or from `substrate call`, is either
//! `{"success": true, ...data}` or
//! `{"success": false, "error": {code, message, exitCode, details?, suggestion?}}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use substrate_core::Error;

/// Success wrapper; `data` must serialize to an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSuccess<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> JsonSuccess<T> {
    pub const fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonError {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    /// Machine-readable error code in `SCREAMING_SNAKE_CASE` format
    pub code: String,
    pub message: String,
    pub exit_code: i32,
    /// Structured context, such as the current holder on a conflict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

fn details(err: &Error) -> Option<Value> {
    match err {
        Error::NotOwner {
            resource, holder, ..
        }
        | Error::Conflict { resource, holder } => Some(json!({
            "resource": resource,
            "heldBy": holder,
        })),
        Error::QuotaExceeded { agent_id, held, max } => Some(json!({
            "agentId": agent_id,
            "held": held,
            "max": max,
        })),
        _ => None,
    }
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code: err.code().to_string(),
                message: err.to_string(),
                exit_code: err.exit_code(),
                details: details(err),
                suggestion: err.suggestion(),
            },
        }
    }
}

/// HTTP status for an error response.
pub const fn http_status(err: &Error) -> u16 {
    match err {
        Error::InvalidInput(_) => 400,
        Error::NotOwner { .. } | Error::Forbidden(_) => 403,
        Error::NotFound(_) => 404,
        Error::Conflict { .. } | Error::Blocked(_) => 409,
        Error::QuotaExceeded { .. } => 429,
        Error::InvalidConfig(_)
        | Error::DatabaseError(_)
        | Error::ParseError(_)
        | Error::IoError(_) => 500,
    }
}
