//! Request parsing helpers and the error envelope of the operator surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use data_encoding::HEXLOWER;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{NodeError, Result};

/// The error body every failing endpoint returns:
/// `{error: <KindName>, message: <str>, payload?: <obj>}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl From<&NodeError> for ErrorEnvelope {
    fn from(error: &NodeError) -> Self {
        ErrorEnvelope {
            error: error.kind(),
            message: error.to_string(),
            payload: error.payload().cloned(),
        }
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorEnvelope::from(&self))).into_response()
    }
}

/// Pulls a required parameter out of a JSON request body.
pub fn get_param<'a>(body: &'a Value, name: &str) -> Result<&'a Value> {
    body.get(name).ok_or_else(|| {
        NodeError::bad_request_with_payload("missing parameter", json!({ "parameter": name }))
    })
}

/// As `get_param`, for string-valued parameters.
pub fn get_str_param<'a>(body: &'a Value, name: &str) -> Result<&'a str> {
    get_param(body, name)?.as_str().ok_or_else(|| {
        NodeError::bad_request_with_payload("parameter must be a string", json!({ "parameter": name }))
    })
}

/// Decodes a hex-encoded operator input.
pub fn decode_hex(value: &str) -> Result<Vec<u8>> {
    HEXLOWER.decode(value.as_bytes()).map_err(|e| {
        NodeError::bad_request_with_payload(
            "invalid hex parameter",
            json!({ "offending_value": value, "cause": e.to_string() }),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let error = NodeError::bad_request_with_payload("missing parameter", json!({"parameter": "peer"}));
        let body = serde_json::to_value(ErrorEnvelope::from(&error)).unwrap();
        assert_eq!(body["error"], "BadRequest");
        assert_eq!(body["message"], "missing parameter");
        assert_eq!(body["payload"]["parameter"], "peer");
    }

    #[test]
    fn test_envelope_omits_empty_payload() {
        let error = NodeError::not_found("block not found");
        let body = serde_json::to_value(ErrorEnvelope::from(&error)).unwrap();
        assert_eq!(body["error"], "NotFound");
        assert!(body.get("payload").is_none());
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert_eq!(decode_hex("0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert!(decode_hex("zz").is_err());
    }
}
