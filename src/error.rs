use serde_json::Value;
use thiserror::Error;

/// Errors raised by request parsing, wallet usage and process bootstrap.
///
/// Consensus checks (block validation, transaction validation, chain
/// replacement) never construct these; they report through `bool` or
/// `Option` return values and the caller decides whether to log or drop.
#[derive(Clone, Error, Debug)]
pub enum NodeError {
    #[error("{message}")]
    BadRequest {
        message: String,
        payload: Option<Value>,
    },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("{message}")]
    NotFound { message: String },

    // Fatal bootstrap errors; these never surface through the HTTP layer.
    #[error("wallet key error: {0}")]
    KeyFile(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl NodeError {
    pub fn bad_request(message: impl Into<String>) -> NodeError {
        NodeError::BadRequest {
            message: message.into(),
            payload: None,
        }
    }

    pub fn bad_request_with_payload(message: impl Into<String>, payload: Value) -> NodeError {
        NodeError::BadRequest {
            message: message.into(),
            payload: Some(payload),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> NodeError {
        NodeError::Unauthorized {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> NodeError {
        NodeError::NotFound {
            message: message.into(),
        }
    }

    /// The kind name carried in the HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::BadRequest { .. } => "BadRequest",
            NodeError::Unauthorized { .. } => "Unauthorized",
            NodeError::Forbidden { .. } => "Forbidden",
            NodeError::NotFound { .. } => "NotFound",
            NodeError::KeyFile(_) | NodeError::Transport(_) => "Internal",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            NodeError::BadRequest { .. } => 400,
            NodeError::Unauthorized { .. } => 401,
            NodeError::Forbidden { .. } => 403,
            NodeError::NotFound { .. } => 404,
            NodeError::KeyFile(_) | NodeError::Transport(_) => 500,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            NodeError::BadRequest { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
