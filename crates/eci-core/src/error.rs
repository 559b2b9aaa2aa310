//! Error types for the reconciliation core
//!
//! Two layers live here:
//!
//! - [`RemoteError`]: what a control-plane call can fail with. It is a closed
//!   enum so callers match on it instead of inspecting opaque errors.
//! - [`Error`]: what the core itself reports to its callers.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for a single control-plane call
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Structured error returned by the control plane for a non-200 response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// HTTP status code of the response
    pub http_code: u16,
    /// Machine-readable short code (e.g. `unexpected_status`)
    pub code: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
    /// Nested detail payload keyed by resource-type identifiers
    pub detail: Option<Map<String, Value>>,
}

impl ApiError {
    /// Create an API error with only an HTTP code
    pub fn new(http_code: u16) -> Self {
        Self {
            http_code,
            code: None,
            message: None,
            detail: None,
        }
    }

    /// Set the machine-readable code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the detail payload
    pub fn with_detail(mut self, detail: Map<String, Value>) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Check the machine-readable code
    pub fn is_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// True for HTTP 404
    pub fn is_not_found(&self) -> bool {
        self.http_code == 404
    }

    /// True for HTTP 409
    pub fn is_conflict(&self) -> bool {
        self.http_code == 409
    }

    /// Read `detail[resource_key].status`, if present and a string
    pub fn detail_status(&self, resource_key: &str) -> Option<&str> {
        self.detail
            .as_ref()?
            .get(resource_key)?
            .as_object()?
            .get("status")?
            .as_str()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = self
            .detail
            .as_ref()
            .map(|d| Value::Object(d.clone()).to_string());
        write!(
            f,
            "code: {}, message: {}, http_code: {}, detail: {}",
            self.code.as_deref().unwrap_or("<nil>"),
            self.message.as_deref().unwrap_or("<nil>"),
            self.http_code,
            detail.as_deref().unwrap_or("<nil>"),
        )
    }
}

impl std::error::Error for ApiError {}

/// Failure of a single control-plane call
///
/// The transport boundary always yields one of these two shapes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The control plane answered with a structured error
    #[error("{0}")]
    Api(ApiError),

    /// The call never produced a structured answer (connection, timeout, decoding)
    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Structured payload, if any
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            RemoteError::Api(api) => Some(api),
            RemoteError::Transport(_) => None,
        }
    }

    /// True when the control plane reported 404
    pub fn is_not_found(&self) -> bool {
        self.api().is_some_and(ApiError::is_not_found)
    }
}

impl From<ApiError> for RemoteError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// A control-plane call failed
    #[error("{0}")]
    Remote(#[from] RemoteError),

    /// A control-plane call about a specific resource failed
    #[error("{action}: {source} (resource id: {resource_id})")]
    Call {
        /// What was being attempted
        action: String,
        /// The resource the call was about
        resource_id: String,
        #[source]
        source: RemoteError,
    },

    /// A safety precondition was not met; operator action is required
    #[error("{summary}: {message} (resource id: {resource_id})")]
    Precondition {
        /// Short description
        summary: String,
        /// The resource whose state blocked the operation
        resource_id: String,
        /// What the operator has to do
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not supported for this resource kind
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a failed call with the resource it was about
    pub fn call(
        action: impl Into<String>,
        resource_id: impl Into<String>,
        source: RemoteError,
    ) -> Self {
        Self::Call {
            action: action.into(),
            resource_id: resource_id.into(),
            source,
        }
    }

    /// Create a precondition error
    pub fn precondition(
        summary: impl Into<String>,
        resource_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Precondition {
            summary: summary.into(),
            resource_id: resource_id.into(),
            message: message.into(),
        }
    }

    /// The resource a failure is attributed to, if any
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Error::Call { resource_id, .. } | Error::Precondition { resource_id, .. } => {
                Some(resource_id)
            }
            _ => None,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Self::Remote(RemoteError::Api(err))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
