//! Error types for clai.
//!
//! Every fallible operation in the crate returns [`Result`].  Backend
//! failures carry enough text for an operator to act on (install the server,
//! pull the model), and local failures (clipboard, line editor, subprocess)
//! keep their underlying cause reachable through [`std::error::Error::source`].

use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;
use std::sync::Arc;

/// URL printed when the model backend cannot be reached.
pub const OLLAMA_INSTALL_URL: &str = "https://ollama.ai";

/// The main error type for clai.
#[derive(Clone, Debug)]
pub enum Error {
    /// Input was rejected before any backend call.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Field that failed validation.
        param: Option<String>,
    },

    /// The model backend could not be reached.
    BackendUnavailable {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The model backend answered with a failure.
    BackendError {
        /// HTTP status code of the response.
        status: u16,
        /// Response body or error text reported by the backend.
        body: String,
    },

    /// The requested model is not installed on the backend.
    ModelNotFound {
        /// The model name that was requested.
        model: String,
    },

    /// The backend produced no text.
    EmptyResponse,

    /// A single-shot backend call exceeded its wall-clock budget.
    Timeout {
        /// Human-readable error message.
        message: String,
        /// Duration of the timeout in seconds.
        duration: Option<f64>,
    },

    /// The stream consumer asked to stop.
    ConsumerAborted {
        /// Human-readable error message.
        message: String,
    },

    /// An approved command failed to start or exited unsuccessfully.
    ExecutionFailed {
        /// Human-readable error message.
        message: String,
        /// Exit code, when the process ran to completion.
        exit_code: Option<i32>,
        /// The underlying spawn error, if any.
        source: Option<Arc<io::Error>>,
    },

    /// Copying to the system clipboard failed.
    Clipboard {
        /// Human-readable error message.
        message: String,
    },

    /// The interactive line editor failed.
    Edit {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A stored record does not exist.
    NotFound {
        /// Human-readable error message.
        message: String,
        /// Record type.
        resource_type: Option<String>,
        /// Record ID.
        resource_id: Option<String>,
    },

    /// A stored record with the same identity already exists.
    Conflict {
        /// Human-readable error message.
        message: String,
    },

    /// The backend stream was malformed or ended early.
    Streaming {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// Error during JSON serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The conversation database failed.
    Storage {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// HTTP client error.
    HttpClient {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Creates a new backend-unavailable error.
    pub fn backend_unavailable(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::BackendUnavailable {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new backend error.
    pub fn backend(status: u16, body: impl Into<String>) -> Self {
        Error::BackendError {
            status,
            body: body.into(),
        }
    }

    /// Creates a new model-not-found error.
    pub fn model_not_found(model: impl Into<String>) -> Self {
        Error::ModelNotFound {
            model: model.into(),
        }
    }

    /// Creates a new timeout error.
    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    /// Creates a new consumer-aborted error.
    pub fn consumer_aborted(message: impl Into<String>) -> Self {
        Error::ConsumerAborted {
            message: message.into(),
        }
    }

    /// Creates a new execution error.
    pub fn execution_failed(
        message: impl Into<String>,
        exit_code: Option<i32>,
        source: Option<io::Error>,
    ) -> Self {
        Error::ExecutionFailed {
            message: message.into(),
            exit_code,
            source: source.map(Arc::new),
        }
    }

    /// Creates a new clipboard error.
    pub fn clipboard(message: impl Into<String>) -> Self {
        Error::Clipboard {
            message: message.into(),
        }
    }

    /// Creates a new line-editor error.
    pub fn edit(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Edit {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new not found error.
    pub fn not_found(
        message: impl Into<String>,
        resource_type: Option<String>,
        resource_id: Option<String>,
    ) -> Self {
        Error::NotFound {
            message: message.into(),
            resource_type,
            resource_id,
        }
    }

    /// Creates a new conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new streaming error.
    pub fn streaming(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Streaming {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new storage error.
    pub fn storage(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Storage {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new HTTP client error.
    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Classifies an error message reported by the backend.
    ///
    /// Ollama reports a missing model as `model "<name>" not found`; that is
    /// surfaced as [`Error::ModelNotFound`] for the model that was requested.
    pub fn from_backend_message(model: &str, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("not found") {
            Error::model_not_found(model)
        } else {
            Error::backend(status, message)
        }
    }

    /// Returns true if this error is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Returns true if the error originated at the model backend.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. }
                | Error::BackendError { .. }
                | Error::ModelNotFound { .. }
                | Error::EmptyResponse
        )
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns true if the stream consumer stopped the exchange.
    pub fn is_consumer_aborted(&self) -> bool {
        matches!(self, Error::ConsumerAborted { .. })
    }

    /// Returns true if this error is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if this error is a conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Returns the HTTP status associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::BackendError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation { message, param } => {
                if let Some(param) = param {
                    write!(f, "Validation error: {message} (parameter: {param})")
                } else {
                    write!(f, "Validation error: {message}")
                }
            }
            Error::BackendUnavailable { message, .. } => {
                write!(
                    f,
                    "Model backend unavailable: {message}. Is ollama running? Install: {OLLAMA_INSTALL_URL}"
                )
            }
            Error::BackendError { status, body } => {
                write!(f, "ollama returned status {status}: {body}")
            }
            Error::ModelNotFound { model } => {
                write!(
                    f,
                    "model '{model}' not found. Download it with:\n  ollama pull {model}"
                )
            }
            Error::EmptyResponse => {
                write!(f, "ollama returned empty response")
            }
            Error::Timeout { message, duration } => {
                if let Some(duration) = duration {
                    write!(f, "Timeout error: {message} ({duration} seconds)")
                } else {
                    write!(f, "Timeout error: {message}")
                }
            }
            Error::ConsumerAborted { message } => {
                write!(f, "Stream aborted by consumer: {message}")
            }
            Error::ExecutionFailed {
                message, exit_code, ..
            } => {
                if let Some(code) = exit_code {
                    write!(f, "execution failed: {message} (exit status {code})")
                } else {
                    write!(f, "execution failed: {message}")
                }
            }
            Error::Clipboard { message } => {
                write!(f, "copy failed: {message}")
            }
            Error::Edit { message, .. } => {
                write!(f, "Edit error: {message}")
            }
            Error::NotFound {
                message,
                resource_type,
                resource_id,
            } => {
                let prefix = if let Some(resource_type) = resource_type {
                    format!("Not found ({resource_type})")
                } else {
                    "Not found".to_string()
                };

                let suffix = if let Some(resource_id) = resource_id {
                    format!(" [ID: {resource_id}]")
                } else {
                    "".to_string()
                };

                write!(f, "{prefix}: {message}{suffix}")
            }
            Error::Conflict { message } => {
                write!(f, "Conflict: {message}")
            }
            Error::Streaming { message, .. } => {
                write!(f, "Streaming error: {message}")
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Storage { message, .. } => {
                write!(f, "Storage error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::HttpClient { message, .. } => {
                write!(f, "HTTP client error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::BackendUnavailable { source, .. }
            | Error::Edit { source, .. }
            | Error::Streaming { source, .. }
            | Error::Serialization { source, .. }
            | Error::Storage { source, .. }
            | Error::HttpClient { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::ExecutionFailed { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::storage(format!("sqlite error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::validation(format!("invalid URL: {err}"), Some("base_url".to_string()))
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::streaming(format!("UTF-8 error: {err}"), Some(Box::new(err)))
    }
}

/// A specialized Result type for clai operations.
pub type Result<T> = std::result::Result<T, Error>;
