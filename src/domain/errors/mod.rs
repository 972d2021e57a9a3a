// Domain errors - Error taxonomy for the ingestion pipeline

use thiserror::Error;

/// Classification of failures reported by the remote analysis service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Server,
    Network,
    InvalidResponse,
    Unexpected,
}

impl ApiErrorKind {
    /// Map a non-2xx, non-429 HTTP status to its error kind
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ApiErrorKind::BadRequest,
            401 => ApiErrorKind::Unauthorized,
            403 => ApiErrorKind::Forbidden,
            404 => ApiErrorKind::NotFound,
            500..=599 => ApiErrorKind::Server,
            _ => ApiErrorKind::Unexpected,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiErrorKind::BadRequest => "bad request",
            ApiErrorKind::Unauthorized => "unauthorized",
            ApiErrorKind::Forbidden => "forbidden",
            ApiErrorKind::NotFound => "not found",
            ApiErrorKind::Server => "server error",
            ApiErrorKind::Network => "network error",
            ApiErrorKind::InvalidResponse => "invalid response",
            ApiErrorKind::Unexpected => "unexpected status",
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Main error type for ingestion operations
#[derive(Error, Debug)]
pub enum IngestError {
    /// Pre-flight checks on existence, size or extension
    #[error("File validation failed: {0}")]
    FileValidation(String),

    /// Permission, ownership, traversal or content violations
    #[error("Security check failed: {0}")]
    Security(String),

    /// Content does not match a supported video container
    #[error("Invalid video format: {0}")]
    VideoFormat(String),

    /// Metadata or frame checks failed
    #[error("Video integrity check failed: {0}")]
    VideoIntegrity(String),

    /// Quarantine I/O failure
    #[error("Quarantine operation failed: {message}")]
    Quarantine {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Directory layout I/O failure
    #[error("Storage operation failed: {message}")]
    Storage {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote service returned an error response or could not be reached
    #[error("API {kind}: {message}")]
    Api {
        kind: ApiErrorKind,
        status: Option<u16>,
        message: String,
    },

    /// Remote service signalled HTTP 429
    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String, reset: Option<u64> },

    /// Remote task failed or did not finish in time
    #[error("Task {task_id} failed: {message}")]
    Task { task_id: String, message: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Illegal lifecycle change or pipeline bookkeeping failure
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// JSON or TOML (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

impl IngestError {
    pub fn storage(message: impl Into<String>, source: std::io::Error) -> Self {
        IngestError::Storage {
            message: message.into(),
            source,
        }
    }

    pub fn quarantine(message: impl Into<String>, source: Option<std::io::Error>) -> Self {
        IngestError::Quarantine {
            message: message.into(),
            source,
        }
    }

    pub fn api(kind: ApiErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        IngestError::Api {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn task(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Task {
            task_id: task_id.into(),
            message: message.into(),
        }
    }

    /// Name of the error category, as reported to progress observers
    pub fn kind_name(&self) -> &'static str {
        match self {
            IngestError::FileValidation(_) => "FileValidationError",
            IngestError::Security(_) => "SecurityError",
            IngestError::VideoFormat(_) => "VideoFormatError",
            IngestError::VideoIntegrity(_) => "VideoIntegrityError",
            IngestError::Quarantine { .. } => "QuarantineError",
            IngestError::Storage { .. } => "StorageError",
            IngestError::Api { .. } => "APIError",
            IngestError::RateLimit { .. } => "RateLimitError",
            IngestError::Task { .. } => "TaskError",
            IngestError::Config(_) => "ConfigError",
            IngestError::InvalidState(_) => "StateError",
            IngestError::Serialization(_) => "SerializationError",
        }
    }

    /// Only transport failures and rate limiting are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::RateLimit { .. }
                | IngestError::Api {
                    kind: ApiErrorKind::Network,
                    ..
                }
        )
    }

    /// Validation failures that send the file to quarantine instead of failing the upload
    pub fn is_quarantinable(&self) -> bool {
        matches!(
            self,
            IngestError::FileValidation(_)
                | IngestError::Security(_)
                | IngestError::VideoFormat(_)
                | IngestError::VideoIntegrity(_)
        )
    }

    /// The message without the category prefix, preserved verbatim for audit records
    pub fn reason(&self) -> String {
        match self {
            IngestError::FileValidation(msg)
            | IngestError::Security(msg)
            | IngestError::VideoFormat(msg)
            | IngestError::VideoIntegrity(msg)
            | IngestError::Config(msg)
            | IngestError::InvalidState(msg)
            | IngestError::Serialization(msg) => msg.clone(),
            IngestError::Quarantine { message, .. }
            | IngestError::Storage { message, .. }
            | IngestError::Api { message, .. }
            | IngestError::RateLimit { message, .. }
            | IngestError::Task { message, .. } => message.clone(),
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_decode() {
            ApiErrorKind::InvalidResponse
        } else {
            ApiErrorKind::Network
        };
        IngestError::api(kind, err.status().map(|s| s.as_u16()), err.to_string())
    }
}
