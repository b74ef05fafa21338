use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunError>;
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Failure classes surfaced by the GitLab client after its retry policy has run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Credential rejected with HTTP {status}")]
    Unauthorized { status: u16 },
    #[error("Not found: {resource}")]
    NotFound { resource: String },
    #[error("Rate limited: gave up after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("Transient failure after {attempts} attempts: {reason}")]
    Transient { attempts: u32, reason: String },
    #[error("Request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Failed to decode {resource}: {reason}")]
    Decode { resource: String, reason: String },
    #[error("Run cancelled")]
    Cancelled,
}

impl ApiError {
    /// Only a rejected credential aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized { .. } => "AuthenticationError",
            ApiError::NotFound { .. } => "ResourceNotFound",
            ApiError::RateLimited { .. } => "RateLimited",
            ApiError::Transient { .. } => "TransientNetworkError",
            ApiError::Rejected { .. } => "RequestRejected",
            ApiError::Decode { .. } => "DecodeError",
            ApiError::Cancelled => "Cancelled",
        }
    }
}

/// Bad input detected before any network call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported output format '{0}' (expected txt or json)")]
    UnsupportedFormat(String),
    #[error("Invalid window: {0}")]
    InvalidWindow(String),
    #[error("Invalid GitLab URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Admin token is missing or empty")]
    MissingToken,
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Authentication error: {0}")]
    Authentication(ApiError),
    #[error("Failed to enumerate projects: {0}")]
    Enumeration(ApiError),
    #[error("Run cancelled")]
    Cancelled,
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to format report: {0}")]
    Fmt(#[from] std::fmt::Error),
}

impl RunError {
    /// Lifts an error that escaped the per-project boundary into a run-level failure.
    pub fn from_api(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { .. } => RunError::Authentication(err),
            ApiError::Cancelled => RunError::Cancelled,
            other => RunError::Enumeration(other),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Config(_) => "ConfigurationError",
            RunError::Authentication(_) => "AuthenticationError",
            RunError::Enumeration(_) => "EnumerationError",
            RunError::Cancelled => "Cancelled",
            RunError::Serde(_) | RunError::Io(_) | RunError::Fmt(_) => "OutputError",
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self, RunError::Config(_))
    }
}
