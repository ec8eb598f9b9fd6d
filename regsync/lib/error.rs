use std::{error::Error, fmt::Display};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a regsync-related operation.
pub type RegsyncResult<T> = Result<T, RegsyncError>;

/// An error that occurred during a synchronization operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum RegsyncError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error that occurred while loading or validating configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error that occurred while parsing an image reference.
    #[error("image reference error: {0}")]
    ImageReference(String),

    /// An error that occurred while parsing a manifest.
    #[error("manifest parse error: {0}")]
    ManifestParse(String),

    /// An error that occurred while resolving credentials or exchanging tokens.
    #[error("auth error: {0}")]
    Auth(String),

    /// An error that occurred when a manifest or blob was not found at the registry.
    #[error("not found: {0}")]
    NotFound(String),

    /// An error response from a registry.
    #[error("registry error ({status}): {message}")]
    Registry {
        /// The HTTP status code returned by the registry.
        status: u16,

        /// The error body or status text returned by the registry.
        message: String,
    },

    /// An error that occurred when a blob stream did not match its declared digest.
    #[error("blob digest mismatch: expected {expected}, got {actual}")]
    BlobDigestMismatch {
        /// The digest declared by the manifest.
        expected: String,

        /// The digest computed over the transferred bytes.
        actual: String,
    },

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// An error that occurred when a Serde JSON error occurred.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error that occurred when a Serde YAML error occurred.
    #[error("serde yaml error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    /// An error that occurred while handling OCI image types.
    #[error("oci spec error: {0}")]
    OciSpec(#[from] oci_spec::OciSpecError),

    /// An error that occurred when one or more tasks were still failed after the last retry.
    #[error("{0} sync tasks failed after all retries")]
    TasksFailed(usize),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegsyncError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> RegsyncError {
        RegsyncError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Gets the any error.
    pub fn get_error(&self) -> &anyhow::Error {
        &self.error
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` result.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> RegsyncResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
