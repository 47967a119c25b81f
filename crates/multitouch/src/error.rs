//! Error types for the attribution engine.

/// Errors that can occur when using the tracker.
///
/// The compute layer (classification, attribution, aggregation) never
/// returns these; they only surface from configuration, export, and
/// lifecycle misuse.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The export collector rejected a batch.
    #[error("Export rejected with HTTP {status}: {body}")]
    Export { status: u16, body: String },

    /// Tracker has been shutdown.
    #[error("Tracker has been shutdown")]
    Shutdown,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a failed export is worth sending again.
    ///
    /// Transport failures, throttling and collector-side errors are; a
    /// batch the collector refused as malformed or unauthorized is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) => true,
            Error::Export { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
