//! Error types for the ingestion pipeline.
//!
//! Every failure a feed file can hit maps onto one variant here. All of them
//! are file-scoped: the run coordinator classifies them into the run report
//! and keeps going. The single exception is [`PipelineError::Config`], which
//! is detected before the run starts and aborts it.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure taxonomy for the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source's listing endpoint could not be reached or returned an
    /// unparseable response.
    #[error("directory unavailable for {chain}: {reason}")]
    DirectoryUnavailable { chain: String, reason: String },

    /// A file descriptor could not be resolved to a concrete download URL.
    #[error("download resolution failed for {file}: {reason}")]
    DownloadResolutionFailed { file: String, reason: String },

    /// Network error, non-success status, or empty body while downloading.
    #[error("fetch failed for {url}: {cause}")]
    FetchFailed { url: String, cause: String },

    /// The downloaded payload could not be decoded into text.
    #[error("decode failed: {reason}")]
    DecodeFailed { reason: String },

    /// The decoded document is not well-formed markup.
    #[error("malformed document: {reason}")]
    MalformedDocument { reason: String },

    /// Invalid source configuration. Fatal; checked before the run starts.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl PipelineError {
    /// Machine-readable class label used in run report entries.
    pub fn class(&self) -> &'static str {
        match self {
            PipelineError::DirectoryUnavailable { .. } => "DirectoryUnavailable",
            PipelineError::DownloadResolutionFailed { .. } => "DownloadResolutionFailed",
            PipelineError::FetchFailed { .. } => "FetchFailed",
            PipelineError::DecodeFailed { .. } => "DecodeFailed",
            PipelineError::MalformedDocument { .. } => "MalformedDocument",
            PipelineError::Config { .. } => "Config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_labels() {
        let e = PipelineError::DecodeFailed {
            reason: "empty archive".to_string(),
        };
        assert_eq!(e.class(), "DecodeFailed");

        let e = PipelineError::FetchFailed {
            url: "http://example.com/x.gz".to_string(),
            cause: "status 503".to_string(),
        };
        assert_eq!(e.class(), "FetchFailed");
    }

    #[test]
    fn test_display_carries_context() {
        let e = PipelineError::DirectoryUnavailable {
            chain: "kingstore".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("kingstore"));
        assert!(msg.contains("connection refused"));
    }
}
