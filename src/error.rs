//! Error types for the download pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for all catalog, license and download operations.
#[derive(Debug, Error)]
pub enum AmdlError {
    /// Transport failure talking to a remote endpoint. Retried by the
    /// shared retry policy.
    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Homepage or asset script scraping did not yield a bearer token.
    #[error("Could not extract {what}; response fragment: {fragment:?}")]
    AuthExtraction { what: String, fragment: String },

    /// Malformed or error-status catalog response.
    #[error("Catalog request to {url} failed with status {status}: {body}")]
    CatalogResponse {
        url: String,
        status: u16,
        body: String,
    },

    /// Input URL does not match the content grammar.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// CDM session, license exchange or key selection failed.
    #[error("License error: {0}")]
    License(String),

    /// Path creation, move or write failed for a track.
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Download backend missing or exited unsuccessfully.
    #[error("Download error: {0}")]
    Download(String),

    /// Remux backend missing or exited unsuccessfully.
    #[error("Remux error: {0}")]
    Remux(String),

    /// Stream playlist or webplayback data did not contain a usable stream.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Container tags could not be written.
    #[error("Tagging error: {0}")]
    Tagging(String),

    /// Lyrics document could not be parsed.
    #[error("Lyrics error: {0}")]
    Lyrics(String),

    /// Path template could not be rendered.
    #[error("Invalid template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// Nothing to download for the given reference.
    #[error("Download queue is empty for {0}")]
    EmptyQueue(String),

    /// Configuration could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON parsing failed.
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AmdlError {
    /// Build a `Network` error from a reqwest failure.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        AmdlError::Network {
            url: url.into(),
            source,
        }
    }

    /// Build a `Filesystem` error for a path.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AmdlError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Whether the shared retry policy should try the operation again.
    ///
    /// Only transport failures qualify. Everything else is fatal for the
    /// resource or track at hand.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AmdlError::Network { .. })
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AmdlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_retryable() {
        assert!(!AmdlError::InvalidUrl("x".into()).is_retryable());
        assert!(!AmdlError::License("no key".into()).is_retryable());
        assert!(!AmdlError::CatalogResponse {
            url: "u".into(),
            status: 500,
            body: String::new(),
        }
        .is_retryable());
    }

    #[test]
    fn test_catalog_error_carries_context() {
        let err = AmdlError::CatalogResponse {
            url: "https://amp-api.music.apple.com/v1/catalog/us/songs/1".into(),
            status: 404,
            body: "{\"errors\":[]}".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("songs/1"));
    }
}
