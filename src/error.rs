//! Error taxonomy for the PDF field mapper

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Templates and mapping rules
    /// No template of this name in the mapping rules
    #[error("Unknown template: {name}")]
    TemplateNotFound { name: String },

    /// Rules file failed to parse or is structurally inconsistent
    #[error("Invalid mapping rules: {reason}")]
    InvalidRules { reason: String },

    // Datasets
    /// Dataset bytes are not JSON records in an accepted shape
    #[error("Invalid dataset: {reason}")]
    InvalidDataset { reason: String },

    /// More records than the configured batch limit allows
    #[error("Batch too large: {count} records (max: {max})")]
    BatchTooLarge { count: usize, max: usize },

    // Source resolution
    /// File source does not exist
    #[error("Source not found: {path}")]
    SourceNotFound { path: String },

    /// Catch-all for URL parse, DNS, and HTTP status failures
    #[error("Failed to resolve source: {reason}")]
    SourceResolution { reason: String },

    /// URL host resolves to a private or reserved address
    #[error("Blocked URL (resolves to a private address): {url}")]
    SsrfBlocked { url: String },

    /// URL body exceeds the download cap
    #[error("Download of {size} bytes exceeds the {max_size} byte limit")]
    DownloadTooLarge { size: u64, max_size: u64 },

    /// Path falls outside the configured resource directories
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// No document cached under this key (expired or never stored)
    #[error("Cache key not found: {key}")]
    CacheKeyNotFound { key: String },

    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // PDF engines
    /// Input bytes are not a PDF
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// PDF is encrypted and the caller sent no password
    #[error("PDF is password protected")]
    PasswordRequired,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },
}

impl Error {
    /// Message safe to hand to MCP clients.
    ///
    /// Variants whose display text may carry file paths, URLs, header
    /// values, or library internals collapse to a fixed line; the full
    /// error is logged with tracing before this is called.
    pub fn client_message(&self) -> String {
        match self {
            // Display text of these carries nothing sensitive
            Error::TemplateNotFound { .. }
            | Error::InvalidDataset { .. }
            | Error::BatchTooLarge { .. }
            | Error::PasswordRequired
            | Error::IncorrectPassword => self.to_string(),

            Error::DownloadTooLarge { max_size, .. } => {
                format!("Download exceeds maximum size of {} bytes", max_size)
            }

            Error::InvalidRules { .. } => "Invalid mapping rules".to_string(),
            Error::SourceNotFound { .. } => "Source not found".to_string(),
            Error::SourceResolution { .. } => "Failed to resolve source".to_string(),
            Error::SsrfBlocked { .. } => "URL not allowed".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::CacheKeyNotFound { .. } => "Cache key not found".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::HttpRequest(_) => "HTTP request failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::Pdfium { .. } | Error::QpdfError { .. } => "PDF processing error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_paths() {
        let err = Error::SourceNotFound {
            path: "/home/operator/secret/patients.json".to_string(),
        };
        assert!(!err.client_message().contains("operator"));

        let err = Error::PathAccessDenied {
            path: "/etc/passwd".to_string(),
        };
        assert_eq!(err.client_message(), "Access denied");
    }

    #[test]
    fn test_client_message_keeps_actionable_detail() {
        let err = Error::BatchTooLarge { count: 900, max: 500 };
        assert!(err.client_message().contains("900"));

        let err = Error::TemplateNotFound {
            name: "intake_form".to_string(),
        };
        assert!(err.client_message().contains("intake_form"));
    }
}
