//! Error types for graphfeed-bundle

use thiserror::Error;

/// Result type alias for bundle operations
pub type Result<T> = std::result::Result<T, BundleError>;

/// Errors raised while reading or partitioning a bundle
#[derive(Debug, Error)]
pub enum BundleError {
    /// Input is not structured data or lacks required fields
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Partitioning produced nothing to send
    #[error("nothing to import: bundle produced no partitions")]
    EmptyBundle,

    /// A report names a member that is not part of the document
    #[error("report '{report}' references unknown object '{reference}'")]
    DanglingReference { report: String, reference: String },

    /// Serializing a partition failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BundleError {
    /// Create a malformed document error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedDocument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BundleError::DanglingReference {
            report: "report--1".to_string(),
            reference: "indicator--9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "report 'report--1' references unknown object 'indicator--9'"
        );
        assert_eq!(
            BundleError::malformed("missing objects").to_string(),
            "malformed document: missing objects"
        );
    }
}
