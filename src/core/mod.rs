// Module declarations
pub mod error;
pub mod document;
pub mod schema;
pub mod partition;

// Re-exports for convenience
pub use error::DatabaseError;
pub use document::{Document, RowView, ID_FIELD, UPDATED_AT_FIELD};
pub use schema::{Column, ColumnType, Schema, SchemaViolation, Validation, ViolationKind};
pub use partition::{Partition, PartitionId, TableKey};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(DatabaseError::NotFound("row".into()).kind(), "NotFound");
        assert_eq!(
            DatabaseError::CyclicCteReference("a".into()).kind(),
            "CyclicCteReferenceError"
        );
        assert_eq!(DatabaseError::Cancelled.to_string(), "Query cancelled");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(DatabaseError::PartitionWriteConflict {
            partition: "t/x#0".into(),
            attempts: 5
        }
        .is_retryable());
        assert!(DatabaseError::StorageUnavailable("down".into()).is_retryable());
        assert!(!DatabaseError::QuotaExceeded("full".into()).is_retryable());
        assert!(!DatabaseError::NotFound("row".into()).is_retryable());
    }

    #[test]
    fn test_io_error_maps_to_storage_unavailable() {
        let err: DatabaseError = std::io::Error::other("disk gone").into();
        assert_eq!(err.kind(), "StorageUnavailable");
    }
}
