use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Write conflict on partition {partition} after {attempts} attempts")]
    PartitionWriteConflict { partition: String, attempts: u32 },
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    #[error("Schema violation: {0}")]
    SchemaViolation(String),
    #[error("Subquery shape error: {0}")]
    SubqueryShapeError(String),
    #[error("Cyclic CTE reference: {0}")]
    CyclicCteReference(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Execution cost limit exceeded: {0}")]
    CostLimitExceeded(String),
    #[error("Query cancelled")]
    Cancelled,
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("JSON Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Binary Serialization error: {0}")]
    BinarySerialization(String),
}

impl DatabaseError {
    /// Stable kind name reported to clients
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::PartitionWriteConflict { .. } => "PartitionWriteConflict",
            Self::QuotaExceeded(_) => "QuotaExceeded",
            Self::StorageUnavailable(_) => "StorageUnavailable",
            Self::InvalidDocument(_) => "InvalidDocument",
            Self::SchemaViolation(_) => "SchemaViolation",
            Self::SubqueryShapeError(_) => "SubqueryShapeError",
            Self::CyclicCteReference(_) => "CyclicCteReferenceError",
            Self::InvalidQuery(_) => "InvalidQuery",
            Self::CostLimitExceeded(_) => "CostLimitExceeded",
            Self::Cancelled => "Cancelled",
            Self::Configuration(_) => "Configuration",
            Self::Serialization(_) => "Serialization",
            Self::BinarySerialization(_) => "BinarySerialization",
        }
    }

    /// Transient faults a caller may retry with backoff
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PartitionWriteConflict { .. } | Self::StorageUnavailable(_)
        )
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<bincode::Error> for DatabaseError {
    fn from(err: bincode::Error) -> Self {
        Self::BinarySerialization(err.to_string())
    }
}
