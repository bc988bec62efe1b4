//! JSON-lines wire protocol
//!
//! One request object per line, one response object per line, in order.
//! Requests are tagged by `op`:
//!
//! ```text
//! {"op": "addRow", "tenant": "acme", "table": "orders", "row": {"total": 5}}
//! {"ok": true, "result": {"rowId": "...", "partition": {...}, "warnings": []}}
//! {"ok": false, "error": {"kind": "NotFound", "message": "...", "retryable": false}}
//! ```
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::QueryOptions;
use crate::parser::Query;
use crate::types::{DatabaseError, Schema};

/// Protocol revision reported by `ping`
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest request line the server will buffer
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    Ping,
    #[serde(rename_all = "camelCase")]
    AddRow {
        tenant: String,
        table: String,
        row: Value,
    },
    ReadTable {
        tenant: String,
        table: String,
    },
    #[serde(rename_all = "camelCase")]
    UpdateCell {
        tenant: String,
        table: String,
        row_id: String,
        column: String,
        value: Value,
    },
    #[serde(rename_all = "camelCase")]
    UpdateRow {
        tenant: String,
        table: String,
        row_id: String,
        patch: Value,
    },
    #[serde(rename_all = "camelCase")]
    DeleteRow {
        tenant: String,
        table: String,
        row_id: String,
    },
    ListTables {
        tenant: String,
    },
    Query {
        tenant: String,
        query: Query,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<QueryOptions>,
    },
    Usage {
        tenant: String,
    },
    GetSchema {
        tenant: String,
        table: String,
    },
    RecordSchema {
        tenant: String,
        table: String,
        schema: Schema,
    },
}

impl Request {
    /// Parse one request line
    pub fn decode(line: &str) -> Result<Self, DatabaseError> {
        serde_json::from_str(line.trim()).map_err(|e| DatabaseError::InvalidQuery(format!("bad request: {e}")))
    }

    pub fn encode(&self) -> Result<String, DatabaseError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Operation name, for logs
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::AddRow { .. } => "addRow",
            Self::ReadTable { .. } => "readTable",
            Self::UpdateCell { .. } => "updateCell",
            Self::UpdateRow { .. } => "updateRow",
            Self::DeleteRow { .. } => "deleteRow",
            Self::ListTables { .. } => "listTables",
            Self::Query { .. } => "query",
            Self::Usage { .. } => "usage",
            Self::GetSchema { .. } => "getSchema",
            Self::RecordSchema { .. } => "recordSchema",
        }
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        match self {
            Self::Ping => None,
            Self::AddRow { tenant, .. }
            | Self::ReadTable { tenant, .. }
            | Self::UpdateCell { tenant, .. }
            | Self::UpdateRow { tenant, .. }
            | Self::DeleteRow { tenant, .. }
            | Self::ListTables { tenant }
            | Self::Query { tenant, .. }
            | Self::Usage { tenant }
            | Self::GetSchema { tenant, .. }
            | Self::RecordSchema { tenant, .. } => Some(tenant),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&DatabaseError> for ErrorBody {
    fn from(err: &DatabaseError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    #[must_use]
    pub const fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(err: &DatabaseError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ErrorBody::from(err)),
        }
    }

    /// Serialize any result value, reporting serialization trouble as a failure
    pub fn from_result<T: Serialize>(result: Result<T, DatabaseError>) -> Self {
        match result.and_then(|v| serde_json::to_value(v).map_err(DatabaseError::from)) {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(&e),
        }
    }

    /// Single line, newline not included
    pub fn encode(&self) -> Result<String, DatabaseError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self, DatabaseError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}
