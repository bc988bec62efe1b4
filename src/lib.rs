// partitiondb - partitioned JSON document tables with a declarative query engine
// Storage is split into fixed-size partitions per (tenant, table); queries run
// as a pipeline of stages over the streamed rows

// Clippy configuration - allow non-critical warnings for this crate
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::format_push_string)]
#![allow(clippy::wildcard_enum_match_arm)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::clone_on_copy)]
#![allow(clippy::type_complexity)]

// Documents, partitions, schemas, errors
pub mod core;

// Re-export all core types as types module
pub mod types {
    pub use crate::core::*;
}

// Store and server configuration
pub mod config;

// Query document types (serde)
pub mod parser;

// Query pipeline (filters, joins, subqueries, CTEs, windows, aggregates)
pub mod executor;

// Partition backends, partition manager, schema registry, storage accountant
pub mod storage;

// Row-level and query surface
pub mod instance;

// JSON-lines TCP server
pub mod network;

// Re-export commonly used types for convenience
pub use core::{DatabaseError, Document, Schema, TableKey};
pub use config::{ReopenPolicy, ServerConfig, StoreConfig};
pub use parser::{parse_query, Query};
pub use executor::{CancellationToken, QueryExecutor, QueryOptions, QueryResult};
pub use instance::{AddedRow, StoreInstance, TableContents};
pub use network::Server;
