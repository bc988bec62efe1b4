//! The store facade
//!
//! [`StoreInstance`] ties the partition manager, schema registry and storage
//! accountant together behind the row-level operations clients call, and
//! exposes tenant tables to the query pipeline.
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, StoreConfig};
use crate::core::document::is_system_field;
use crate::executor::{CancellationToken, QueryExecutor, QueryOptions, QueryResult, Relation, TableScan, TableSource};
use crate::parser::Query;
use crate::storage::{
    DiskBackend, MemoryBackend, PartitionBackend, PartitionManager, PlanLimits, SchemaRegistry, StaticPlanLimits,
    StorageAccountant, UsageReport,
};
use crate::types::{DatabaseError, Document, PartitionId, Schema, SchemaViolation, TableKey};

/// Result of `add_row`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedRow {
    pub row_id: String,
    pub partition: PartitionId,
    /// Schema violations found while validating; empty when clean
    pub warnings: Vec<SchemaViolation>,
}

/// Result of `read_table`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableContents {
    pub schema: Option<Schema>,
    pub rows: Vec<Document>,
}

pub struct StoreInstance {
    partitions: PartitionManager,
    schemas: SchemaRegistry,
    accountant: StorageAccountant,
    config: StoreConfig,
}

impl StoreInstance {
    pub fn new(backend: Arc<dyn PartitionBackend>, limits: Arc<dyn PlanLimits>, config: StoreConfig) -> Self {
        Self {
            partitions: PartitionManager::new(Arc::clone(&backend), config.clone()),
            schemas: SchemaRegistry::new(Arc::clone(&backend), config.write_retry_budget),
            accountant: StorageAccountant::new(backend, limits),
            config,
        }
    }

    /// Volatile store, mostly for tests and the CLI's scratch mode
    pub fn in_memory(config: StoreConfig, limits: Arc<dyn PlanLimits>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), limits, config)
    }

    /// Disk-backed when `data_dir` is set, in-memory otherwise
    pub fn from_config(config: &ServerConfig) -> Result<Self, DatabaseError> {
        let backend: Arc<dyn PartitionBackend> = match &config.data_dir {
            Some(dir) => {
                info!(path = %dir.display(), "opening partition store");
                Arc::new(DiskBackend::open(dir)?)
            }
            None => {
                warn!("no data_dir configured, partitions are kept in memory");
                Arc::new(MemoryBackend::new())
            }
        };
        let limits = StaticPlanLimits::new(config.default_plan_limit_mb).with_overrides(config.plan_limits.clone());
        Ok(Self::new(backend, Arc::new(limits), config.store.clone()))
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Query options carrying this store's correlated evaluation ceiling
    #[must_use]
    pub fn default_query_options(&self) -> QueryOptions {
        QueryOptions {
            max_correlated_evaluations: self.config.max_correlated_evaluations,
            ..QueryOptions::default()
        }
    }

    /// Insert a row, assigning `_id` and `_updatedAt`.
    ///
    /// The quota is checked against the row's serialized size before
    /// anything is written. Schema violations come back as warnings unless
    /// `strict_schema` is set.
    pub fn add_row(&self, tenant: &str, table: &str, document: Document) -> Result<AddedRow, DatabaseError> {
        let key = TableKey::new(tenant, table);
        let mut document = document;
        document.assign_identity();

        self.ensure_quota(tenant, document.byte_size() as u64)?;
        let warnings = self.validated(&key, &document)?;

        let inserted = self.partitions.insert_prepared(&key, document.clone(), None)?;
        self.widen_quietly(&key, &document);
        self.accountant.invalidate(tenant);

        debug!(table = %key, row = %inserted.row_id, partition = %inserted.partition, "row added");
        Ok(AddedRow {
            row_id: inserted.row_id,
            partition: inserted.partition,
            warnings,
        })
    }

    pub fn read_table(&self, tenant: &str, table: &str) -> Result<TableContents, DatabaseError> {
        let (schema, rows) = self.partitions.read_table(&TableKey::new(tenant, table))?;
        Ok(TableContents { schema, rows })
    }

    /// Set one column of one row
    pub fn update_cell(
        &self,
        tenant: &str,
        table: &str,
        row_id: &str,
        column: &str,
        value: Value,
    ) -> Result<Document, DatabaseError> {
        if is_system_field(column) {
            return Err(DatabaseError::InvalidDocument(format!(
                "column '{column}' is maintained by the store"
            )));
        }
        let mut patch = Document::new();
        patch.insert(column, value);
        self.update_row(tenant, table, row_id, &patch)
    }

    /// Merge `patch` into a row and refresh `_updatedAt`; returns the new row
    pub fn update_row(&self, tenant: &str, table: &str, row_id: &str, patch: &Document) -> Result<Document, DatabaseError> {
        if let Some(id) = patch.id() {
            if id != row_id {
                return Err(DatabaseError::InvalidDocument(format!(
                    "patch _id '{id}' does not match row '{row_id}'"
                )));
            }
        }

        let key = TableKey::new(tenant, table);
        let current = self.partitions.find_by_id(&key, row_id)?;
        let before = current.document().byte_size();
        let mut preview = current.document().clone();
        preview.merge_from(patch);
        let growth = preview.byte_size().saturating_sub(before);
        if growth > 0 {
            self.ensure_quota(tenant, growth as u64)?;
        }
        if self.config.strict_schema {
            self.validated(&key, &preview)?;
        }

        let updated = self.partitions.update(&key, row_id, patch)?;
        self.widen_quietly(&key, &updated);
        self.accountant.invalidate(tenant);
        Ok(updated)
    }

    /// Remove a row and return it
    pub fn delete_row(&self, tenant: &str, table: &str, row_id: &str) -> Result<Document, DatabaseError> {
        let removed = self.partitions.delete(&TableKey::new(tenant, table), row_id)?;
        self.accountant.invalidate(tenant);
        Ok(removed)
    }

    pub fn list_tables(&self, tenant: &str) -> Result<Vec<String>, DatabaseError> {
        self.partitions.list_tables(tenant)
    }

    pub fn query(
        &self,
        tenant: &str,
        query: &Query,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, DatabaseError> {
        let tables = TenantTables {
            partitions: &self.partitions,
            schemas: &self.schemas,
            tenant,
        };
        QueryExecutor::execute(&tables, query, options, cancel)
    }

    pub fn usage(&self, tenant: &str) -> Result<UsageReport, DatabaseError> {
        self.accountant.usage_report(tenant)
    }

    pub fn get_schema(&self, tenant: &str, table: &str) -> Result<Option<Schema>, DatabaseError> {
        self.schemas.schema(&TableKey::new(tenant, table))
    }

    /// Store a canonical schema; narrowing changes come back as violations
    pub fn record_schema(&self, tenant: &str, table: &str, schema: Schema) -> Result<Vec<SchemaViolation>, DatabaseError> {
        self.schemas.record_schema(&TableKey::new(tenant, table), schema)
    }

    fn ensure_quota(&self, tenant: &str, incoming: u64) -> Result<(), DatabaseError> {
        let decision = self.accountant.check_quota(tenant, incoming)?;
        if decision.allowed {
            return Ok(());
        }
        let reason = decision.reason.unwrap_or_else(|| format!("tenant '{tenant}' is over its storage limit"));
        warn!(tenant, incoming, limit = decision.limit_bytes, "write rejected by quota");
        Err(DatabaseError::QuotaExceeded(reason))
    }

    fn validated(&self, key: &TableKey, document: &Document) -> Result<Vec<SchemaViolation>, DatabaseError> {
        let warnings = self.schemas.validate(key, document)?.into_warnings();
        if self.config.strict_schema && !warnings.is_empty() {
            let joined: Vec<String> = warnings.iter().map(ToString::to_string).collect();
            return Err(DatabaseError::SchemaViolation(joined.join("; ")));
        }
        for violation in &warnings {
            debug!(table = %key, %violation, "schema warning");
        }
        Ok(warnings)
    }

    /// The row is already stored; a failed widen only costs schema freshness
    fn widen_quietly(&self, key: &TableKey, document: &Document) {
        if let Err(e) = self.schemas.widen(key, document) {
            warn!(table = %key, error = %e, "could not widen schema");
        }
    }
}

/// One tenant's tables as seen by the query pipeline
struct TenantTables<'a> {
    partitions: &'a PartitionManager,
    schemas: &'a SchemaRegistry,
    tenant: &'a str,
}

impl TableSource for TenantTables<'_> {
    fn scan(&self, table: &str, cancel: &CancellationToken) -> Result<TableScan, DatabaseError> {
        let key = TableKey::new(self.tenant, table);
        let mut stream = self.partitions.stream_table(&key)?;
        let mut rows = Vec::new();
        let mut partitions = 0;
        while let Some(batch) = stream.next_batch() {
            cancel.check()?;
            let (_, docs) = batch?;
            partitions += 1;
            rows.extend(docs);
        }

        let known = self
            .schemas
            .schema(&key)?
            .map(|s| s.column_names())
            .unwrap_or_default();
        Ok(TableScan {
            relation: Relation::new(rows, known),
            partitions,
        })
    }
}
