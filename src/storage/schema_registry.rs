use std::sync::Arc;

use tracing::{debug, warn};

use super::backend::{EditOutcome, PartitionBackend};
use crate::types::{DatabaseError, Document, Partition, Schema, SchemaViolation, TableKey, Validation};

/// Canonical per-table schemas, stored on partition 0 of each table.
///
/// Schemas are informational: validation reports violations and never
/// blocks on its own.
pub struct SchemaRegistry {
    backend: Arc<dyn PartitionBackend>,
    retry_budget: u32,
}

impl SchemaRegistry {
    pub fn new(backend: Arc<dyn PartitionBackend>, retry_budget: u32) -> Self {
        Self {
            backend,
            retry_budget: retry_budget.max(1),
        }
    }

    pub fn schema(&self, key: &TableKey) -> Result<Option<Schema>, DatabaseError> {
        Ok(self
            .backend
            .load(&key.partition(0))?
            .and_then(|p| p.schema))
    }

    /// Store or overwrite the canonical schema.
    ///
    /// Narrowing or type changes relative to the previous schema are returned
    /// as violations; the new schema is stored regardless. Recording a schema
    /// for a table that does not exist yet creates an empty partition 0.
    pub fn record_schema(
        &self,
        key: &TableKey,
        schema: Schema,
    ) -> Result<Vec<SchemaViolation>, DatabaseError> {
        self.modify(key, |current| {
            let violations = current
                .as_ref()
                .map(|old| old.diff(&schema))
                .unwrap_or_default();
            for v in &violations {
                warn!(table = %key, violation = %v, "schema change narrows table");
            }
            (Some(schema.clone()), violations)
        })
    }

    /// Check a document against the canonical schema. No schema means `Ok`.
    pub fn validate(&self, key: &TableKey, doc: &Document) -> Result<Validation, DatabaseError> {
        Ok(match self.schema(key)? {
            Some(schema) => schema.validate(doc),
            None => Validation::Ok,
        })
    }

    /// Add unseen keys of `doc` as optional columns; returns the added names
    pub fn widen(&self, key: &TableKey, doc: &Document) -> Result<Vec<String>, DatabaseError> {
        let Some(current) = self.schema(key)? else {
            return Ok(Vec::new());
        };
        if doc.user_fields().all(|(name, _)| current.column(name).is_some()) {
            return Ok(Vec::new());
        }

        let added = self.modify(key, |current| {
            let mut schema = current.clone().unwrap_or_default();
            let added = schema.widen(doc);
            (Some(schema), added)
        })?;
        if !added.is_empty() {
            debug!(table = %key, columns = ?added, "widened schema");
        }
        Ok(added)
    }

    /// Read-modify-write of the schema on partition 0 under its row lock
    fn modify<F, T>(&self, key: &TableKey, change: F) -> Result<T, DatabaseError>
    where
        F: Fn(&Option<Schema>) -> (Option<Schema>, T),
    {
        let id = key.partition(0);
        for attempt in 1..=self.retry_budget {
            let mut out = None;
            let outcome = self.backend.edit_partition(&id, &mut |partition| {
                let (schema, value) = change(&partition.schema);
                partition.schema = schema;
                out = Some(value);
                Ok(true)
            })?;
            match (outcome, out) {
                (EditOutcome::Written, Some(value)) => return Ok(value),
                (EditOutcome::Missing, _) => {
                    let mut partition = Partition::new(id.clone());
                    let (schema, value) = change(&None);
                    partition.schema = schema;
                    if self.backend.create(partition)? {
                        return Ok(value);
                    }
                }
                _ => {}
            }
            debug!(partition = %id, attempt, ?outcome, "schema write retrying");
        }

        Err(DatabaseError::PartitionWriteConflict {
            partition: id.to_string(),
            attempts: self.retry_budget,
        })
    }
}
