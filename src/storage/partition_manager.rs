use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::backend::{EditOutcome, PartitionBackend};
use crate::config::{ReopenPolicy, StoreConfig};
use crate::types::{DatabaseError, Document, Partition, PartitionId, Schema, TableKey};

/// Where a successful insert landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inserted {
    pub row_id: String,
    pub partition: PartitionId,
}

/// A located row together with the partition snapshot it was found in
#[derive(Debug, Clone)]
pub struct RowLocation {
    pub partition: Partition,
    pub position: usize,
}

impl RowLocation {
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.partition.data[self.position]
    }
}

/// Owns partition lifecycle and row-level mutation.
///
/// Every mutation is a read-modify-write of a single partition row, run by
/// the backend under that row's lock (or its version compare-and-swap where
/// it has no locks). Creating a partition is serialized per table, so writers
/// that find every partition full queue behind one creator instead of racing
/// it. A lost compare-and-swap re-reads and retries, up to
/// `write_retry_budget` attempts.
pub struct PartitionManager {
    backend: Arc<dyn PartitionBackend>,
    config: StoreConfig,
    creation_locks: Mutex<HashMap<TableKey, Arc<Mutex<()>>>>,
}

/// Result of one pass over a table's open partitions
enum Append {
    Done(PartitionId),
    AllFull,
    Conflict(PartitionId),
}

impl PartitionManager {
    pub fn new(backend: Arc<dyn PartitionBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn PartitionBackend> {
        &self.backend
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Assign identity and insert
    pub fn insert(
        &self,
        key: &TableKey,
        document: Document,
        schema: Option<Schema>,
    ) -> Result<Inserted, DatabaseError> {
        let mut document = document;
        document.assign_identity();
        self.insert_prepared(key, document, schema)
    }

    /// Insert a document that already carries its `_id` and `_updatedAt`.
    ///
    /// `schema` is only used when this insert creates partition 0; otherwise
    /// the first document's shape is recorded.
    pub fn insert_prepared(
        &self,
        key: &TableKey,
        document: Document,
        schema: Option<Schema>,
    ) -> Result<Inserted, DatabaseError> {
        let row_id = document
            .id()
            .ok_or_else(|| DatabaseError::InvalidDocument("document has no _id".to_string()))?
            .to_string();
        let mut contended = key.partition(0);

        for attempt in 1..=self.config.write_retry_budget {
            match self.append_to_open(key, &document)? {
                Append::Done(partition) => return Ok(Inserted { row_id, partition }),
                Append::Conflict(id) => {
                    debug!(partition = %id, attempt, "insert lost compare-and-swap, retrying");
                    contended = id;
                    continue;
                }
                Append::AllFull => {}
            }

            let lock = self.creation_lock(key);
            let _creating = lock.lock();

            // whoever held the lock before us may have opened a partition
            match self.append_to_open(key, &document)? {
                Append::Done(partition) => return Ok(Inserted { row_id, partition }),
                Append::Conflict(id) => {
                    debug!(partition = %id, attempt, "insert lost compare-and-swap, retrying");
                    contended = id;
                    continue;
                }
                Append::AllFull => {}
            }

            let index = self
                .backend
                .partition_ids(key)?
                .last()
                .map_or(0, |id| id.index + 1);
            let mut fresh = Partition::new(key.partition(index));
            if index == 0 {
                fresh.schema = Some(schema.clone().unwrap_or_else(|| Schema::infer(&document)));
            }
            fresh.push(document.clone(), self.config.max_partition_size);
            let id = fresh.id.clone();

            if self.backend.create(fresh)? {
                info!(partition = %id, "created partition");
                return Ok(Inserted { row_id, partition: id });
            }
            debug!(partition = %id, attempt, "partition created by another writer, retrying");
            contended = id;
        }

        Err(DatabaseError::PartitionWriteConflict {
            partition: contended.to_string(),
            attempts: self.config.write_retry_budget,
        })
    }

    /// Append to the first partition the reopen policy allows that still has room
    fn append_to_open(&self, key: &TableKey, document: &Document) -> Result<Append, DatabaseError> {
        let ids = self.backend.partition_ids(key)?;
        let candidates = match self.config.reopen_policy {
            ReopenPolicy::Reopen => &ids[..],
            ReopenPolicy::AppendOnly => ids.last().map_or(&[][..], std::slice::from_ref),
        };
        let capacity = self.config.max_partition_size;

        for id in candidates {
            let mut filled = false;
            let outcome = self.backend.edit_partition(id, &mut |partition| {
                if partition.is_full {
                    return Ok(false);
                }
                partition.push(document.clone(), capacity);
                filled = partition.is_full;
                Ok(true)
            })?;
            match outcome {
                EditOutcome::Written => {
                    if filled {
                        info!(partition = %id, capacity, "partition is full");
                    }
                    return Ok(Append::Done(id.clone()));
                }
                EditOutcome::Unchanged | EditOutcome::Missing => {}
                EditOutcome::Conflict => return Ok(Append::Conflict(id.clone())),
            }
        }
        Ok(Append::AllFull)
    }

    fn creation_lock(&self, key: &TableKey) -> Arc<Mutex<()>> {
        Arc::clone(self.creation_locks.lock().entry(key.clone()).or_default())
    }

    /// Scan partitions in index order for a row. O(total rows) worst case.
    pub fn find_by_id(&self, key: &TableKey, row_id: &str) -> Result<RowLocation, DatabaseError> {
        for partition in self.backend.load_table(key)? {
            if let Some(position) = partition.position_of(row_id) {
                return Ok(RowLocation { partition, position });
            }
        }
        Err(DatabaseError::NotFound(format!("row '{row_id}' in {key}")))
    }

    /// Apply `patch` (bookkeeping fields ignored) and refresh `_updatedAt`
    pub fn update(
        &self,
        key: &TableKey,
        row_id: &str,
        patch: &Document,
    ) -> Result<Document, DatabaseError> {
        self.update_with(key, row_id, |doc| {
            for (field, value) in patch.user_fields() {
                doc.insert(field.clone(), value.clone());
            }
        })
    }

    /// Rewrite one row in place under its partition's lock
    pub fn update_with<F>(&self, key: &TableKey, row_id: &str, apply: F) -> Result<Document, DatabaseError>
    where
        F: Fn(&mut Document),
    {
        let mut contended = key.partition(0);
        for attempt in 1..=self.config.write_retry_budget {
            let id = self.find_by_id(key, row_id)?.partition.id;

            let mut updated = None;
            let outcome = self.backend.edit_partition(&id, &mut |partition| {
                let Some(position) = partition.position_of(row_id) else {
                    return Ok(false);
                };
                let doc = &mut partition.data[position];
                apply(doc);
                doc.touch();
                updated = Some(doc.clone());
                partition.updated_at = chrono::Utc::now();
                Ok(true)
            })?;

            if let (EditOutcome::Written, Some(doc)) = (outcome, updated) {
                return Ok(doc);
            }
            // the row moved or vanished between lookup and lock, or a swap lost
            debug!(partition = %id, attempt, ?outcome, "update retrying");
            contended = id;
        }

        Err(DatabaseError::PartitionWriteConflict {
            partition: contended.to_string(),
            attempts: self.config.write_retry_budget,
        })
    }

    /// Remove a row. Under `ReopenPolicy::Reopen` its partition accepts inserts again.
    pub fn delete(&self, key: &TableKey, row_id: &str) -> Result<Document, DatabaseError> {
        let reopen = self.config.reopen_policy == ReopenPolicy::Reopen;
        let mut contended = key.partition(0);

        for attempt in 1..=self.config.write_retry_budget {
            let id = self.find_by_id(key, row_id)?.partition.id;

            let mut removed = None;
            let outcome = self.backend.edit_partition(&id, &mut |partition| {
                removed = partition
                    .position_of(row_id)
                    .and_then(|position| partition.remove(position, reopen));
                Ok(removed.is_some())
            })?;

            if let (EditOutcome::Written, Some(doc)) = (outcome, removed) {
                return Ok(doc);
            }
            debug!(partition = %id, attempt, ?outcome, "delete retrying");
            contended = id;
        }

        Err(DatabaseError::PartitionWriteConflict {
            partition: contended.to_string(),
            attempts: self.config.write_retry_budget,
        })
    }

    /// Lazy, restartable document stream over a table in partition order
    pub fn stream_table(&self, key: &TableKey) -> Result<TableStream, DatabaseError> {
        let ids = self.backend.partition_ids(key)?;
        if ids.is_empty() {
            return Err(DatabaseError::NotFound(format!("table {key}")));
        }
        Ok(TableStream::new(Arc::clone(&self.backend), ids))
    }

    /// Canonical schema plus every row, partitions concatenated in index order
    pub fn read_table(&self, key: &TableKey) -> Result<(Option<Schema>, Vec<Document>), DatabaseError> {
        let partitions = self.backend.load_table(key)?;
        if partitions.is_empty() {
            return Err(DatabaseError::NotFound(format!("table {key}")));
        }
        let schema = partitions.first().and_then(|p| p.schema.clone());
        let rows = partitions.into_iter().flat_map(|p| p.data).collect();
        Ok((schema, rows))
    }

    pub fn list_tables(&self, tenant: &str) -> Result<Vec<String>, DatabaseError> {
        self.backend.list_tables(tenant)
    }
}

/// A document as streamed, tagged with the partition it came from
#[derive(Debug, Clone)]
pub struct StreamedDocument {
    pub partition: PartitionId,
    pub document: Document,
}

/// Streams a table one partition at a time.
///
/// The partition list is fixed when the stream is opened; each partition is
/// read only when the stream reaches it, so a scan sees every partition as of
/// the moment it was read (read-committed).
pub struct TableStream {
    backend: Arc<dyn PartitionBackend>,
    ids: Vec<PartitionId>,
    cursor: usize,
    current: Option<(PartitionId, std::vec::IntoIter<Document>)>,
}

impl TableStream {
    fn new(backend: Arc<dyn PartitionBackend>, ids: Vec<PartitionId>) -> Self {
        Self {
            backend,
            ids,
            cursor: 0,
            current: None,
        }
    }

    /// Next partition's documents, or `None` once every partition was read
    pub fn next_batch(&mut self) -> Option<Result<(PartitionId, Vec<Document>), DatabaseError>> {
        while self.cursor < self.ids.len() {
            let id = self.ids[self.cursor].clone();
            self.cursor += 1;
            match self.backend.load(&id) {
                Ok(Some(partition)) => return Some(Ok((id, partition.data))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    /// Start over from the first partition
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.current = None;
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.ids.len()
    }
}

impl Iterator for TableStream {
    type Item = Result<StreamedDocument, DatabaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((id, docs)) = &mut self.current {
                if let Some(document) = docs.next() {
                    return Some(Ok(StreamedDocument {
                        partition: id.clone(),
                        document,
                    }));
                }
            }
            match self.next_batch()? {
                Ok((id, docs)) => self.current = Some((id, docs.into_iter())),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
