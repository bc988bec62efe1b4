use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::Document;
use super::schema::Schema;

/// A logical table: (tenant id, table name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey {
    pub tenant: String,
    pub table: String,
}

impl TableKey {
    pub fn new(tenant: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            table: table.into(),
        }
    }

    #[must_use]
    pub fn partition(&self, index: u32) -> PartitionId {
        PartitionId {
            tenant: self.tenant.clone(),
            table: self.table.clone(),
            index,
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.table)
    }
}

/// Address of one partition row. Ordering follows (tenant, table, index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    pub tenant: String,
    pub table: String,
    pub index: u32,
}

impl PartitionId {
    #[must_use]
    pub fn table_key(&self) -> TableKey {
        TableKey::new(self.tenant.clone(), self.table.clone())
    }

    #[must_use]
    pub fn belongs_to(&self, key: &TableKey) -> bool {
        self.tenant == key.tenant && self.table == key.table
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.tenant, self.table, self.index)
    }
}

/// One persisted partition row.
///
/// `record_count` always equals `data.len()`; `version` increments on every
/// successful rewrite and is what optimistic writers compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub id: PartitionId,
    pub data: Vec<Document>,
    pub record_count: usize,
    pub is_full: bool,
    /// Canonical table schema, carried by partition 0 only
    pub schema: Option<Schema>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Partition {
    #[must_use]
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            data: Vec::new(),
            record_count: 0,
            is_full: false,
            schema: None,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    /// Append a document, closing the partition when it reaches capacity
    pub fn push(&mut self, doc: Document, capacity: usize) {
        self.data.push(doc);
        self.record_count = self.data.len();
        if self.record_count >= capacity {
            self.is_full = true;
        }
        self.updated_at = Utc::now();
    }

    /// Remove the document at `position`; `reopen` clears `is_full`
    pub fn remove(&mut self, position: usize, reopen: bool) -> Option<Document> {
        if position >= self.data.len() {
            return None;
        }
        let doc = self.data.remove(position);
        self.record_count = self.data.len();
        if reopen {
            self.is_full = false;
        }
        self.updated_at = Utc::now();
        Some(doc)
    }

    #[must_use]
    pub fn position_of(&self, row_id: &str) -> Option<usize> {
        self.data.iter().position(|d| d.id() == Some(row_id))
    }

    /// Total serialized size of the documents in this partition
    #[must_use]
    pub fn data_bytes(&self) -> u64 {
        self.data.iter().map(|d| d.byte_size() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with_id(id: &str) -> Document {
        Document::from_value(json!({"_id": id})).unwrap()
    }

    #[test]
    fn test_push_closes_at_capacity() {
        let mut p = Partition::new(TableKey::new("t", "x").partition(0));
        p.push(doc_with_id("a"), 2);
        assert!(!p.is_full);
        p.push(doc_with_id("b"), 2);
        assert!(p.is_full);
        assert_eq!(p.record_count, 2);
    }

    #[test]
    fn test_remove_reopens_only_when_asked() {
        let mut p = Partition::new(TableKey::new("t", "x").partition(0));
        p.push(doc_with_id("a"), 2);
        p.push(doc_with_id("b"), 2);

        let removed = p.remove(0, false).unwrap();
        assert_eq!(removed.id(), Some("a"));
        assert!(p.is_full);
        assert_eq!(p.record_count, 1);

        p.remove(0, true);
        assert!(!p.is_full);
        assert_eq!(p.record_count, 0);
        assert!(p.remove(5, true).is_none());
    }

    #[test]
    fn test_partition_ids_order_by_index() {
        let key = TableKey::new("t", "x");
        assert!(key.partition(1) < key.partition(2));
        assert_eq!(key.partition(3).to_string(), "t/x#3");
        assert!(key.partition(0).belongs_to(&key));
    }
}
