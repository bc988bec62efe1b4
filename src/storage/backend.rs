use crate::types::{DatabaseError, Partition, PartitionId, TableKey};

/// Result of [`PartitionBackend::edit_partition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The edit ran and the new row was stored
    Written,
    /// The edit declined to change the row; nothing was stored
    Unchanged,
    /// No such partition
    Missing,
    /// Another writer got there first; only from backends without row locks
    Conflict,
}

/// Edit applied to a partition row. Returns `false` to leave the row as is.
pub type PartitionEdit<'a> = dyn FnMut(&mut Partition) -> Result<bool, DatabaseError> + 'a;

/// The relational store that holds partition rows.
///
/// Each partition is one row keyed by (tenant, table, index) with a unique
/// constraint on that triple. Rewrites are conditional on the row's version,
/// which gives writers a compare-and-swap scoped to exactly one partition.
pub trait PartitionBackend: Send + Sync {
    /// Every partition of a table, ordered by index
    fn load_table(&self, key: &TableKey) -> Result<Vec<Partition>, DatabaseError>;

    /// Partition addresses of a table, ordered by index
    fn partition_ids(&self, key: &TableKey) -> Result<Vec<PartitionId>, DatabaseError>;

    fn load(&self, id: &PartitionId) -> Result<Option<Partition>, DatabaseError>;

    /// Insert a new partition row. Returns `false` if the index is already taken.
    fn create(&self, partition: Partition) -> Result<bool, DatabaseError>;

    /// Replace a partition row if its stored version still equals
    /// `expected_version`. On success the stored version is `expected_version + 1`.
    fn compare_and_swap(
        &self,
        partition: Partition,
        expected_version: u64,
    ) -> Result<bool, DatabaseError>;

    /// Read-modify-write of one partition row.
    ///
    /// Backends that can lock a single row run `edit` under that lock and never
    /// report `Conflict`. The default is one optimistic attempt: load, edit,
    /// compare-and-swap.
    fn edit_partition(&self, id: &PartitionId, edit: &mut PartitionEdit<'_>) -> Result<EditOutcome, DatabaseError> {
        let Some(mut partition) = self.load(id)? else {
            return Ok(EditOutcome::Missing);
        };
        let expected = partition.version;
        if !edit(&mut partition)? {
            return Ok(EditOutcome::Unchanged);
        }
        if self.compare_and_swap(partition, expected)? {
            Ok(EditOutcome::Written)
        } else {
            Ok(EditOutcome::Conflict)
        }
    }

    /// Distinct table names owned by a tenant, sorted
    fn list_tables(&self, tenant: &str) -> Result<Vec<String>, DatabaseError>;

    /// Every partition owned by a tenant
    fn tenant_partitions(&self, tenant: &str) -> Result<Vec<Partition>, DatabaseError>;

    fn tenants(&self) -> Result<Vec<String>, DatabaseError>;
}
