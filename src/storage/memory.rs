use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::backend::{EditOutcome, PartitionBackend, PartitionEdit};
use crate::types::{DatabaseError, Partition, PartitionId, TableKey};

type Slot = Arc<Mutex<Partition>>;

/// In-process partition rows.
///
/// The map lock is only held to find or add a slot; each partition carries
/// its own mutex so writers on different partitions never wait on each other.
#[derive(Default)]
pub struct MemoryBackend {
    rows: RwLock<BTreeMap<PartitionId, Slot>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table_slots(&self, key: &TableKey) -> Vec<Slot> {
        let rows = self.rows.read();
        rows.range(key.partition(0)..=key.partition(u32::MAX))
            .map(|(_, slot)| Arc::clone(slot))
            .collect()
    }

    fn tenant_slots(&self, tenant: &str) -> Vec<(PartitionId, Slot)> {
        let start = PartitionId {
            tenant: tenant.to_string(),
            table: String::new(),
            index: 0,
        };
        let rows = self.rows.read();
        rows.range(start..)
            .take_while(|(id, _)| id.tenant == tenant)
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Create, running `commit` before the row becomes visible
    pub(crate) fn create_with<F>(&self, partition: Partition, commit: F) -> Result<bool, DatabaseError>
    where
        F: FnOnce(&Partition) -> Result<(), DatabaseError>,
    {
        let mut rows = self.rows.write();
        if rows.contains_key(&partition.id) {
            return Ok(false);
        }
        let mut partition = partition;
        partition.record_count = partition.data.len();
        commit(&partition)?;
        rows.insert(partition.id.clone(), Arc::new(Mutex::new(partition)));
        Ok(true)
    }

    /// Compare-and-swap, running `commit` under the partition lock before the swap
    pub(crate) fn swap_with<F>(
        &self,
        partition: Partition,
        expected_version: u64,
        commit: F,
    ) -> Result<bool, DatabaseError>
    where
        F: FnOnce(&Partition) -> Result<(), DatabaseError>,
    {
        let slot = self.rows.read().get(&partition.id).cloned();
        let slot = slot.ok_or_else(|| DatabaseError::NotFound(format!("partition {}", partition.id)))?;

        let mut current = slot.lock();
        if current.version != expected_version {
            return Ok(false);
        }

        let mut next = partition;
        next.version = expected_version + 1;
        next.record_count = next.data.len();
        commit(&next)?;
        *current = next;
        Ok(true)
    }

    /// Run `edit` on a copy of the row under its lock; `commit` runs before the
    /// copy replaces the stored row
    pub(crate) fn edit_with<F>(
        &self,
        id: &PartitionId,
        edit: &mut PartitionEdit<'_>,
        commit: F,
    ) -> Result<EditOutcome, DatabaseError>
    where
        F: FnOnce(&Partition) -> Result<(), DatabaseError>,
    {
        let slot = self.rows.read().get(id).cloned();
        let Some(slot) = slot else {
            return Ok(EditOutcome::Missing);
        };

        let mut current = slot.lock();
        let mut next = current.clone();
        if !edit(&mut next)? {
            return Ok(EditOutcome::Unchanged);
        }
        next.version = current.version + 1;
        next.record_count = next.data.len();
        commit(&next)?;
        *current = next;
        Ok(EditOutcome::Written)
    }

    /// Put a row back exactly as stored, used when reloading from disk
    pub(crate) fn restore(&self, partition: Partition) {
        self.rows
            .write()
            .insert(partition.id.clone(), Arc::new(Mutex::new(partition)));
    }
}

impl PartitionBackend for MemoryBackend {
    fn load_table(&self, key: &TableKey) -> Result<Vec<Partition>, DatabaseError> {
        Ok(self
            .table_slots(key)
            .iter()
            .map(|slot| slot.lock().clone())
            .collect())
    }

    fn partition_ids(&self, key: &TableKey) -> Result<Vec<PartitionId>, DatabaseError> {
        let rows = self.rows.read();
        Ok(rows
            .range(key.partition(0)..=key.partition(u32::MAX))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn load(&self, id: &PartitionId) -> Result<Option<Partition>, DatabaseError> {
        let slot = self.rows.read().get(id).cloned();
        Ok(slot.map(|s| s.lock().clone()))
    }

    fn create(&self, partition: Partition) -> Result<bool, DatabaseError> {
        self.create_with(partition, |_| Ok(()))
    }

    fn compare_and_swap(
        &self,
        partition: Partition,
        expected_version: u64,
    ) -> Result<bool, DatabaseError> {
        self.swap_with(partition, expected_version, |_| Ok(()))
    }

    fn edit_partition(&self, id: &PartitionId, edit: &mut PartitionEdit<'_>) -> Result<EditOutcome, DatabaseError> {
        self.edit_with(id, edit, |_| Ok(()))
    }

    fn list_tables(&self, tenant: &str) -> Result<Vec<String>, DatabaseError> {
        let mut tables: Vec<String> = self
            .tenant_slots(tenant)
            .into_iter()
            .map(|(id, _)| id.table)
            .collect();
        tables.dedup();
        Ok(tables)
    }

    fn tenant_partitions(&self, tenant: &str) -> Result<Vec<Partition>, DatabaseError> {
        Ok(self
            .tenant_slots(tenant)
            .iter()
            .map(|(_, slot)| slot.lock().clone())
            .collect())
    }

    fn tenants(&self) -> Result<Vec<String>, DatabaseError> {
        let rows = self.rows.read();
        let mut tenants: Vec<String> = rows.keys().map(|id| id.tenant.clone()).collect();
        tenants.dedup();
        Ok(tenants)
    }
}
