use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::backend::{EditOutcome, PartitionBackend, PartitionEdit};
use super::memory::MemoryBackend;
use crate::types::{DatabaseError, Document, Partition, PartitionId, Schema, TableKey};

const PARTITION_EXT: &str = "part";

/// On-disk image of one partition row
#[derive(Debug, Serialize, Deserialize)]
struct PartitionFile {
    tenant: String,
    table: String,
    index: u32,
    version: u64,
    is_full: bool,
    updated_at: DateTime<Utc>,
    schema_json: Option<String>,
    data_json: String,
    /// sha256 over `data_json` then `schema_json`, hex encoded
    checksum: String,
}

impl PartitionFile {
    fn encode(partition: &Partition) -> Result<Self, DatabaseError> {
        let data_json = serde_json::to_string(&partition.data)?;
        let schema_json = partition
            .schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let checksum = checksum(&data_json, schema_json.as_deref());

        Ok(Self {
            tenant: partition.id.tenant.clone(),
            table: partition.id.table.clone(),
            index: partition.id.index,
            version: partition.version,
            is_full: partition.is_full,
            updated_at: partition.updated_at,
            schema_json,
            data_json,
            checksum,
        })
    }

    fn decode(self) -> Result<Partition, DatabaseError> {
        let id = PartitionId {
            tenant: self.tenant,
            table: self.table,
            index: self.index,
        };
        if checksum(&self.data_json, self.schema_json.as_deref()) != self.checksum {
            return Err(DatabaseError::StorageUnavailable(format!(
                "checksum mismatch in partition {id}"
            )));
        }

        let data: Vec<Document> = serde_json::from_str(&self.data_json)?;
        let schema: Option<Schema> = self
            .schema_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Partition {
            id,
            record_count: data.len(),
            data,
            is_full: self.is_full,
            schema,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

fn checksum(data_json: &str, schema_json: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data_json.as_bytes());
    if let Some(schema) = schema_json {
        hasher.update(schema.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// File-per-partition store.
///
/// Layout: `<root>/<hex tenant>/<hex table>/<index>.part`. Every write goes
/// to a temp file that is renamed over the old one, so readers only ever
/// see a complete row. An in-memory copy serves reads and arbitrates the
/// compare-and-swap.
pub struct DiskBackend {
    root: PathBuf,
    cache: MemoryBackend,
}

impl DiskBackend {
    /// Open (or create) a data directory and load every partition file
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, DatabaseError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let cache = MemoryBackend::new();
        let mut loaded = 0usize;
        for tenant_dir in subdirs(&root)? {
            for table_dir in subdirs(&tenant_dir)? {
                for entry in fs::read_dir(&table_dir)? {
                    let path = entry?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(PARTITION_EXT) {
                        continue;
                    }
                    let bytes = fs::read(&path)?;
                    let file: PartitionFile = bincode::deserialize(&bytes)?;
                    cache.restore(file.decode()?);
                    loaded += 1;
                }
            }
        }

        info!(root = %root.display(), partitions = loaded, "opened partition store");
        Ok(Self { root, cache })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &PartitionId) -> PathBuf {
        self.root
            .join(hex::encode(id.tenant.as_bytes()))
            .join(hex::encode(id.table.as_bytes()))
            .join(format!("{:08}.{PARTITION_EXT}", id.index))
    }

    fn persist(&self, partition: &Partition) -> Result<(), DatabaseError> {
        let path = self.path_for(&partition.id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let encoded = bincode::serialize(&PartitionFile::encode(partition)?)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &path)?;

        debug!(partition = %partition.id, version = partition.version, "persisted partition");
        Ok(())
    }
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, DatabaseError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

impl PartitionBackend for DiskBackend {
    fn load_table(&self, key: &TableKey) -> Result<Vec<Partition>, DatabaseError> {
        self.cache.load_table(key)
    }

    fn partition_ids(&self, key: &TableKey) -> Result<Vec<PartitionId>, DatabaseError> {
        self.cache.partition_ids(key)
    }

    fn load(&self, id: &PartitionId) -> Result<Option<Partition>, DatabaseError> {
        self.cache.load(id)
    }

    fn create(&self, partition: Partition) -> Result<bool, DatabaseError> {
        self.cache.create_with(partition, |p| self.persist(p))
    }

    fn compare_and_swap(
        &self,
        partition: Partition,
        expected_version: u64,
    ) -> Result<bool, DatabaseError> {
        self.cache
            .swap_with(partition, expected_version, |p| self.persist(p))
    }

    fn edit_partition(&self, id: &PartitionId, edit: &mut PartitionEdit<'_>) -> Result<EditOutcome, DatabaseError> {
        self.cache.edit_with(id, edit, |p| self.persist(p))
    }

    fn list_tables(&self, tenant: &str) -> Result<Vec<String>, DatabaseError> {
        self.cache.list_tables(tenant)
    }

    fn tenant_partitions(&self, tenant: &str) -> Result<Vec<Partition>, DatabaseError> {
        self.cache.tenant_partitions(tenant)
    }

    fn tenants(&self) -> Result<Vec<String>, DatabaseError> {
        self.cache.tenants()
    }
}
