// Storage module - partition rows, lifecycle, schemas and metering

mod backend;
mod disk;
mod memory;
pub mod accountant;
pub mod partition_manager;
pub mod schema_registry;

pub use accountant::{PlanLimits, QuotaDecision, StaticPlanLimits, StorageAccountant, UsageReport};
pub use backend::{EditOutcome, PartitionBackend, PartitionEdit};
pub use disk::DiskBackend;
pub use memory::MemoryBackend;
pub use partition_manager::{Inserted, PartitionManager, RowLocation, StreamedDocument, TableStream};
pub use schema_registry::SchemaRegistry;
