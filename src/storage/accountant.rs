use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use super::backend::PartitionBackend;
use crate::types::DatabaseError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Supplies a tenant's subscription storage limit
pub trait PlanLimits: Send + Sync {
    fn plan_limit_mb(&self, tenant: &str) -> f64;
}

/// Fixed limits: one default plus per-tenant overrides
#[derive(Debug, Clone)]
pub struct StaticPlanLimits {
    default_mb: f64,
    overrides: HashMap<String, f64>,
}

impl StaticPlanLimits {
    #[must_use]
    pub fn new(default_mb: f64) -> Self {
        Self {
            default_mb,
            overrides: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: HashMap<String, f64>) -> Self {
        self.overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>, mb: f64) -> Self {
        self.overrides.insert(tenant.into(), mb);
        self
    }
}

impl PlanLimits for StaticPlanLimits {
    fn plan_limit_mb(&self, tenant: &str) -> f64 {
        self.overrides.get(tenant).copied().unwrap_or(self.default_mb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub allowed: bool,
    pub usage_bytes: u64,
    pub incoming_bytes: u64,
    pub limit_bytes: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub tenant: String,
    /// Authoritative, freshly summed
    pub usage_bytes: u64,
    /// Possibly stale estimate for display
    pub cached_bytes: u64,
    pub limit_bytes: u64,
}

/// Byte-accurate storage metering per tenant.
///
/// `estimate_usage` and `check_quota` always re-sum every partition; only
/// `display_usage` consults the cache, which writers clear via `invalidate`.
pub struct StorageAccountant {
    backend: Arc<dyn PartitionBackend>,
    limits: Arc<dyn PlanLimits>,
    display_cache: RwLock<HashMap<String, u64>>,
}

impl StorageAccountant {
    pub fn new(backend: Arc<dyn PartitionBackend>, limits: Arc<dyn PlanLimits>) -> Self {
        Self {
            backend,
            limits,
            display_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Sum of serialized document sizes across every partition of the tenant
    pub fn estimate_usage(&self, tenant: &str) -> Result<u64, DatabaseError> {
        Ok(self
            .backend
            .tenant_partitions(tenant)?
            .iter()
            .map(|p| p.data_bytes())
            .sum())
    }

    #[must_use]
    pub fn limit_bytes(&self, tenant: &str) -> u64 {
        let mb = self.limits.plan_limit_mb(tenant).max(0.0);
        (mb * BYTES_PER_MB) as u64
    }

    pub fn check_quota(&self, tenant: &str, incoming_bytes: u64) -> Result<QuotaDecision, DatabaseError> {
        let usage_bytes = self.estimate_usage(tenant)?;
        let limit_bytes = self.limit_bytes(tenant);
        let allowed = usage_bytes.saturating_add(incoming_bytes) <= limit_bytes;

        let reason = if allowed {
            None
        } else {
            warn!(tenant, usage_bytes, incoming_bytes, limit_bytes, "quota denied");
            Some(format!(
                "storage limit of {:.2} MB reached: {usage_bytes} bytes used, {incoming_bytes} bytes requested",
                limit_bytes as f64 / BYTES_PER_MB
            ))
        };

        Ok(QuotaDecision {
            allowed,
            usage_bytes,
            incoming_bytes,
            limit_bytes,
            reason,
        })
    }

    /// Cached estimate for non-blocking display. Never use for gating.
    pub fn display_usage(&self, tenant: &str) -> Result<u64, DatabaseError> {
        if let Some(bytes) = self.display_cache.read().get(tenant) {
            return Ok(*bytes);
        }
        let bytes = self.estimate_usage(tenant)?;
        self.display_cache.write().insert(tenant.to_string(), bytes);
        Ok(bytes)
    }

    pub fn invalidate(&self, tenant: &str) {
        self.display_cache.write().remove(tenant);
    }

    pub fn usage_report(&self, tenant: &str) -> Result<UsageReport, DatabaseError> {
        Ok(UsageReport {
            tenant: tenant.to_string(),
            cached_bytes: self.display_usage(tenant)?,
            usage_bytes: self.estimate_usage(tenant)?,
            limit_bytes: self.limit_bytes(tenant),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::types::{Document, Partition, TableKey};
    use serde_json::json;

    fn partition_with(tenant: &str, table: &str, docs: &[serde_json::Value]) -> Partition {
        let mut p = Partition::new(TableKey::new(tenant, table).partition(0));
        for d in docs {
            p.push(Document::from_value(d.clone()).unwrap(), 100);
        }
        p
    }

    #[test]
    fn test_usage_sums_serialized_documents() {
        let backend = Arc::new(MemoryBackend::new());
        backend.create(partition_with("a", "x", &[json!({"k": 1})])).unwrap();
        backend.create(partition_with("a", "y", &[json!({"k": "vv"})])).unwrap();
        backend.create(partition_with("b", "x", &[json!({"big": "0123456789"})])).unwrap();

        let acct = StorageAccountant::new(backend, Arc::new(StaticPlanLimits::new(1.0)));
        // {"k":1} = 7 bytes, {"k":"vv"} = 10 bytes
        assert_eq!(acct.estimate_usage("a").unwrap(), 17);
        assert_eq!(acct.estimate_usage("nobody").unwrap(), 0);
    }

    #[test]
    fn test_check_quota_denies_over_limit() {
        let backend = Arc::new(MemoryBackend::new());
        backend.create(partition_with("a", "x", &[json!({"k": 1})])).unwrap();
        // 0.0001 MB = 104 bytes
        let limits = StaticPlanLimits::new(100.0).with_tenant("a", 0.0001);
        let acct = StorageAccountant::new(backend, Arc::new(limits));

        assert!(acct.check_quota("a", 90).unwrap().allowed);
        let denied = acct.check_quota("a", 200).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.usage_bytes, 7);
        assert!(denied.reason.unwrap().contains("storage limit"));
    }

    #[test]
    fn test_display_cache_until_invalidated() {
        let backend = Arc::new(MemoryBackend::new());
        let acct = StorageAccountant::new(
            Arc::clone(&backend) as Arc<dyn PartitionBackend>,
            Arc::new(StaticPlanLimits::new(1.0)),
        );
        assert_eq!(acct.display_usage("a").unwrap(), 0);

        backend.create(partition_with("a", "x", &[json!({"k": 1})])).unwrap();
        assert_eq!(acct.display_usage("a").unwrap(), 0);
        assert_eq!(acct.check_quota("a", 0).unwrap().usage_bytes, 7);

        acct.invalidate("a");
        assert_eq!(acct.display_usage("a").unwrap(), 7);
    }
}
