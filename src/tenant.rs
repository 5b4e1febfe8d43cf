use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::compactor;
use crate::engine::AllocationEngine;
use crate::limits::*;
use crate::registry::Registry;

/// One database's doctors and the engine that books against them.
pub struct Tenant {
    pub registry: Arc<Registry>,
    pub engine: AllocationEngine<Arc<Registry>>,
}

/// Manages per-tenant registries. Each tenant gets its own Registry + WAL + compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    tenants: DashMap<String, Arc<Tenant>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    store_timeout: Option<Duration>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
            store_timeout: None,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Get or lazily open the tenant for a database name.
    ///
    /// Tenants are keyed by their WAL file name, so names that sanitize to
    /// the same file ("clinic.a", "clinica") share one tenant.
    pub fn get_or_create(&self, name: &str) -> std::io::Result<Arc<Tenant>> {
        if name.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = sanitize_name(name);
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if let Some(tenant) = self.tenants.get(&safe_name) {
            return Ok(tenant.value().clone());
        }

        if self.tenants.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // One map entry per WAL file, opened inside the entry guard, so no
        // file ever has two writer tasks. Nothing inside the guard may touch
        // the map again.
        let tenant = match self.tenants.entry(safe_name) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let tenant = self.open_tenant(e.key())?;
                e.insert(tenant.clone());
                tenant
            }
        };
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        Ok(tenant)
    }

    fn open_tenant(&self, safe_name: &str) -> std::io::Result<Arc<Tenant>> {
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let registry = Arc::new(Registry::open(wal_path)?);

        let mut engine = AllocationEngine::new(registry.clone());
        if let Some(timeout) = self.store_timeout {
            engine = engine.with_store_timeout(timeout);
        }

        let compactor_registry = registry.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_registry, threshold).await;
        });

        Ok(Arc::new(Tenant { registry, engine }))
    }
}

/// Keep only path-safe characters; "../x" and "x" map to the same file.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
