use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BookingPolicy;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::sweeper;

/// A loaded tenant: its engine and the hub its LISTEN sessions subscribe to.
#[derive(Clone)]
pub struct Tenant {
    pub engine: Arc<Engine>,
    pub hub: Arc<NotifyHub>,
}

/// Per-tenant engines, keyed by the pgwire database name. A tenant is one
/// salon business: its branches, calendars and appointments share one WAL.
pub struct TenantManager {
    tenants: DashMap<String, Tenant>,
    data_dir: PathBuf,
    compact_threshold: u64,
    policy: BookingPolicy,
    shutdown: CancellationToken,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, policy: BookingPolicy) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
            policy,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        self.tenant(tenant).map(|t| t.engine)
    }

    /// Get or lazily load a tenant, starting its background tasks.
    pub fn tenant(&self, tenant: &str) -> std::io::Result<Tenant> {
        if let Some(t) = self.tenants.get(tenant) {
            return Ok(t.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // Two connections racing on a new tenant must share one engine and one WAL.
        let entry = self.tenants.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let hub = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, hub.clone(), self.policy.clone())?);

        tokio::spawn(sweeper::run_reminders(engine.clone(), self.shutdown.child_token()));
        tokio::spawn(sweeper::run_compactor(
            engine.clone(),
            self.compact_threshold,
            self.shutdown.child_token(),
        ));

        let loaded = Tenant { engine, hub };
        entry.or_insert(loaded.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        info!(tenant = %safe_name, "tenant loaded");
        Ok(loaded)
    }

    /// Stop every tenant's background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
