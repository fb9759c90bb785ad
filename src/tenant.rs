use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::compactor;
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::{Tenant, TenantEvent};
use crate::notify::NotifyHub;
use crate::wal::Wal;

const DIRECTORY_WAL: &str = "tenants.wal";

/// Lowercase, trim, drop a `:port` suffix and a trailing root dot.
pub fn normalize_domain(host: &str) -> String {
    let host = host.trim();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn validate_domain(domain: &str) -> Result<(), EngineError> {
    if domain.is_empty() {
        return Err(EngineError::Validation("domain is required".into()));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(EngineError::LimitExceeded("domain too long"));
    }
    let valid = domain
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.');
    if !valid || domain.starts_with('.') || domain.contains("..") {
        return Err(EngineError::Validation(format!("invalid domain: {domain}")));
    }
    Ok(())
}

/// Tenant directory plus the registry of per-tenant engines.
///
/// Tenants are looked up by exact, case-insensitive domain match. There is no
/// fallback tenant: an unknown or inactive hostname is an error.
pub struct TenantManager {
    tenants: DashMap<Ulid, Tenant>,
    /// Normalised domain → tenant id
    by_domain: DashMap<String, Ulid>,
    /// Serializes directory writes so domain uniqueness checks cannot race.
    directory: Mutex<Wal<TenantEvent>>,
    engines: DashMap<Ulid, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> io::Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let wal_path = data_dir.join(DIRECTORY_WAL);
        let records: Vec<TenantEvent> = Wal::replay(&wal_path)?;
        let directory = Wal::open(&wal_path)?;

        let manager = Self {
            tenants: DashMap::new(),
            by_domain: DashMap::new(),
            directory: Mutex::new(directory),
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        };
        for record in &records {
            manager.apply(record);
        }
        info!("tenant directory: {} tenants", manager.tenants.len());
        Ok(manager)
    }

    fn apply(&self, record: &TenantEvent) {
        match record {
            TenantEvent::Registered { id, domain } => {
                self.by_domain.insert(domain.clone(), *id);
                self.tenants.insert(*id, Tenant { id: *id, domain: domain.clone(), active: true });
            }
            TenantEvent::DomainChanged { id, domain } => {
                if let Some(mut t) = self.tenants.get_mut(id) {
                    self.by_domain.remove(&t.domain);
                    self.by_domain.insert(domain.clone(), *id);
                    t.domain = domain.clone();
                }
            }
            TenantEvent::ActiveSet { id, active } => {
                if let Some(mut t) = self.tenants.get_mut(id) {
                    t.active = *active;
                }
            }
        }
    }

    fn persist(wal: &mut Wal<TenantEvent>, record: &TenantEvent) -> Result<(), EngineError> {
        wal.append(record).map_err(|e| {
            tracing::error!("tenant directory write failed: {e}");
            EngineError::Store(e.to_string())
        })
    }

    pub async fn register_tenant(&self, id: Ulid, domain: &str) -> Result<Tenant, EngineError> {
        let domain = normalize_domain(domain);
        validate_domain(&domain)?;

        let mut wal = self.directory.lock().await;
        if self.tenants.len() >= MAX_TENANTS {
            return Err(EngineError::LimitExceeded("too many tenants"));
        }
        if self.tenants.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.by_domain.contains_key(&domain) {
            return Err(EngineError::Validation(format!("domain already registered: {domain}")));
        }

        let record = TenantEvent::Registered { id, domain: domain.clone() };
        Self::persist(&mut wal, &record)?;
        self.apply(&record);
        info!("tenant {id} registered for {domain}");
        Ok(Tenant { id, domain, active: true })
    }

    /// Point a tenant at a new domain. The old domain stops resolving at once.
    pub async fn change_domain(&self, id: Ulid, domain: &str) -> Result<(), EngineError> {
        let domain = normalize_domain(domain);
        validate_domain(&domain)?;

        let mut wal = self.directory.lock().await;
        let current = self.get(&id).ok_or(EngineError::NotFound(id))?;
        if current.domain == domain {
            return Ok(());
        }
        if self.by_domain.contains_key(&domain) {
            return Err(EngineError::Validation(format!("domain already registered: {domain}")));
        }

        let record = TenantEvent::DomainChanged { id, domain: domain.clone() };
        Self::persist(&mut wal, &record)?;
        self.apply(&record);
        info!("tenant {id} moved from {} to {domain}", current.domain);
        Ok(())
    }

    pub async fn set_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let mut wal = self.directory.lock().await;
        let current = self.get(&id).ok_or(EngineError::NotFound(id))?;
        if current.active == active {
            return Ok(());
        }
        let record = TenantEvent::ActiveSet { id, active };
        Self::persist(&mut wal, &record)?;
        self.apply(&record);
        info!("tenant {id} active={active}");
        Ok(())
    }

    pub fn get(&self, id: &Ulid) -> Option<Tenant> {
        self.tenants.get(id).map(|t| t.value().clone())
    }

    /// Map a request hostname to its tenant.
    pub fn resolve(&self, hostname: &str) -> Result<Ulid, EngineError> {
        let domain = normalize_domain(hostname);
        let found = self
            .by_domain
            .get(&domain)
            .map(|e| *e.value())
            .and_then(|id| self.get(&id))
            .filter(|t| t.active);
        match found {
            Some(t) => Ok(t.id),
            None => {
                metrics::counter!(crate::observability::TENANT_RESOLVE_FAILURES_TOTAL).increment(1);
                Err(EngineError::TenantNotFound(domain))
            }
        }
    }

    /// Get or lazily open the engine of a registered tenant.
    pub fn engine(&self, tenant_id: Ulid) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.engines.get(&tenant_id) {
            return Ok(engine.value().clone());
        }
        if !self.tenants.contains_key(&tenant_id) {
            return Err(EngineError::NotFound(tenant_id));
        }

        // The entry lock keeps two connections from opening the same WAL.
        let engine = match self.engines.entry(tenant_id) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{tenant_id}.wal"));
                let notify = Arc::new(NotifyHub::new());
                let engine = Engine::new(tenant_id, wal_path, notify)
                    .map_err(|e| EngineError::Store(e.to_string()))?;
                let engine = Arc::new(engine);
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!("tenant {tenant_id}: engine opened");
        Ok(engine)
    }

    /// Resolve a hostname straight to its engine.
    pub fn engine_for_host(&self, hostname: &str) -> Result<Arc<Engine>, EngineError> {
        self.engine(self.resolve(hostname)?)
    }
}
