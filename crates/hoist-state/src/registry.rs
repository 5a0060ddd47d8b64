//! Registry: redb-backed app records plus the proxy port allocator.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use hoist_core::{AppName, AppRecord};

use crate::error::{StateError, StateResult};
use crate::tables::APPS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Default)]
struct RegistryState {
    apps: BTreeMap<AppName, AppRecord>,
    /// Ports handed to first deploys that have not committed yet.
    reserved: HashMap<AppName, u16>,
}

struct Inner {
    db: Database,
    state: RwLock<RegistryState>,
}

/// Thread-safe app registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Open (or create) the registry file at `path` and load every record.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let registry = Self::from_db(db)?;
        info!(?path, apps = registry.len(), "registry opened");
        Ok(registry)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let registry = Self::from_db(db)?;
        debug!("in-memory registry opened");
        Ok(registry)
    }

    fn from_db(db: Database) -> StateResult<Self> {
        // Opening a table in a write transaction creates it if absent.
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(APPS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;

        let mut apps = BTreeMap::new();
        {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(APPS).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record: AppRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                apps.insert(record.name.clone(), record);
            }
        }

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                state: RwLock::new(RegistryState {
                    apps,
                    reserved: HashMap::new(),
                }),
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Records ────────────────────────────────────────────────────

    pub fn get(&self, name: &AppName) -> Option<AppRecord> {
        self.read().apps.get(name).cloned()
    }

    pub fn contains(&self, name: &AppName) -> bool {
        self.read().apps.contains_key(name)
    }

    /// All records, ordered by name.
    pub fn list(&self) -> Vec<AppRecord> {
        self.read().apps.values().cloned().collect()
    }

    /// All app names, ordered.
    pub fn names(&self) -> Vec<String> {
        self.read().apps.keys().map(|n| n.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().apps.is_empty()
    }

    /// Insert or update a record. Clears any pending port reservation for it.
    pub fn put(&self, record: AppRecord) -> StateResult<()> {
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let mut state = self.write();
        // Commit to disk first; memory only changes once the write is durable.
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            table
                .insert(record.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        state.reserved.remove(&record.name);
        debug!(app = %record.name, release = %record.current_release, "app record stored");
        state.apps.insert(record.name.clone(), record);
        Ok(())
    }

    /// Delete a record. Returns it if it existed; its port becomes free.
    pub fn remove(&self, name: &AppName) -> StateResult<Option<AppRecord>> {
        let mut state = self.write();
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            table.remove(name.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        state.reserved.remove(name);
        let removed = state.apps.remove(name);
        debug!(app = %name, existed = removed.is_some(), "app record deleted");
        Ok(removed)
    }

    // ── Ports ──────────────────────────────────────────────────────

    /// Port for `name`: its sticky assignment if it has one, otherwise the
    /// smallest port at or above `base` not assigned or reserved by anyone.
    ///
    /// A fresh allocation is held as a reservation until [`put`](Self::put)
    /// stores a record for the app or [`release_reservation`](Self::release_reservation)
    /// drops it.
    pub fn allocate_port(&self, name: &AppName, base: u16) -> StateResult<u16> {
        let mut state = self.write();
        if let Some(port) = state.apps.get(name).and_then(|r| r.port) {
            return Ok(port);
        }
        if let Some(port) = state.reserved.get(name) {
            return Ok(*port);
        }

        let mut taken: Vec<u16> = state
            .apps
            .values()
            .filter_map(|r| r.port)
            .chain(state.reserved.values().copied())
            .filter(|p| *p >= base)
            .collect();
        taken.sort_unstable();
        taken.dedup();

        let mut candidate = base;
        for port in taken {
            if port != candidate {
                break;
            }
            candidate = candidate
                .checked_add(1)
                .ok_or(StateError::PortsExhausted(base))?;
        }

        state.reserved.insert(name.clone(), candidate);
        debug!(app = %name, port = candidate, "port reserved");
        Ok(candidate)
    }

    /// Drop a pending reservation (first deploy did not commit).
    pub fn release_reservation(&self, name: &AppName) {
        if let Some(port) = self.write().reserved.remove(name) {
            debug!(app = %name, port, "port reservation released");
        }
    }

    /// Port currently assigned to `name`, if any (committed records only).
    pub fn port_of(&self, name: &AppName) -> Option<u16> {
        self.read().apps.get(name).and_then(|r| r.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_core::ReleaseId;

    fn name(s: &str) -> AppName {
        AppName::new(s).unwrap()
    }

    fn record(app: &str, release: u64, port: Option<u16>) -> AppRecord {
        AppRecord {
            name: name(app),
            current_release: ReleaseId(release),
            process_name: app.to_string(),
            health_check_path: Some("/healthz".to_string()),
            port,
            deployed_at: 1000,
        }
    }

    // ── Record CRUD ────────────────────────────────────────────────

    #[test]
    fn put_and_get() {
        let registry = Registry::open_in_memory().unwrap();
        let rec = record("demo", 1, None);
        registry.put(rec.clone()).unwrap();

        assert_eq!(registry.get(&name("demo")), Some(rec));
        assert!(registry.contains(&name("demo")));
        assert!(registry.get(&name("other")).is_none());
    }

    #[test]
    fn update_in_place() {
        let registry = Registry::open_in_memory().unwrap();
        registry.put(record("demo", 1, None)).unwrap();
        registry.put(record("demo", 2, None)).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&name("demo")).unwrap().current_release, ReleaseId(2));
    }

    #[test]
    fn list_is_sorted_by_name() {
        let registry = Registry::open_in_memory().unwrap();
        registry.put(record("web", 1, None)).unwrap();
        registry.put(record("api", 1, None)).unwrap();

        assert_eq!(registry.names(), vec!["api", "web"]);
        assert_eq!(registry.list()[0].name.as_str(), "api");
    }

    #[test]
    fn remove_returns_record() {
        let registry = Registry::open_in_memory().unwrap();
        registry.put(record("demo", 1, None)).unwrap();

        assert!(registry.remove(&name("demo")).unwrap().is_some());
        assert!(registry.remove(&name("demo")).unwrap().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.redb");

        {
            let registry = Registry::open(&path).unwrap();
            registry.put(record("demo", 7, Some(4000))).unwrap();
            registry.put(record("gone", 1, None)).unwrap();
            registry.remove(&name("gone")).unwrap();
        }

        let registry = Registry::open(&path).unwrap();
        assert_eq!(registry.names(), vec!["demo"]);
        assert_eq!(registry.port_of(&name("demo")), Some(4000));
    }

    // ── Ports ──────────────────────────────────────────────────────

    #[test]
    fn ports_fill_lowest_gap() {
        let registry = Registry::open_in_memory().unwrap();
        registry.put(record("a", 1, Some(4000))).unwrap();
        registry.put(record("b", 1, Some(4002))).unwrap();

        assert_eq!(registry.allocate_port(&name("c"), 4000).unwrap(), 4001);
        assert_eq!(registry.allocate_port(&name("d"), 4000).unwrap(), 4003);
    }

    #[test]
    fn ports_are_sticky() {
        let registry = Registry::open_in_memory().unwrap();
        registry.put(record("a", 1, Some(4005))).unwrap();
        assert_eq!(registry.allocate_port(&name("a"), 4000).unwrap(), 4005);
    }

    #[test]
    fn reservation_is_reused_and_unique() {
        let registry = Registry::open_in_memory().unwrap();
        let a = registry.allocate_port(&name("a"), 4000).unwrap();
        let b = registry.allocate_port(&name("b"), 4000).unwrap();
        assert_eq!((a, b), (4000, 4001));

        // Retried first deploy gets the same reservation.
        assert_eq!(registry.allocate_port(&name("a"), 4000).unwrap(), 4000);

        registry.release_reservation(&name("a"));
        assert_eq!(registry.allocate_port(&name("c"), 4000).unwrap(), 4000);
    }

    #[test]
    fn committing_converts_reservation() {
        let registry = Registry::open_in_memory().unwrap();
        let port = registry.allocate_port(&name("a"), 4000).unwrap();
        registry.put(record("a", 1, Some(port))).unwrap();

        assert_eq!(registry.port_of(&name("a")), Some(4000));
        assert_eq!(registry.allocate_port(&name("b"), 4000).unwrap(), 4001);
    }

    #[test]
    fn destroy_frees_port() {
        let registry = Registry::open_in_memory().unwrap();
        registry.put(record("a", 1, Some(4000))).unwrap();
        registry.remove(&name("a")).unwrap();
        assert_eq!(registry.allocate_port(&name("b"), 4000).unwrap(), 4000);
    }

    #[test]
    fn ports_exhausted_at_top_of_range() {
        let registry = Registry::open_in_memory().unwrap();
        registry.put(record("a", 1, Some(u16::MAX))).unwrap();
        let err = registry.allocate_port(&name("b"), u16::MAX).unwrap_err();
        assert!(matches!(err, StateError::PortsExhausted(_)));
    }
}
