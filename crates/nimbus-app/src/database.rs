//! Database collaborator
//!
//! The ORM/collection layer lives outside this crate. An application only
//! needs the narrow surface defined by [`Database`]: authentication, lifecycle
//! (close/reconnect), collection existence checks, cleaning, migrations, schema
//! sync and a small record store for platform metadata. Handles are produced by
//! a [`DatabaseConnector`], which lets tests count connection opens.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use nimbus_config::{DatabaseConfig, Dialect};
use nimbus_core::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Schema synchronization flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Drop and recreate every table
    pub force: bool,
    /// Alter tables to match the schema
    pub alter: bool,
    /// Allow dropping columns while altering
    pub drop: bool,
}

/// Database handle owned by exactly one application
#[async_trait]
pub trait Database: Send + Sync + fmt::Debug {
    /// Connection descriptor this handle was opened with
    fn options(&self) -> &DatabaseConfig;

    /// Dialect shortcut
    fn dialect(&self) -> Dialect {
        self.options().dialect
    }

    /// Whether the connection has been closed
    fn is_closed(&self) -> bool;

    /// Verify the connection once
    async fn auth(&self) -> Result<()>;

    /// Server version string, e.g. `8.0.34` or `3.45.1`
    async fn server_version(&self) -> Result<String>;

    /// Post-auth preparation (extensions, session settings)
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Reopen a closed connection
    async fn reconnect(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Whether a collection (table) exists
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Create a collection if it does not exist
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Remove all data; with `drop` the collections themselves too
    async fn clean(&self, drop: bool) -> Result<()>;

    /// Synchronize the schema
    async fn sync(&self, options: SyncOptions) -> Result<()>;

    /// Queue a named migration
    fn add_migration(&self, name: &str);

    /// Run pending migrations, returning the executed names in order
    async fn migrate_up(&self) -> Result<Vec<String>>;

    /// Read a record from a collection
    async fn read_record(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Upsert a record into a collection (creating the collection)
    async fn write_record(&self, collection: &str, key: &str, value: Value) -> Result<()>;
}

/// Opens database handles from a descriptor
pub trait DatabaseConnector: Send + Sync + fmt::Debug {
    /// Construct a handle for `app`; connecting is lazy
    fn open(&self, app: &str, options: &DatabaseConfig) -> Result<Arc<dyn Database>>;
}

/// Data shared by every handle opened on the same app/storage pair
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, DashMap<String, Value>>,
    pending_migrations: Mutex<Vec<String>>,
    applied_migrations: DashSet<String>,
}

impl MemoryStore {
    /// Collection names currently present
    pub fn collection_names(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// In-memory database used for embedded setups and tests
#[derive(Debug)]
pub struct MemoryDatabase {
    options: DatabaseConfig,
    store: Arc<MemoryStore>,
    closed: AtomicBool,
    server_version: String,
    failing_auths: AtomicU32,
    auth_calls: AtomicU32,
    failing_close: bool,
}

impl MemoryDatabase {
    /// Open a handle on a fresh store
    pub fn new(options: DatabaseConfig) -> Self {
        Self::with_store(options, Arc::new(MemoryStore::default()))
    }

    /// Open a handle on an existing store
    pub fn with_store(options: DatabaseConfig, store: Arc<MemoryStore>) -> Self {
        let server_version = match options.dialect {
            Dialect::Sqlite => "3.45.1",
            Dialect::Mysql => "8.0.36",
            Dialect::Postgres => "16.2",
        }
        .to_string();

        Self {
            options,
            store,
            closed: AtomicBool::new(false),
            server_version,
            failing_auths: AtomicU32::new(0),
            auth_calls: AtomicU32::new(0),
            failing_close: false,
        }
    }

    /// Report a different server version
    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    /// Fail the first `count` authentication attempts
    pub fn with_failing_auths(self, count: u32) -> Self {
        self.failing_auths.store(count, Ordering::SeqCst);
        self
    }

    /// Make every `close` fail, leaving the handle open
    pub fn with_failing_close(mut self) -> Self {
        self.failing_close = true;
        self
    }

    /// Number of `auth` calls seen
    pub fn auth_calls(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn options(&self) -> &DatabaseConfig {
        &self.options
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn auth(&self) -> Result<()> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failing_auths.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_auths.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::database(format!(
                "unable to connect to {}",
                self.options.storage
            )));
        }

        Ok(())
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.server_version.clone())
    }

    async fn reconnect(&self) -> Result<()> {
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.failing_close {
            return Err(Error::database(format!(
                "unable to close {}",
                self.options.storage
            )));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.collections.contains_key(name))
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.store
            .collections
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn clean(&self, drop: bool) -> Result<()> {
        if drop {
            self.store.collections.clear();
            self.store.applied_migrations.clear();
        } else {
            for collection in self.store.collections.iter() {
                collection.value().clear();
            }
        }
        Ok(())
    }

    async fn sync(&self, options: SyncOptions) -> Result<()> {
        if options.force {
            for collection in self.store.collections.iter() {
                collection.value().clear();
            }
        }
        Ok(())
    }

    fn add_migration(&self, name: &str) {
        let mut pending = self.store.pending_migrations.lock();
        if !pending.iter().any(|queued| queued == name) {
            pending.push(name.to_string());
        }
    }

    async fn migrate_up(&self) -> Result<Vec<String>> {
        let pending: Vec<String> = std::mem::take(&mut *self.store.pending_migrations.lock());
        let mut executed = Vec::new();

        for name in pending {
            if self.store.applied_migrations.insert(name.clone()) {
                executed.push(name);
            }
        }

        Ok(executed)
    }

    async fn read_record(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .store
            .collections
            .get(collection)
            .and_then(|records| records.get(key).map(|value| value.clone())))
    }

    async fn write_record(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        self.store
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Connector handing out [`MemoryDatabase`] handles
///
/// Handles opened for the same application and storage share one
/// [`MemoryStore`], so a reload sees the data written before it. Different
/// applications never share a store.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    stores: DashMap<String, Arc<MemoryStore>>,
    opens: AtomicUsize,
    server_version: Option<String>,
    failing_auths: u32,
    failing_close: bool,
}

impl MemoryConnector {
    /// Create a connector with no stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles report this server version
    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = Some(version.into());
        self
    }

    /// Each handle fails its first `count` authentications
    pub fn with_failing_auths(mut self, count: u32) -> Self {
        self.failing_auths = count;
        self
    }

    /// Handles fail every `close`
    pub fn with_failing_close(mut self) -> Self {
        self.failing_close = true;
        self
    }

    /// Number of handles opened so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Store backing `app`/`storage`, if opened
    pub fn store(&self, app: &str, storage: &str) -> Option<Arc<MemoryStore>> {
        self.stores
            .get(&store_key(app, storage))
            .map(|store| Arc::clone(store.value()))
    }
}

impl DatabaseConnector for MemoryConnector {
    fn open(&self, app: &str, options: &DatabaseConfig) -> Result<Arc<dyn Database>> {
        let store = Arc::clone(
            self.stores
                .entry(store_key(app, &options.storage))
                .or_default()
                .value(),
        );

        self.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(app = %app, dialect = %options.dialect, storage = %options.storage, "Opening database handle");

        let mut db = MemoryDatabase::with_store(options.clone(), store)
            .with_failing_auths(self.failing_auths);
        if let Some(version) = &self.server_version {
            db = db.with_server_version(version.clone());
        }
        if self.failing_close {
            db = db.with_failing_close();
        }

        Ok(Arc::new(db))
    }
}

fn store_key(app: &str, storage: &str) -> String {
    format!("{app}::{storage}")
}
