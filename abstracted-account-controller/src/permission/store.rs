//! Permission storage for controller state
//!
//! Holds the admin record, the managed account's authority, grants, named
//! grants and domain bindings. Reads are fine-grained; writes only happen
//! through [`PermissionStore::commit`], which applies a whole batch's
//! [`ChangeSet`] or nothing.
//!
//! Every commit bumps the store's generation. A change set staged against
//! an older generation is refused with [`StoreError::Conflict`], so two
//! handles sharing one store can never overwrite each other's effects.

use abstracted_account_api::{Address, Grant, GrantKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};
use thiserror::Error;

/// On-disk format version
const STORE_FORMAT_VERSION: u32 = 1;

/// Error type for permission store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access permission store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse permission store: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported permission store format version {0}")]
    UnsupportedVersion(u32),

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Permission store lock poisoned")]
    LockPoisoned,

    #[error("Permission store changed concurrently (staged at generation {expected}, now {found})")]
    Conflict { expected: u64, found: u64 },
}

// ============================================================================
// State records
// ============================================================================

/// The account whose signing authority the controller abstracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedAccount {
    pub address: Address,

    /// Redirected signer; `None` means the account signs for itself
    #[serde(default)]
    pub auth_address: Option<Address>,
}

impl ManagedAccount {
    /// Address currently able to sign for the account
    pub fn authority(&self) -> Address {
        self.auth_address.unwrap_or(self.address)
    }

    /// Move signing authority to `to`; rekeying to itself clears the redirection
    pub fn rekey(&mut self, to: Address) {
        self.auth_address = if to == self.address { None } else { Some(to) };
    }
}

/// Controller-wide record, replaced as a whole on every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Globals {
    /// The controller's own address
    pub controller: Address,
    pub admin: Address,
    pub managed: ManagedAccount,
    pub revocation_authority: Address,
    #[serde(default)]
    pub version: String,
}

impl Globals {
    /// Whether the managed account is under the controller's authority
    pub fn is_self_controlled(&self) -> bool {
        self.managed.authority() == self.controller
    }
}

/// Effects of one batch, applied atomically by [`PermissionStore::commit`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Replacement for the global record
    pub globals: Option<Globals>,
    /// Grant writes; `None` deletes
    pub grants: BTreeMap<GrantKey, Option<Grant>>,
    /// Name writes; `None` deletes
    pub names: BTreeMap<String, Option<GrantKey>>,
    /// New or replaced domain bindings
    pub domains: BTreeMap<Address, String>,
    /// Store generation the changes were staged against; `None` applies
    /// unconditionally
    pub base_generation: Option<u64>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.globals.is_none()
            && self.grants.is_empty()
            && self.names.is_empty()
            && self.domains.is_empty()
    }
}

/// Trait for permission storage
///
/// Framework users implement this trait to plug in their own persistence.
/// `commit` must be all-or-nothing: a failed commit leaves the store exactly
/// as it was. It must also refuse a change set whose `base_generation` is
/// not the current generation, checked under the same lock as the write.
pub trait PermissionStore: Send + Sync {
    /// Counter bumped by every successful commit
    fn generation(&self) -> Result<u64, StoreError>;

    /// Controller-wide record, `None` before creation
    fn globals(&self) -> Result<Option<Globals>, StoreError>;

    /// Grant stored under `key`
    fn grant(&self, key: &GrantKey) -> Result<Option<Grant>, StoreError>;

    /// Grant key registered under `name`
    fn named(&self, name: &str) -> Result<Option<GrantKey>, StoreError>;

    /// Domain label bound to `address`
    fn domain(&self, address: &Address) -> Result<Option<String>, StoreError>;

    /// List all grants
    fn list_grants(&self) -> Result<Vec<(GrantKey, Grant)>, StoreError>;

    /// List all named grants
    fn list_named(&self) -> Result<Vec<(String, GrantKey)>, StoreError>;

    /// List all domain bindings
    fn list_domains(&self) -> Result<Vec<(Address, String)>, StoreError>;

    /// Apply a batch's effects
    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

/// Store contents, shared by the file and memory stores
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreData {
    version: u32,
    #[serde(default)]
    generation: u64,
    #[serde(default)]
    globals: Option<Globals>,
    #[serde(default)]
    grants: BTreeMap<GrantKey, Grant>,
    #[serde(default)]
    names: BTreeMap<String, GrantKey>,
    #[serde(default)]
    domains: BTreeMap<Address, String>,
}

impl StoreData {
    fn new() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            generation: 0,
            globals: None,
            grants: BTreeMap::new(),
            names: BTreeMap::new(),
            domains: BTreeMap::new(),
        }
    }

    fn check(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        match changes.base_generation {
            Some(expected) if expected != self.generation => Err(StoreError::Conflict {
                expected,
                found: self.generation,
            }),
            _ => Ok(()),
        }
    }

    fn apply(&mut self, changes: ChangeSet) {
        self.generation += 1;
        if let Some(globals) = changes.globals {
            self.globals = Some(globals);
        }
        for (key, grant) in changes.grants {
            match grant {
                Some(grant) => self.grants.insert(key, grant),
                None => self.grants.remove(&key),
            };
        }
        for (name, key) in changes.names {
            match key {
                Some(key) => self.names.insert(name, key),
                None => self.names.remove(&name),
            };
        }
        self.domains.extend(changes.domains);
    }
}

fn read_guard(lock: &RwLock<StoreData>) -> Result<RwLockReadGuard<'_, StoreData>, StoreError> {
    lock.read().map_err(|_| StoreError::LockPoisoned)
}

// ============================================================================
// File-based Permission Store
// ============================================================================

/// File-based permission store
///
/// Stores controller state in a JSON file at a configurable location.
/// Default: `~/.config/<app>/controller.json`
pub struct FilePermissionStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl FilePermissionStore {
    /// Create a new file-based store at the specified path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = Self::load(&path)?.unwrap_or_else(StoreData::new);

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Create a store in the default location for an application
    pub fn default_for_app(app_name: &str) -> Result<Self, StoreError> {
        Self::new(Self::default_path(app_name))
    }

    /// Default store location for an application
    pub fn default_path(app_name: &str) -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join(app_name).join("controller.json")
    }

    /// Get the store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Option<StoreData>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let data: StoreData = serde_json::from_reader(reader)?;
        if data.version != STORE_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(data.version));
        }
        Ok(Some(data))
    }

    /// Write `data` next to the store file, then move it into place
    fn save(&self, data: &StoreData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = self.path.with_extension("json.tmp");
        {
            let file = File::create(&staging)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, data)?;
            writer.flush()?;
        }
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl PermissionStore for FilePermissionStore {
    fn generation(&self) -> Result<u64, StoreError> {
        Ok(read_guard(&self.data)?.generation)
    }

    fn globals(&self) -> Result<Option<Globals>, StoreError> {
        Ok(read_guard(&self.data)?.globals.clone())
    }

    fn grant(&self, key: &GrantKey) -> Result<Option<Grant>, StoreError> {
        Ok(read_guard(&self.data)?.grants.get(key).copied())
    }

    fn named(&self, name: &str) -> Result<Option<GrantKey>, StoreError> {
        Ok(read_guard(&self.data)?.names.get(name).copied())
    }

    fn domain(&self, address: &Address) -> Result<Option<String>, StoreError> {
        Ok(read_guard(&self.data)?.domains.get(address).cloned())
    }

    fn list_grants(&self) -> Result<Vec<(GrantKey, Grant)>, StoreError> {
        let data = read_guard(&self.data)?;
        Ok(data.grants.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn list_named(&self) -> Result<Vec<(String, GrantKey)>, StoreError> {
        let data = read_guard(&self.data)?;
        Ok(data.names.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    fn list_domains(&self) -> Result<Vec<(Address, String)>, StoreError> {
        let data = read_guard(&self.data)?;
        Ok(data.domains.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|_| StoreError::LockPoisoned)?;

        // Another process may have written the file since we last loaded it
        if let Some(on_disk) = Self::load(&self.path)? {
            if on_disk.generation != data.generation {
                tracing::debug!(
                    path = %self.path.display(),
                    generation = on_disk.generation,
                    "Reloading permission store written elsewhere"
                );
                *data = on_disk;
            }
        }
        data.check(&changes)?;

        let mut next = data.clone();
        next.apply(changes);
        self.save(&next)?;
        *data = next;
        Ok(())
    }
}

impl std::fmt::Debug for FilePermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePermissionStore")
            .field("path", &self.path)
            .finish()
    }
}

// ============================================================================
// In-Memory Permission Store
// ============================================================================

/// In-memory permission store for testing or ephemeral controllers
pub struct MemoryPermissionStore {
    data: RwLock<StoreData>,
}

impl MemoryPermissionStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::new()),
        }
    }

    /// Get the number of stored grants
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.grants.len()).unwrap_or(0)
    }

    /// Check if the store holds no grants
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn generation(&self) -> Result<u64, StoreError> {
        Ok(read_guard(&self.data)?.generation)
    }

    fn globals(&self) -> Result<Option<Globals>, StoreError> {
        Ok(read_guard(&self.data)?.globals.clone())
    }

    fn grant(&self, key: &GrantKey) -> Result<Option<Grant>, StoreError> {
        Ok(read_guard(&self.data)?.grants.get(key).copied())
    }

    fn named(&self, name: &str) -> Result<Option<GrantKey>, StoreError> {
        Ok(read_guard(&self.data)?.names.get(name).copied())
    }

    fn domain(&self, address: &Address) -> Result<Option<String>, StoreError> {
        Ok(read_guard(&self.data)?.domains.get(address).cloned())
    }

    fn list_grants(&self) -> Result<Vec<(GrantKey, Grant)>, StoreError> {
        let data = read_guard(&self.data)?;
        Ok(data.grants.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn list_named(&self) -> Result<Vec<(String, GrantKey)>, StoreError> {
        let data = read_guard(&self.data)?;
        Ok(data.names.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    fn list_domains(&self) -> Result<Vec<(Address, String)>, StoreError> {
        let data = read_guard(&self.data)?;
        Ok(data.domains.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|_| StoreError::LockPoisoned)?;
        data.check(&changes)?;
        data.apply(changes);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryPermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPermissionStore")
            .field("grants", &self.len())
            .finish()
    }
}

// ============================================================================
// Read-Only Permission Store
// ============================================================================

/// Read-only wrapper for any permission store
///
/// Useful for replicas that answer queries and simulate batches against
/// state owned by another process.
pub struct ReadOnlyPermissionStore<S: PermissionStore> {
    inner: S,
}

impl<S: PermissionStore> ReadOnlyPermissionStore<S> {
    /// Create a read-only wrapper
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: PermissionStore> PermissionStore for ReadOnlyPermissionStore<S> {
    fn generation(&self) -> Result<u64, StoreError> {
        self.inner.generation()
    }

    fn globals(&self) -> Result<Option<Globals>, StoreError> {
        self.inner.globals()
    }

    fn grant(&self, key: &GrantKey) -> Result<Option<Grant>, StoreError> {
        self.inner.grant(key)
    }

    fn named(&self, name: &str) -> Result<Option<GrantKey>, StoreError> {
        self.inner.named(name)
    }

    fn domain(&self, address: &Address) -> Result<Option<String>, StoreError> {
        self.inner.domain(address)
    }

    fn list_grants(&self) -> Result<Vec<(GrantKey, Grant)>, StoreError> {
        self.inner.list_grants()
    }

    fn list_named(&self) -> Result<Vec<(String, GrantKey)>, StoreError> {
        self.inner.list_named()
    }

    fn list_domains(&self) -> Result<Vec<(Address, String)>, StoreError> {
        self.inner.list_domains()
    }

    fn commit(&self, _changes: ChangeSet) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }
}

impl<S: PermissionStore + std::fmt::Debug> std::fmt::Debug for ReadOnlyPermissionStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyPermissionStore")
            .field("inner", &self.inner)
            .finish()
    }
}
