//! Identity store implementations.
//!
//! [`MemoryStore`] keeps everything in process. [`FileStore`] writes the
//! same data to a JSON file after every mutation.

use crate::traits::IdentityStore;
use hap_core::error::{Result, StoreError};
use hap_crypto::ed25519::IdentityKeyPair;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// A paired controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerRecord {
    /// Long-term Ed25519 public key.
    pub public_key: [u8; 32],
    /// Whether the controller may manage other pairings.
    pub admin: bool,
}

/// In-memory identity store.
pub struct MemoryStore {
    accessory_id: String,
    keypair: IdentityKeyPair,
    controllers: RwLock<HashMap<String, ControllerRecord>>,
}

impl MemoryStore {
    pub fn new(accessory_id: impl Into<String>, keypair: IdentityKeyPair) -> Self {
        Self {
            accessory_id: accessory_id.into(),
            keypair,
            controllers: RwLock::new(HashMap::new()),
        }
    }

    /// Create with a freshly generated accessory key pair.
    pub fn generate<R: RngCore + CryptoRng>(accessory_id: impl Into<String>, rng: &mut R) -> Self {
        Self::new(accessory_id, IdentityKeyPair::generate(rng))
    }

    /// Snapshot of every paired controller.
    pub fn controllers(&self) -> Result<HashMap<String, ControllerRecord>> {
        let guard = self.controllers.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.clone())
    }

    fn insert(&self, controller_id: &str, record: ControllerRecord) -> Result<()> {
        let mut guard = self.controllers.write().map_err(|_| StoreError::Poisoned)?;
        guard.insert(controller_id.to_string(), record);
        Ok(())
    }

    fn remove(&self, controller_id: &str) -> Result<bool> {
        let mut guard = self.controllers.write().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.remove(controller_id).is_some())
    }
}

impl IdentityStore for MemoryStore {
    fn accessory_id(&self) -> String {
        self.accessory_id.clone()
    }

    fn accessory_keypair(&self) -> IdentityKeyPair {
        self.keypair.clone()
    }

    // A poisoned lock reads as "unknown controller", which fails verify.
    fn lookup_controller(&self, controller_id: &str) -> Option<[u8; 32]> {
        let guard = self.controllers.read().ok()?;
        guard.get(controller_id).map(|record| record.public_key)
    }

    fn add_controller(&self, controller_id: &str, public_key: [u8; 32], admin: bool) -> Result<()> {
        self.insert(controller_id, ControllerRecord { public_key, admin })
    }

    fn remove_controller(&self, controller_id: &str) -> Result<()> {
        self.remove(controller_id)?;
        Ok(())
    }

    fn has_controllers(&self) -> Result<bool> {
        let guard = self.controllers.read().map_err(|_| StoreError::Poisoned)?;
        Ok(!guard.is_empty())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedController {
    public_key: String,
    admin: bool,
}

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    accessory_id: String,
    accessory_seed: String,
    #[serde(default)]
    controllers: HashMap<String, PersistedController>,
}

/// Identity store persisted as JSON.
///
/// Keys are hex encoded. The file is rewritten whole on each change, and the
/// in-memory view only changes once that write has succeeded.
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    writes: Mutex<()>,
}

impl FileStore {
    /// Load `path`, or create it with a new accessory key when it is missing.
    ///
    /// An existing file keeps its own accessory id.
    pub fn open_or_create<R: RngCore + CryptoRng>(
        path: impl AsRef<Path>,
        accessory_id: &str,
        rng: &mut R,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let store = Self::load(path)?;
            if store.inner.accessory_id != accessory_id {
                warn!(
                    stored = %store.inner.accessory_id,
                    configured = %accessory_id,
                    "Identity store belongs to a different accessory id, keeping stored id"
                );
            }
            Ok(store)
        } else {
            info!(path = %path.display(), "Creating identity store");
            let store = Self {
                path: path.to_path_buf(),
                inner: MemoryStore::generate(accessory_id, rng),
                writes: Mutex::new(()),
            };
            store.persist(&HashMap::new())?;
            Ok(store)
        }
    }

    /// Load an existing store file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(StoreError::Io)?;
        let persisted: PersistedStore =
            serde_json::from_str(&contents).map_err(StoreError::Serialization)?;

        let seed = decode_key(&persisted.accessory_seed, "accessory_seed")?;
        let inner = MemoryStore::new(persisted.accessory_id, IdentityKeyPair::from_seed(&seed));

        for (id, controller) in persisted.controllers {
            let public_key = decode_key(&controller.public_key, "public_key")?;
            inner.insert(
                &id,
                ControllerRecord {
                    public_key,
                    admin: controller.admin,
                },
            )?;
        }

        debug!(path = %path.display(), "Loaded identity store");
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            writes: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every paired controller.
    pub fn controllers(&self) -> Result<HashMap<String, ControllerRecord>> {
        self.inner.controllers()
    }

    /// Write the accessory identity together with `controllers`.
    fn persist(&self, controllers: &HashMap<String, ControllerRecord>) -> Result<()> {
        let controllers = controllers
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    PersistedController {
                        public_key: hex::encode(record.public_key),
                        admin: record.admin,
                    },
                )
            })
            .collect();

        let persisted = PersistedStore {
            accessory_id: self.inner.accessory_id.clone(),
            accessory_seed: hex::encode(self.inner.keypair.seed()),
            controllers,
        };

        let json = serde_json::to_string_pretty(&persisted).map_err(StoreError::Serialization)?;
        std::fs::write(&self.path, json).map_err(StoreError::Io)?;
        Ok(())
    }
}

impl IdentityStore for FileStore {
    fn accessory_id(&self) -> String {
        self.inner.accessory_id()
    }

    fn accessory_keypair(&self) -> IdentityKeyPair {
        self.inner.accessory_keypair()
    }

    fn lookup_controller(&self, controller_id: &str) -> Option<[u8; 32]> {
        self.inner.lookup_controller(controller_id)
    }

    fn add_controller(&self, controller_id: &str, public_key: [u8; 32], admin: bool) -> Result<()> {
        let _writing = self.writes.lock().map_err(|_| StoreError::Poisoned)?;
        let record = ControllerRecord { public_key, admin };

        let mut controllers = self.inner.controllers()?;
        controllers.insert(controller_id.to_string(), record);
        self.persist(&controllers)?;

        self.inner.insert(controller_id, record)?;
        info!(controller = %controller_id, admin, "Controller paired");
        Ok(())
    }

    fn remove_controller(&self, controller_id: &str) -> Result<()> {
        let _writing = self.writes.lock().map_err(|_| StoreError::Poisoned)?;

        let mut controllers = self.inner.controllers()?;
        if controllers.remove(controller_id).is_none() {
            return Ok(());
        }
        self.persist(&controllers)?;

        self.inner.remove(controller_id)?;
        info!(controller = %controller_id, "Controller removed");
        Ok(())
    }

    fn has_controllers(&self) -> Result<bool> {
        self.inner.has_controllers()
    }
}

fn decode_key(value: &str, field: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)
        .map_err(|e| StoreError::Corrupt(format!("{}: invalid hex: {}", field, e)))?;
    let len = bytes.len();
    let key: [u8; 32] = bytes.try_into().map_err(|_| {
        StoreError::Corrupt(format!("{}: expected 32 bytes, got {}", field, len))
    })?;
    Ok(key)
}
