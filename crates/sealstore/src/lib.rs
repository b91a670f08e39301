//! sealstore: durable, authenticated at-rest storage bound to one device.
//!
//! The coordinator composes the subsystem crates: keys derived from a
//! device identity (never persisted), an AES-256-GCM codec, a crash-safe
//! record store, and a directory watcher running alongside the store.
//!
//! Storage readiness and watcher readiness are separate: construction fails
//! only if the store cannot come up, while a watcher failure is logged and
//! exposed through [`Sealstore::watcher_active`]. Dropping the coordinator
//! stops the watcher (joining its monitor thread) before the store and its
//! key material are torn down.
//!
//! ```no_run
//! use sealstore::{Config, FixedIdentity, Sealstore};
//!
//! let vault = Sealstore::open(
//!     Config::with_root("/var/lib/sealstore"),
//!     &FixedIdentity::new(&b"DeviceSN001"[..]),
//!     None,
//! )?;
//! vault.store("cfg", &[0x01, 0x02, 0x03])?;
//! assert_eq!(vault.retrieve("cfg")?, vec![0x01, 0x02, 0x03]);
//! # Ok::<(), sealstore::Error>(())
//! ```

#![deny(unsafe_code)]

use dir_watch::DirWatcher;
use key_derive::KeyDeriver;
use record_store::{RecordStore, StoreConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

pub use dir_watch::{EventMask, EventSink, WatchedEvent};
pub use seal_core::{Error, FixedIdentity, IdentityProvider, RecordId, Result};

/// Coordinator configuration: the only end-user surface the core imposes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage root; created if missing, must end up writable.
    pub root: PathBuf,
    /// Optional HKDF info override for key separation between applications
    /// sharing one device identity. Changing it strands existing records.
    pub kdf_info: Option<Vec<u8>>,
}

impl Config {
    /// Config with the default derivation context.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), kdf_info: None }
    }

    /// Override the HKDF info string.
    #[must_use]
    pub fn kdf_info(mut self, info: impl Into<Vec<u8>>) -> Self {
        self.kdf_info = Some(info.into());
        self
    }
}

/// Owning facade over the store and the watcher. Move-only by design: the
/// master key and the monitor thread have exactly one owner.
pub struct Sealstore {
    store: RecordStore,
    watcher: DirWatcher,
    watcher_active: bool,
}

impl Sealstore {
    /// Open storage at `config.root` for the device named by `identity`,
    /// optionally delivering filesystem events on the root to `sink`.
    ///
    /// Fails iff the record store cannot initialize; a watcher bring-up
    /// failure only clears [`watcher_active`](Self::watcher_active).
    pub fn open(
        config: Config,
        identity: &dyn IdentityProvider,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Self> {
        let deriver = match config.kdf_info {
            Some(info) => KeyDeriver::with_info(info),
            None => KeyDeriver::new(),
        };
        let store = RecordStore::open(StoreConfig { root: config.root, deriver }, identity)?;

        let watcher = DirWatcher::new(sink);
        let watcher_active = match watcher.start().and_then(|()| watcher.add_watch(store.root())) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "watcher unavailable; storage continues without change events");
                false
            }
        };

        Ok(Self { store, watcher, watcher_active })
    }

    /// Encrypt and durably persist `plaintext` under `id`.
    pub fn store(&self, id: &str, plaintext: &[u8]) -> Result<()> {
        self.store.store(id, plaintext)
    }

    /// Decrypt and return the record stored under `id`.
    pub fn retrieve(&self, id: &str) -> Result<Vec<u8>> {
        self.store.retrieve(id)
    }

    /// Remove the record stored under `id`. Idempotent.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id)
    }

    /// Whether any version of the record is present on disk.
    pub fn exists(&self, id: &str) -> Result<bool> {
        self.store.exists(id)
    }

    /// Sorted ids of all records with a current (MAIN) version.
    pub fn list(&self) -> Result<Vec<RecordId>> {
        self.store.list()
    }

    /// The storage root in use.
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Whether the change watcher came up and is still running.
    pub fn watcher_active(&self) -> bool {
        self.watcher_active
    }

    /// Stop event delivery early, joining the monitor thread. Storage
    /// operations continue to work.
    pub fn stop_watcher(&mut self) -> Result<()> {
        self.watcher_active = false;
        self.watcher.stop()
    }
}

impl Drop for Sealstore {
    fn drop(&mut self) {
        // Watcher first: its monitor thread must be joined before the store
        // and the key material go away.
        let _ = self.watcher.stop();
    }
}

/// Install a process-wide JSON subscriber with an env filter
/// (`RUST_LOG`, default `info`). Best-effort and idempotent; a caller
/// convenience only; the core never requires global logging.
pub fn init_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
