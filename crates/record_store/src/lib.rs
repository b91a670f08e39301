//! Encrypted record store over a single storage root.
//!
//! Each record occupies up to three sibling files:
//!
//! | slot   | path                       |
//! |--------|----------------------------|
//! | MAIN   | `<id>.enc`                 |
//! | BACKUP | `<id>.enc.bak`             |
//! | TEMP   | `<id>.enc.tmp` (staging)   |
//!
//! A record exists iff MAIN or BACKUP exists. Stores atomically replace
//! MAIN and rotate the previous version into BACKUP; retrieval falls back
//! to BACKUP when MAIN is missing or fails authentication, healing MAIN
//! with the backup's raw ciphertext so the original nonce and tag survive.
//! Temp files are only ever observable after a crash and are cleaned up by
//! the next store of the same record.
//!
//! The store holds the derived master key in memory for its lifetime and
//! nothing else; there is no index to rebuild or corrupt.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use aead_codec::AeadCodec;
use key_derive::KeyDeriver;
use seal_core::{Error, IdentityProvider, RecordId, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Suffix of the authoritative ciphertext file.
pub const MAIN_SUFFIX: &str = ".enc";
/// Suffix of the rollback/recovery ciphertext file.
pub const BACKUP_SUFFIX: &str = ".enc.bak";
/// Suffix of the staging file a store writes before the rename chain.
pub const TEMP_SUFFIX: &str = ".enc.tmp";

/// Store construction parameters.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory all record slots live in.
    pub root: PathBuf,
    /// Key deriver; swap the info string to separate application contexts.
    pub deriver: KeyDeriver,
}

impl StoreConfig {
    /// Config with the default deriver.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), deriver: KeyDeriver::new() }
    }
}

/// Record store bound to one root directory and one derived key.
///
/// Not internally concurrent and deliberately not `Clone`: callers serialize
/// access, and key material is never shared across instances.
pub struct RecordStore {
    root: PathBuf,
    key: Zeroizing<[u8; key_derive::MASTER_KEY_LEN]>,
    codec: AeadCodec,
}

// Associated data is unused: key separation comes from the HKDF info
// string, and the frame carries no unencrypted context.
const AAD: &[u8] = b"";

impl RecordStore {
    /// Open (creating if needed) the store at `cfg.root`, deriving the
    /// master key from `identity`.
    pub fn open(cfg: StoreConfig, identity: &dyn IdentityProvider) -> Result<Self> {
        if cfg.root.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("storage root must not be empty".into()));
        }
        durable_io::ensure_dir(&cfg.root)?;
        let identity_bytes = identity.identity()?;
        let key = cfg.deriver.derive_key32(&identity_bytes)?;
        let codec = AeadCodec::new(cfg.root.as_os_str().as_encoded_bytes());
        debug!(root = %cfg.root.display(), "record store opened");
        Ok(Self { root: cfg.root, key, codec })
    }

    /// The storage root this store operates on.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn main_path(&self, id: &RecordId) -> PathBuf {
        self.root.join(format!("{id}{MAIN_SUFFIX}"))
    }

    fn backup_path(&self, id: &RecordId) -> PathBuf {
        self.root.join(format!("{id}{BACKUP_SUFFIX}"))
    }

    fn temp_path(&self, id: &RecordId) -> PathBuf {
        self.root.join(format!("{id}{TEMP_SUFFIX}"))
    }

    /// Encrypt `plaintext` and atomically install it as the record's MAIN
    /// slot, rotating any previous version into BACKUP.
    ///
    /// At every interruption point at least one of {MAIN, BACKUP} holds a
    /// complete ciphertext of either the new or the previous content.
    pub fn store(&self, id: &str, plaintext: &[u8]) -> Result<()> {
        let id = RecordId::new(id)?;
        let blob = self.codec.encrypt(plaintext, &self.key[..], AAD)?;

        let temp = self.temp_path(&id);
        if let Err(e) = durable_io::atomic_write(&temp, &blob) {
            if let Err(cleanup) = durable_io::delete(&temp) {
                warn!(record = %id, error = %cleanup, "failed to clean staging slot");
            }
            return Err(e);
        }

        let main = self.main_path(&id);
        let backup = self.backup_path(&id);
        if durable_io::exists(&main) {
            if let Err(e) = durable_io::delete(&backup) {
                warn!(record = %id, error = %e, "failed to drop previous backup; continuing");
            }
            if let Err(e) = fs::rename(&main, &backup) {
                // The staged file can still become a valid MAIN below.
                warn!(record = %id, error = %e, "failed to rotate main into backup; continuing");
            }
        }

        if let Err(e) = fs::rename(&temp, &main) {
            if !durable_io::exists(&main) && durable_io::exists(&backup) {
                if let Err(restore) = fs::rename(&backup, &main) {
                    warn!(record = %id, error = %restore, "failed to restore previous version");
                }
            }
            if let Err(cleanup) = durable_io::delete(&temp) {
                warn!(record = %id, error = %cleanup, "failed to clean staging slot");
            }
            return Err(Error::file_rename(&temp, &main, e));
        }

        debug!(record = %id, bytes = plaintext.len(), "record stored");
        Ok(())
    }

    /// Decrypt and return the record's current content.
    ///
    /// A MAIN slot that fails authentication is deleted and retrieval falls
    /// back to BACKUP; a successful fallback heals MAIN by rewriting the
    /// backup's raw ciphertext (no re-encryption, so the stored nonce and
    /// tag remain valid under the unchanged key). Healing failures are
    /// logged only; the recovered plaintext is still returned.
    pub fn retrieve(&self, id: &str) -> Result<Vec<u8>> {
        let id = RecordId::new(id)?;
        let main = self.main_path(&id);

        let main_error = match durable_io::read_all(&main) {
            Ok(raw) => match self.codec.decrypt(&raw, &self.key[..], AAD) {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) if is_corrupt_blob(&e) => {
                    warn!(record = %id, error = %e, "main slot failed authentication; removing it");
                    if let Err(rm) = durable_io::delete(&main) {
                        warn!(record = %id, error = %rm, "failed to remove corrupt main slot");
                    }
                    Some(e)
                }
                // Key/codec trouble, not slot corruption: do not destroy data.
                Err(e) => return Err(e),
            },
            Err(Error::PathNotFound(_)) => None,
            Err(e) => {
                warn!(record = %id, error = %e, "main slot unreadable; trying backup");
                Some(e)
            }
        };

        let backup = self.backup_path(&id);
        let raw = match durable_io::read_all(&backup) {
            Ok(raw) => raw,
            Err(Error::PathNotFound(_)) => {
                return Err(match main_error {
                    Some(e) => e,
                    None => Error::DataNotFound(id.into_string()),
                })
            }
            Err(e) => return Err(e),
        };
        let plaintext = self.codec.decrypt(&raw, &self.key[..], AAD)?;

        if let Err(e) = durable_io::atomic_write(&main, &raw) {
            warn!(record = %id, error = %e, "failed to heal main slot from backup");
        }
        info!(record = %id, "record recovered from backup slot");
        Ok(plaintext)
    }

    /// Remove the record's MAIN and BACKUP slots. Absent slots are success;
    /// stale TEMP files are left for the next store to reclaim.
    pub fn delete(&self, id: &str) -> Result<()> {
        let id = RecordId::new(id)?;
        let main_result = durable_io::delete(&self.main_path(&id));
        let backup_result = durable_io::delete(&self.backup_path(&id));
        main_result.and(backup_result)
    }

    /// Whether the record has a MAIN or BACKUP slot. Never decrypts.
    ///
    /// Note the asymmetry with [`list`](Self::list): a BACKUP-only record
    /// exists here but is not enumerated there.
    pub fn exists(&self, id: &str) -> Result<bool> {
        let id = RecordId::new(id)?;
        Ok(durable_io::exists(&self.main_path(&id)) || durable_io::exists(&self.backup_path(&id)))
    }

    /// Ids of all records with a MAIN slot, sorted lexicographically.
    ///
    /// Backup-only records and anything in the reserved temp family are
    /// excluded; main-slot files whose stem is not a valid id are dropped
    /// with a warning.
    pub fn list(&self) -> Result<Vec<RecordId>> {
        let names = durable_io::list_regular(&self.root)?;
        let mut ids = Vec::new();
        for name in names {
            // `.enc.bak` and the `.tmp` family do not end in `.enc`, so the
            // suffix match is the whole filter.
            let Some(stem) = name.strip_suffix(MAIN_SUFFIX) else { continue };
            match RecordId::new(stem) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(file = %name, error = %e, "ignoring main-slot file with invalid name");
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Errors that mean the blob on disk is not a valid frame under our key,
/// as opposed to the codec or key being unusable.
fn is_corrupt_blob(e: &Error) -> bool {
    matches!(
        e,
        Error::AuthenticationFailed | Error::DecryptionFailed | Error::InvalidArgument(_)
    )
}
