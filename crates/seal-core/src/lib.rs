//! sealstore core primitives and shared types.

#![deny(unsafe_code)]

/// Version of the sealstore core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error {
    //! Closed error taxonomy shared by every sealstore subsystem.
    //!
    //! Success is `Ok(())`; everything else is a variant here. Errors flow up
    //! verbatim; only the record store's retrieval path is allowed to
    //! recover, and only as documented there.

    use std::io;
    use std::path::{Path, PathBuf};
    use thiserror::Error;

    /// Result alias used across the workspace.
    pub type Result<T> = std::result::Result<T, Error>;

    /// All failure kinds a sealstore operation can report.
    #[derive(Debug, Error)]
    pub enum Error {
        /// Caller-supplied argument violated a documented constraint.
        #[error("invalid argument: {0}")]
        InvalidArgument(String),
        /// The component was never (or is no longer) usable.
        #[error("not initialized")]
        NotInitialized,
        /// Operation failed for a reason with no narrower kind.
        #[error("operation failed: {0}")]
        OperationFailed(String),
        /// Unclassifiable failure.
        #[error("unknown error: {0}")]
        Unknown(String),

        /// Opening a file failed.
        #[error("open {}: {source}", .path.display())]
        FileOpen {
            /// File that failed to open.
            path: PathBuf,
            /// Underlying OS error.
            source: io::Error,
        },
        /// Reading from an open file failed.
        #[error("read {}: {source}", .path.display())]
        FileRead {
            /// File that failed to read.
            path: PathBuf,
            /// Underlying OS error.
            source: io::Error,
        },
        /// Writing (or syncing) a file failed.
        #[error("write {}: {source}", .path.display())]
        FileWrite {
            /// File that failed to write.
            path: PathBuf,
            /// Underlying OS error.
            source: io::Error,
        },
        /// Removing a file failed for a reason other than absence.
        #[error("remove {}: {source}", .path.display())]
        FileRemove {
            /// File that failed to unlink.
            path: PathBuf,
            /// Underlying OS error.
            source: io::Error,
        },
        /// A rename step failed.
        #[error("rename {} -> {}: {source}", .from.display(), .to.display())]
        FileRename {
            /// Rename source.
            from: PathBuf,
            /// Rename target.
            to: PathBuf,
            /// Underlying OS error.
            source: io::Error,
        },
        /// Path does not exist.
        #[error("path not found: {}", .0.display())]
        PathNotFound(PathBuf),
        /// Permission denied on a path.
        #[error("access denied: {}", .0.display())]
        AccessDenied(PathBuf),

        /// AEAD encryption failed.
        #[error("encryption failed")]
        EncryptionFailed,
        /// Decryption failed before tag verification (cipher setup).
        #[error("decryption failed")]
        DecryptionFailed,
        /// Authentication tag mismatch: tampering or wrong key.
        #[error("authentication failed")]
        AuthenticationFailed,
        /// Key derivation primitive refused the request.
        #[error("key derivation failed: {0}")]
        KeyDerivationFailed(String),
        /// Key material has the wrong shape.
        #[error("invalid key: {0}")]
        InvalidKey(String),
        /// Nonce/IV material has the wrong shape.
        #[error("invalid iv: {0}")]
        InvalidIv(String),
        /// Unexpected failure inside a cryptographic dependency.
        #[error("crypto library error: {0}")]
        CryptoLibrary(String),

        /// No record stored under the given id.
        #[error("data not found: {0}")]
        DataNotFound(String),
        /// Reserved: a record already exists where none may.
        #[error("data already exists: {0}")]
        DataAlreadyExists(String),
        /// Reserved: serializing a value for storage failed.
        #[error("serialization failed: {0}")]
        SerializationFailed(String),
        /// Reserved: deserializing a stored value failed.
        #[error("deserialization failed: {0}")]
        DeserializationFailed(String),

        /// The watcher could not be brought up (or is terminal).
        #[error("watcher start failed: {0}")]
        WatcherStartFailed(String),
        /// The watcher failed to read kernel events.
        #[error("watcher read failed: {0}")]
        WatcherReadFailed(String),
        /// Reserved: sink-side tamper policy.
        #[error("file tampered: {}", .0.display())]
        FileTampered(PathBuf),
    }

    impl Error {
        /// Classify an open failure, preferring the narrow path kinds.
        pub fn file_open(path: &Path, source: io::Error) -> Self {
            Self::classify(path, source, |path, source| Self::FileOpen { path, source })
        }

        /// Classify a read failure.
        pub fn file_read(path: &Path, source: io::Error) -> Self {
            Self::classify(path, source, |path, source| Self::FileRead { path, source })
        }

        /// Classify a write/sync failure.
        pub fn file_write(path: &Path, source: io::Error) -> Self {
            Self::classify(path, source, |path, source| Self::FileWrite { path, source })
        }

        /// Classify an unlink failure. Absence is the caller's successful
        /// case and must be filtered out before calling this.
        pub fn file_remove(path: &Path, source: io::Error) -> Self {
            Self::classify(path, source, |path, source| Self::FileRemove { path, source })
        }

        /// Rename failures keep their own kind: the store's rollback logic
        /// dispatches on it.
        pub fn file_rename(from: &Path, to: &Path, source: io::Error) -> Self {
            Self::FileRename { from: from.to_path_buf(), to: to.to_path_buf(), source }
        }

        fn classify(
            path: &Path,
            source: io::Error,
            fallback: impl FnOnce(PathBuf, io::Error) -> Self,
        ) -> Self {
            match source.kind() {
                io::ErrorKind::NotFound => Self::PathNotFound(path.to_path_buf()),
                io::ErrorKind::PermissionDenied => Self::AccessDenied(path.to_path_buf()),
                _ => fallback(path.to_path_buf(), source),
            }
        }
    }

}

pub mod record {
    //! Record identifiers and their validation rules.

    use super::error::{Error, Result};
    use std::fmt;

    /// A validated record identifier.
    ///
    /// Ids name files directly under the storage root, so the constructor
    /// rejects anything that could escape it: empty strings, `/`, `\`, and
    /// any `..` occurrence.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct RecordId(String);

    impl RecordId {
        /// Validate `id` and wrap it. Violations yield `InvalidArgument`.
        pub fn new(id: impl Into<String>) -> Result<Self> {
            let id = id.into();
            if id.is_empty() {
                return Err(Error::InvalidArgument("record id must not be empty".into()));
            }
            if id.contains('/') || id.contains('\\') {
                return Err(Error::InvalidArgument(format!(
                    "record id {id:?} contains a path separator"
                )));
            }
            if id.contains("..") {
                return Err(Error::InvalidArgument(format!(
                    "record id {id:?} contains a parent-directory sequence"
                )));
            }
            Ok(Self(id))
        }

        /// The validated id as a string slice.
        pub fn as_str(&self) -> &str {
            &self.0
        }

        /// Consume the id, returning the inner string.
        pub fn into_string(self) -> String {
            self.0
        }
    }

    impl fmt::Display for RecordId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl AsRef<str> for RecordId {
        fn as_ref(&self) -> &str {
            &self.0
        }
    }

}

pub mod identity {
    //! Device identity sourcing.

    use super::error::Result;

    /// Supplies the stable device-bound byte string keys are derived from.
    ///
    /// The same device must yield the same identity across reboots; without
    /// that, previously stored records become unrecoverable.
    pub trait IdentityProvider: Send + Sync {
        /// Return the device identity. Must be non-empty on success.
        fn identity(&self) -> Result<Vec<u8>>;
    }

    /// Fixed identity for tests and bring-up.
    pub struct FixedIdentity(Vec<u8>);

    impl FixedIdentity {
        /// Wrap the provided bytes.
        pub fn new(identity: impl Into<Vec<u8>>) -> Self {
            Self(identity.into())
        }
    }

    impl IdentityProvider for FixedIdentity {
        fn identity(&self) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

}

pub use error::{Error, Result};
pub use identity::{FixedIdentity, IdentityProvider};
pub use record::RecordId;
