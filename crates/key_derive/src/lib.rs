//! Key derivation from a device-bound identity.
//!
//! HKDF with HMAC-SHA-256 (RFC 5869, Extract-then-Expand). No key material is
//! ever persisted: the master key is re-derived from the device identity on
//! every store construction, so the identity source is the only secret input.
//!
//! The default salt and info constants are part of the on-disk compatibility
//! contract: changing them strands every previously stored record.

#![deny(unsafe_code)]

use hkdf::Hkdf;
use seal_core::{Error, Result};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Default HKDF salt. Stable across versions.
pub const DEFAULT_SALT: &[u8] = b"sealstore.kdf.salt.v1";

/// Default HKDF info. Stable across versions.
pub const DEFAULT_INFO: &[u8] = b"sealstore.master-key.v1";

/// Key length used for the AES-256-GCM master key.
pub const MASTER_KEY_LEN: usize = 32;

/// Derives fixed-length keys from an opaque identity byte string.
///
/// Immutable after construction; `derive` is a pure function of
/// (salt, info, identity, length).
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    salt: Vec<u8>,
    info: Vec<u8>,
}

impl KeyDeriver {
    /// Deriver with the library-default salt and info.
    pub fn new() -> Self {
        Self { salt: DEFAULT_SALT.to_vec(), info: DEFAULT_INFO.to_vec() }
    }

    /// Deriver with a caller-supplied info string, for key separation
    /// between application contexts sharing one identity.
    pub fn with_info(info: impl Into<Vec<u8>>) -> Self {
        Self { salt: DEFAULT_SALT.to_vec(), info: info.into() }
    }

    /// Derive `key_len` bytes of key material from `identity`.
    ///
    /// An empty identity or a zero length is an `InvalidArgument`; a length
    /// beyond what HKDF-SHA-256 can expand (255 * 32 bytes) is a
    /// `KeyDerivationFailed`.
    pub fn derive(&self, identity: &[u8], key_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        if identity.is_empty() {
            return Err(Error::InvalidArgument("identity must not be empty".into()));
        }
        if key_len == 0 {
            return Err(Error::InvalidArgument("key length must not be zero".into()));
        }
        let hk = Hkdf::<Sha256>::new(Some(&self.salt), identity);
        let mut okm = Zeroizing::new(vec![0u8; key_len]);
        hk.expand(&self.info, okm.as_mut_slice())
            .map_err(|e| Error::KeyDerivationFailed(e.to_string()))?;
        Ok(okm)
    }

    /// Derive the 32-byte master key for the AEAD codec.
    pub fn derive_key32(&self, identity: &[u8]) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>> {
        let okm = self.derive(identity, MASTER_KEY_LEN)?;
        let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        key.copy_from_slice(&okm);
        Ok(key)
    }
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new()
    }
}
