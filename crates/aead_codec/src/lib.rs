//! Authenticated encryption codec for at-rest blobs.
//!
//! Frame layout (compatibility-critical):
//!
//! ```text
//! offset 0      : 12 bytes  nonce
//! offset 12     : N bytes   ciphertext (N >= 0)
//! offset 12 + N : 16 bytes  tag
//! ```
//!
//! Every encrypt samples a fresh random nonce from a per-instance ChaCha20
//! CSPRNG seeded once from OS entropy mixed with a caller personalization
//! string. Deterministic nonces are forbidden: records are rewritten in
//! place under one long-lived key, so nonce reuse would be catastrophic.
//! The 96-bit space keeps the birthday bound far above any realistic
//! rewrite rate.

#![deny(unsafe_code)]

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use seal_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use tracing::warn;
use zeroize::Zeroize;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// Smallest legal blob: empty plaintext still carries nonce and tag.
pub const MIN_BLOB_LEN: usize = NONCE_LEN + TAG_LEN;

/// AES-256-GCM codec with a per-instance nonce source.
///
/// The codec holds no key material; callers pass the key per call. The mutex
/// around the RNG exists so the codec is `Sync`, not to promise concurrent
/// throughput; callers serialize store access anyway.
pub struct AeadCodec {
    rng: Option<Mutex<ChaCha20Rng>>,
}

impl AeadCodec {
    /// Build a codec, seeding its CSPRNG from OS entropy mixed with
    /// `personalization`.
    ///
    /// Seeding failure is latched: the codec constructs, but every
    /// encrypt/decrypt call fails fast with `NotInitialized`.
    pub fn new(personalization: &[u8]) -> Self {
        let mut entropy = [0u8; 32];
        let rng = match OsRng.try_fill_bytes(&mut entropy) {
            Ok(()) => {
                let mut hasher = Sha256::new();
                hasher.update(entropy);
                hasher.update(personalization);
                let mut seed: [u8; 32] = hasher.finalize().into();
                let rng = ChaCha20Rng::from_seed(seed);
                seed.zeroize();
                Some(Mutex::new(rng))
            }
            Err(e) => {
                warn!(error = %e, "csprng seeding failed; codec latched uninitialized");
                None
            }
        };
        entropy.zeroize();
        Self { rng }
    }

    /// Whether the nonce source seeded successfully.
    pub fn is_initialized(&self) -> bool {
        self.rng.is_some()
    }

    /// Encrypt `plaintext` under `key`, binding `aad`, and frame the result.
    ///
    /// Empty plaintext is legal and yields a 28-byte blob.
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let rng = self.rng.as_ref().ok_or(Error::NotInitialized)?;
        check_key(key)?;
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| Error::CryptoLibrary(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rng.lock()
            .map_err(|_| Error::CryptoLibrary("nonce source mutex poisoned".into()))?
            .fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| Error::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Verify and decrypt a framed blob under `key` and `aad`.
    ///
    /// Tag mismatch (tampering or a wrong key) is `AuthenticationFailed`.
    pub fn decrypt(&self, blob: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if self.rng.is_none() {
            return Err(Error::NotInitialized);
        }
        check_key(key)?;
        if blob.len() < MIN_BLOB_LEN {
            return Err(Error::InvalidArgument(format!(
                "blob of {} bytes is below the {MIN_BLOB_LEN}-byte frame minimum",
                blob.len()
            )));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Error::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| Error::AuthenticationFailed)
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() == KEY_LEN {
        Ok(())
    } else {
        Err(Error::InvalidKey(format!("expected {KEY_LEN}-byte key, got {}", key.len())))
    }
}
