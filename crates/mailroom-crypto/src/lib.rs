//! Keyed MAC signing and URL-safe base64 shaping for mailroom tokens.
//!
//! The signer holds a 32-byte HMAC-SHA-256 key for the lifetime of the
//! process. The key is zeroized when the signer is dropped.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Size in bytes of the MAC key and the MAC output.
pub const MAC_KEY_SIZE: usize = 32;
pub const MAC_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Errors from MAC signing setup.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("failed to initialize MAC backend: {0}")]
    BackendInit(String),
}

/// A process-wide HMAC-SHA-256 signer over a fixed 32-byte key.
///
/// Not reentrant: `sign` borrows `&self` but the underlying `Mac`
/// construction is cheap enough per call that callers don't need to
/// serialize beyond whatever they already do for stdout writes.
pub struct MacSigner {
    key: [u8; MAC_KEY_SIZE],
}

impl MacSigner {
    /// Installs the key. Fails if `key` is not exactly 32 bytes, or if the
    /// HMAC backend rejects the key (HMAC accepts any key length in
    /// practice, but we still surface backend errors rather than panic).
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != MAC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: MAC_KEY_SIZE,
                actual: key.len(),
            });
        }
        // Validate the backend accepts the key eagerly so `new` fails fast
        // rather than deferring the error to the first `sign` call.
        HmacSha256::new_from_slice(key).map_err(|e| CryptoError::BackendInit(e.to_string()))?;

        let mut owned = [0u8; MAC_KEY_SIZE];
        owned.copy_from_slice(key);
        Ok(Self { key: owned })
    }

    /// Returns the 32-byte HMAC-SHA-256 of `data` under the installed key.
    /// Each call constructs a fresh `Hmac` instance, so calls are
    /// independent of one another.
    pub fn sign(&self, data: &[u8]) -> [u8; MAC_SIZE] {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .expect("key length validated at construction");
        mac.update(data);
        let bytes = mac.finalize().into_bytes();
        let mut out = [0u8; MAC_SIZE];
        out.copy_from_slice(&bytes);
        out
    }
}

impl Drop for MacSigner {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Encodes `bytes` as URL-safe base64 with no padding.
///
/// For a 64-byte input the output is exactly 86 characters.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes a URL-safe, unpadded base64 string back to bytes. Exposed
/// primarily for tests verifying the MAC-agreement / round-trip property.
pub fn decode_url_safe(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s)
}
