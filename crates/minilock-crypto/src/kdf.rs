//! Key derivation: (email, passphrase) → BLAKE2s-256 → scrypt → private key

use blake2::digest::generic_array::GenericArray;
use blake2::{Blake2s256, Digest};
use minilock_core::{MiniLockError, MiniLockResult};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::secret::SecretBytes;
use crate::KEY_SIZE;

/// scrypt parameters for passphrase key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N (default: 17, i.e. N = 131072)
    pub log_n: u8,
    /// Block size (default: 8)
    pub r: u32,
    /// Parallelism (default: 1)
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 17,
            r: 8,
            p: 1,
        }
    }
}

/// Derive a 32-byte Curve25519 private key from an email and passphrase.
///
/// The passphrase is hashed with BLAKE2s-256 and the digest is fed to scrypt
/// with the UTF-8 email as salt. No strength policy is applied here.
pub fn derive_private_key(
    email: &str,
    passphrase: &SecretString,
    params: &KdfParams,
) -> MiniLockResult<SecretBytes<KEY_SIZE>> {
    let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, KEY_SIZE)
        .map_err(|e| MiniLockError::KeyDerivation(format!("invalid scrypt params: {e}")))?;

    let mut digest = Zeroizing::new([0u8; KEY_SIZE]);
    let mut hasher = Blake2s256::new();
    hasher.update(passphrase.expose_secret().as_bytes());
    hasher.finalize_into(GenericArray::from_mut_slice(&mut digest[..]));

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    scrypt::scrypt(&digest[..], email.as_bytes(), &scrypt_params, &mut key[..])
        .map_err(|e| MiniLockError::KeyDerivation(format!("scrypt failed: {e}")))?;

    Ok(SecretBytes::from_bytes(*key))
}
