//! miniLock key pairs: a Curve25519 private key and the ID of its public key

use minilock_core::{MiniLockError, MiniLockResult};
use secrecy::SecretString;
use tracing::debug;
use x25519_dalek::{x25519, X25519_BASEPOINT_BYTES};

use crate::id::Id;
use crate::kdf::{derive_private_key, KdfParams};
use crate::secret::SecretBytes;
use crate::PUBLIC_KEY_SIZE;

/// A private key and its public miniLock ID. The private key is wiped on drop.
#[derive(Clone)]
pub struct KeyPair {
    private_key: SecretBytes<PUBLIC_KEY_SIZE>,
    public_id: Id,
}

impl KeyPair {
    /// Wrap an existing private key, deriving the public key by base-point
    /// scalar multiplication.
    pub fn from_secret(private_key: SecretBytes<PUBLIC_KEY_SIZE>) -> Self {
        let public_key = x25519(*private_key.as_bytes(), X25519_BASEPOINT_BYTES);
        Self {
            public_id: Id::from_public_key(public_key),
            private_key,
        }
    }

    /// Build from raw private key bytes; fails unless exactly 32 bytes.
    pub fn from_private_key(private_key: &[u8]) -> MiniLockResult<Self> {
        let secret = SecretBytes::from_slice(private_key).ok_or_else(|| {
            MiniLockError::InvalidKey(format!(
                "private key must be {PUBLIC_KEY_SIZE} bytes, got {}",
                private_key.len()
            ))
        })?;
        Ok(Self::from_secret(secret))
    }

    /// Deterministically derive the key pair for (email, passphrase) with
    /// miniLock's scrypt parameters. Identical inputs always give identical keys.
    pub fn from_email_and_password(email: &str, passphrase: &SecretString) -> MiniLockResult<Self> {
        Self::from_email_and_password_with_params(email, passphrase, &KdfParams::default())
    }

    pub fn from_email_and_password_with_params(
        email: &str,
        passphrase: &SecretString,
        params: &KdfParams,
    ) -> MiniLockResult<Self> {
        let private_key = derive_private_key(email, passphrase, params)?;
        let pair = Self::from_secret(private_key);
        debug!(id = %pair.public_id, log_n = params.log_n, "derived key pair");
        Ok(pair)
    }

    /// A fresh random key pair.
    pub fn generate() -> Self {
        Self::from_secret(SecretBytes::random())
    }

    pub fn public_id(&self) -> &Id {
        &self.public_id
    }

    pub fn private_key(&self) -> &SecretBytes<PUBLIC_KEY_SIZE> {
        &self.private_key
    }

    pub(crate) fn box_secret_key(&self) -> crypto_box::SecretKey {
        crypto_box::SecretKey::from(*self.private_key.as_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_id", &self.public_id)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}
