//! minilock-crypto: the miniLock multi-recipient file encryption engine
//!
//! Container layout (all integers little-endian):
//! ```text
//! "miniLock" magic (8) || header length (4) || header JSON || framed blocks...
//! framed block = plaintext length L (4) || Poly1305 MAC (16) || XSalsa20 ciphertext (L)
//! ```
//!
//! Key hierarchy:
//! ```text
//! (email, passphrase) ── BLAKE2s-256 → scrypt(N=2^17, r=8, p=1, salt=email) → Curve25519 private key
//!   └── miniLock ID = base58(public key || BLAKE2s-8(public key))
//!
//! Per file:
//!   File key (32 bytes random) + file nonce (16 bytes random)
//!     └── block stream: XSalsa20-Poly1305, nonce = file nonce || LE counter (MSB set on last block)
//!   Header: for each recipient
//!     fileInfo   = box(sender sk, recipient pk, nonce_i) { key, nonce, BLAKE2s(ciphertext) }
//!     decryptInfo = box(ephemeral sk, recipient pk, nonce_i) { senderID, recipientID, fileInfo }
//! ```
//!
//! Stream and header objects are single-use and not thread-safe per instance;
//! independent operations may run concurrently.

pub mod base58;
pub mod file;
pub mod format;
pub mod header;
pub mod id;
pub mod kdf;
pub mod keys;
pub mod secret;
pub mod stream;

pub use file::{
    decrypt_bytes, decrypt_file, encrypt_bytes, encrypt_file, is_encrypted_file, DecryptOptions,
    DecryptedBytes, DecryptedFile, EncryptOptions, ProgressFn,
};
pub use header::{DecryptInfo, FileInfo, FileKeyMaterial, Header};
pub use id::Id;
pub use kdf::KdfParams;
pub use keys::KeyPair;
pub use minilock_core::{MiniLockError, MiniLockResult};
pub use secret::SecretBytes;
pub use stream::{ProcessStatus, StreamDecryptor, StreamEncryptor, StreamProcess, StreamState};

/// Size of a symmetric (secretbox) key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a Curve25519 public or private key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an XSalsa20 nonce (192-bit), for both secretbox and box
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const MAC_SIZE: usize = 16;

/// Size of the BLAKE2s ciphertext hash carried in the header
pub const HASH_SIZE: usize = 32;
