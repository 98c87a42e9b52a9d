//! Header codec: per-recipient envelopes carrying the file key
//!
//! ```text
//! decryptInfo[b64(nonce_i)] = box(ephemeral sk, recipient_i pk, nonce_i) {
//!     senderID, recipientID,
//!     fileInfo: b64(box(sender sk, recipient_i pk, nonce_i) { fileKey, fileNonce, fileHash })
//! }
//! ```
//!
//! The ephemeral layer hides the sender from non-recipients; the inner layer
//! authenticates the file key as coming from `senderID`. Box ciphertexts are
//! laid out MAC || ciphertext.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::AeadInPlace;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use minilock_core::{MiniLockError, MiniLockResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::format::{FILE_NONCE_SIZE, VERSION};
use crate::id::Id;
use crate::keys::KeyPair;
use crate::secret::SecretBytes;
use crate::{HASH_SIZE, KEY_SIZE, MAC_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE};

/// Wire form of the innermost envelope: base64 file key, file nonce and
/// ciphertext hash. Wiped on drop since it carries the file key.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct FileInfo {
    #[serde(rename = "fileKey")]
    pub file_key: String,
    #[serde(rename = "fileNonce")]
    pub file_nonce: String,
    #[serde(rename = "fileHash")]
    pub file_hash: String,
}

impl std::fmt::Debug for FileInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileInfo")
            .field("file_key", &"[REDACTED]")
            .field("file_nonce", &self.file_nonce)
            .field("file_hash", &self.file_hash)
            .finish()
    }
}

/// Decoded file key material: everything a recipient needs to open the payload.
#[derive(Clone)]
pub struct FileKeyMaterial {
    pub key: SecretBytes<KEY_SIZE>,
    pub nonce: [u8; FILE_NONCE_SIZE],
    pub hash: [u8; HASH_SIZE],
}

impl FileKeyMaterial {
    pub fn to_file_info(&self) -> FileInfo {
        FileInfo {
            file_key: BASE64.encode(self.key.as_bytes()),
            file_nonce: BASE64.encode(self.nonce),
            file_hash: BASE64.encode(self.hash),
        }
    }

    /// Decode and size-check a `FileInfo`.
    pub fn from_file_info(info: &FileInfo) -> MiniLockResult<Self> {
        let key = Zeroizing::new(decode_field("fileKey", &info.file_key)?);
        let key = SecretBytes::from_slice(&key)
            .ok_or_else(|| corrupt(format!("fileKey is {} bytes", key.len())))?;

        let nonce = decode_field("fileNonce", &info.file_nonce)?;
        let nonce: [u8; FILE_NONCE_SIZE] = nonce
            .as_slice()
            .try_into()
            .map_err(|_| corrupt(format!("fileNonce is {} bytes", nonce.len())))?;

        let hash = decode_field("fileHash", &info.file_hash)?;
        let hash: [u8; HASH_SIZE] = hash
            .as_slice()
            .try_into()
            .map_err(|_| corrupt(format!("fileHash is {} bytes", hash.len())))?;

        Ok(Self { key, nonce, hash })
    }
}

impl std::fmt::Debug for FileKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeyMaterial")
            .field("key", &"[REDACTED]")
            .field("nonce", &BASE64.encode(self.nonce))
            .field("hash", &BASE64.encode(self.hash))
            .finish()
    }
}

/// A recipient's opened `decryptInfo` entry. `file_info` is still sealed
/// with the sender's key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptInfo {
    #[serde(rename = "senderID")]
    pub sender_id: Id,
    #[serde(rename = "recipientID")]
    pub recipient_id: Id,
    #[serde(rename = "fileInfo")]
    pub file_info: String,
    /// Nonce of the header entry this came from; shared by both box layers.
    #[serde(skip)]
    nonce: [u8; NONCE_SIZE],
}

impl DecryptInfo {
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Open the inner envelope with the sender's public key.
    ///
    /// The recipient must be the one named in the entry, which guards against
    /// an entry sealed for someone else being replayed under this nonce.
    pub fn open_file_info(&self, recipient: &KeyPair) -> MiniLockResult<FileKeyMaterial> {
        if recipient.public_id() != &self.recipient_id {
            debug!(recipient = %recipient.public_id(), "decryptInfo names a different recipient");
            return Err(MiniLockError::NotARecipient);
        }

        let sealed = decode_field("fileInfo", &self.file_info)?;
        let json = open(
            &recipient.box_secret_key(),
            self.sender_id.public_key(),
            &self.nonce,
            &sealed,
        )
        .ok_or(MiniLockError::NotARecipient)?;

        let info: FileInfo = serde_json::from_slice(&json)
            .map_err(|e| corrupt(format!("malformed fileInfo: {e}")))?;
        FileKeyMaterial::from_file_info(&info)
    }
}

/// The JSON file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    /// Base64 ephemeral public key, fresh for every header.
    pub ephemeral: String,
    /// Base64 nonce → base64 sealed `DecryptInfo`, one entry per recipient.
    #[serde(rename = "decryptInfo")]
    pub decrypt_info: BTreeMap<String, String>,
}

impl Header {
    /// Seal `material` for every recipient.
    pub fn build(
        sender: &KeyPair,
        recipients: &[Id],
        material: &FileKeyMaterial,
    ) -> MiniLockResult<Self> {
        if recipients.is_empty() {
            return Err(MiniLockError::RecipientListEmpty);
        }

        let file_info = Zeroizing::new(
            serde_json::to_vec(&material.to_file_info())
                .map_err(|e| MiniLockError::HeaderConstruction(format!("fileInfo: {e}")))?,
        );

        let sender_secret = sender.box_secret_key();
        let mut sealed_file_info = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let mut nonce = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce);
            let sealed = seal(&sender_secret, recipient.public_key(), &nonce, &file_info)?;
            sealed_file_info.push((nonce, sealed));
        }

        let ephemeral = SecretBytes::<KEY_SIZE>::random();
        let ephemeral_secret = SecretKey::from(*ephemeral.as_bytes());
        let ephemeral_public = ephemeral_secret.public_key();

        let mut decrypt_info = BTreeMap::new();
        for (recipient, (nonce, sealed)) in recipients.iter().zip(sealed_file_info) {
            let entry = DecryptInfo {
                sender_id: sender.public_id().clone(),
                recipient_id: recipient.clone(),
                file_info: BASE64.encode(sealed),
                nonce,
            };
            let json = serde_json::to_vec(&entry)
                .map_err(|e| MiniLockError::HeaderConstruction(format!("decryptInfo: {e}")))?;
            let sealed = seal(&ephemeral_secret, recipient.public_key(), &nonce, &json)?;
            decrypt_info.insert(BASE64.encode(nonce), BASE64.encode(sealed));
        }

        debug!(recipients = recipients.len(), "built header");
        Ok(Self {
            version: VERSION,
            ephemeral: BASE64.encode(ephemeral_public.as_bytes()),
            decrypt_info,
        })
    }

    /// Trial-decrypt every entry with `recipient`'s key; the first that opens
    /// and parses wins. Malformed entries are skipped.
    pub fn open_decrypt_info(&self, recipient: &KeyPair) -> MiniLockResult<DecryptInfo> {
        let ephemeral = decode_field("ephemeral", &self.ephemeral)?;
        let ephemeral: [u8; PUBLIC_KEY_SIZE] = ephemeral
            .as_slice()
            .try_into()
            .map_err(|_| corrupt(format!("ephemeral key is {} bytes", ephemeral.len())))?;

        let secret = recipient.box_secret_key();
        for (nonce_b64, sealed_b64) in &self.decrypt_info {
            let Ok(nonce) = BASE64.decode(nonce_b64) else {
                trace!("skipping entry with undecodable nonce");
                continue;
            };
            let Ok(nonce) = <[u8; NONCE_SIZE]>::try_from(nonce.as_slice()) else {
                trace!(len = nonce.len(), "skipping entry with wrong nonce size");
                continue;
            };
            let Ok(sealed) = BASE64.decode(sealed_b64) else {
                trace!("skipping entry with undecodable ciphertext");
                continue;
            };
            let Some(json) = open(&secret, &ephemeral, &nonce, &sealed) else {
                continue;
            };

            match serde_json::from_slice::<DecryptInfo>(&json) {
                Ok(mut info) => {
                    info.nonce = nonce;
                    debug!(sender = %info.sender_id, "opened decryptInfo entry");
                    return Ok(info);
                }
                Err(e) => trace!(error = %e, "skipping entry with malformed decryptInfo"),
            }
        }

        Err(MiniLockError::NotARecipient)
    }

    /// Both layers in one step: the sender's ID and the file key material.
    pub fn open(&self, recipient: &KeyPair) -> MiniLockResult<(Id, FileKeyMaterial)> {
        let info = self.open_decrypt_info(recipient)?;
        let material = info.open_file_info(recipient)?;
        Ok((info.sender_id, material))
    }

    /// Compact JSON bytes as embedded in the container.
    pub fn to_json(&self) -> MiniLockResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| MiniLockError::HeaderConstruction(format!("header: {e}")))
    }

    pub fn from_json(bytes: &[u8]) -> MiniLockResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("malformed header: {e}")))
    }
}

fn corrupt(reason: String) -> MiniLockError {
    MiniLockError::CorruptFile(reason)
}

fn decode_field(field: &str, value: &str) -> MiniLockResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| corrupt(format!("{field} is not valid base64: {e}")))
}

/// NaCl box: MAC || ciphertext.
fn seal(
    secret: &SecretKey,
    public: &[u8; PUBLIC_KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> MiniLockResult<Vec<u8>> {
    let salsa_box = SalsaBox::new(&PublicKey::from(*public), secret);

    let mut sealed = vec![0u8; MAC_SIZE + plaintext.len()];
    sealed[MAC_SIZE..].copy_from_slice(plaintext);
    let tag = salsa_box
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", &mut sealed[MAC_SIZE..])
        .map_err(|e| MiniLockError::HeaderConstruction(format!("box: {e}")))?;
    sealed[..MAC_SIZE].copy_from_slice(&tag);
    Ok(sealed)
}

fn open(
    secret: &SecretKey,
    public: &[u8; PUBLIC_KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    sealed: &[u8],
) -> Option<Zeroizing<Vec<u8>>> {
    if sealed.len() < MAC_SIZE {
        return None;
    }
    let (tag, ciphertext) = sealed.split_at(MAC_SIZE);

    let mut plaintext = Zeroizing::new(ciphertext.to_vec());
    SalsaBox::new(&PublicKey::from(*public), secret)
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            &mut plaintext[..],
            GenericArray::from_slice(tag),
        )
        .ok()?;
    Some(plaintext)
}
