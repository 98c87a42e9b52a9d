//! Block stream encryption with XSalsa20-Poly1305 (secretbox)
//!
//! Framed block (binary):
//! ```text
//! [4 bytes: plaintext length L, LE][16 bytes: Poly1305 MAC][L bytes: ciphertext]
//! nonce = file_nonce (16 bytes) || block counter (8 bytes, LE); counter MSB set on the last block
//! ```
//!
//! Every framed block is fed into a running BLAKE2s-256 hash, finalized on the
//! last block. Encryptor and decryptor share one state machine (`StreamState`):
//! `Incomplete` until the last block succeeds or any block fails.
//!
//! Instances are single-use and not re-entrant.

use blake2::{Blake2s256, Digest};
use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use minilock_core::{MiniLockError, MiniLockResult};
use rand::RngCore;
use tracing::{debug, trace};

use crate::format::{
    decode_u32_le, encode_u32_le, BLOCK_LENGTH_TAG_SIZE, FILE_NONCE_SIZE, MAX_BLOCK_BYTES,
};
use crate::secret::SecretBytes;
use crate::{HASH_SIZE, KEY_SIZE, MAC_SIZE, NONCE_SIZE};

/// Status of an encryption or decryption stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Incomplete,
    Succeeded,
    Failed,
}

/// Nonce, running hash and status shared by both stream directions.
pub struct StreamState {
    key: SecretBytes<KEY_SIZE>,
    nonce: [u8; NONCE_SIZE],
    hasher: Blake2s256,
    cipher_text_hash: Option<[u8; HASH_SIZE]>,
    status: ProcessStatus,
    blocks: u64,
}

impl StreamState {
    fn new(key: SecretBytes<KEY_SIZE>, file_nonce: [u8; FILE_NONCE_SIZE]) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..FILE_NONCE_SIZE].copy_from_slice(&file_nonce);
        Self {
            key,
            nonce,
            hasher: Blake2s256::new(),
            cipher_text_hash: None,
            status: ProcessStatus::Incomplete,
            blocks: 0,
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn key(&self) -> &SecretBytes<KEY_SIZE> {
        &self.key
    }

    pub fn file_nonce(&self) -> [u8; FILE_NONCE_SIZE] {
        let mut file_nonce = [0u8; FILE_NONCE_SIZE];
        file_nonce.copy_from_slice(&self.nonce[..FILE_NONCE_SIZE]);
        file_nonce
    }

    pub fn cipher_text_hash(&self) -> Option<[u8; HASH_SIZE]> {
        self.cipher_text_hash
    }

    /// Number of blocks processed so far.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    fn ensure_incomplete(&self) -> MiniLockResult<()> {
        match self.status {
            ProcessStatus::Incomplete => Ok(()),
            _ => Err(MiniLockError::ProcessComplete),
        }
    }

    fn cipher(&self) -> XSalsa20Poly1305 {
        XSalsa20Poly1305::new(GenericArray::from_slice(self.key.as_bytes()))
    }

    /// Nonce for the block about to be processed. The last block carries the
    /// counter's most significant bit.
    fn block_nonce(&self, is_last_block: bool) -> [u8; NONCE_SIZE] {
        let mut nonce = self.nonce;
        if is_last_block {
            nonce[NONCE_SIZE - 1] |= 0x80;
        }
        nonce
    }

    /// Little-endian increment of the 8 counter bytes only.
    fn increment_nonce(&mut self) {
        for byte in &mut self.nonce[FILE_NONCE_SIZE..] {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }

    /// Record a successfully processed framed block.
    fn advance(&mut self, framed: &[u8], is_last_block: bool) {
        self.hasher.update(framed);
        self.increment_nonce();
        self.blocks += 1;

        if is_last_block {
            let hasher = std::mem::take(&mut self.hasher);
            let mut hash = [0u8; HASH_SIZE];
            hash.copy_from_slice(&hasher.finalize());
            self.cipher_text_hash = Some(hash);
            self.status = ProcessStatus::Succeeded;
            debug!(blocks = self.blocks, "stream complete");
        }
    }

    fn fail(&mut self, err: MiniLockError) -> MiniLockError {
        self.status = ProcessStatus::Failed;
        err
    }
}

/// Capability shared by `StreamEncryptor` and `StreamDecryptor`.
pub trait StreamProcess {
    fn state(&self) -> &StreamState;

    fn status(&self) -> ProcessStatus {
        self.state().status()
    }

    /// The symmetric key used for the payload.
    fn file_key(&self) -> &SecretBytes<KEY_SIZE> {
        self.state().key()
    }

    /// The random 16-byte prefix of every block nonce.
    fn file_nonce(&self) -> [u8; FILE_NONCE_SIZE] {
        self.state().file_nonce()
    }

    /// BLAKE2s-256 of all framed blocks; `None` until the last block succeeds.
    fn cipher_text_hash(&self) -> Option<[u8; HASH_SIZE]> {
        self.state().cipher_text_hash()
    }
}

/// Encrypts plaintext blocks into framed ciphertext blocks.
pub struct StreamEncryptor {
    state: StreamState,
}

impl StreamEncryptor {
    /// A stream with a random file key and file nonce.
    pub fn new() -> Self {
        Self::with_key(SecretBytes::random())
    }

    /// A stream with the given key and a random file nonce.
    pub fn with_key(key: SecretBytes<KEY_SIZE>) -> Self {
        let mut file_nonce = [0u8; FILE_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut file_nonce);
        Self::with_key_and_nonce(key, file_nonce)
    }

    pub fn with_key_and_nonce(
        key: SecretBytes<KEY_SIZE>,
        file_nonce: [u8; FILE_NONCE_SIZE],
    ) -> Self {
        Self {
            state: StreamState::new(key, file_nonce),
        }
    }

    /// Encrypt one block of 1..=1 MiB plaintext bytes.
    ///
    /// Returns `[4-byte LE length][16-byte MAC][ciphertext]`. Passing
    /// `is_last_block = true` marks the nonce, completes the stream and
    /// finalizes the ciphertext hash.
    pub fn encrypt(&mut self, block: &[u8], is_last_block: bool) -> MiniLockResult<Vec<u8>> {
        self.state.ensure_incomplete()?;

        if block.is_empty() || block.len() > MAX_BLOCK_BYTES {
            return Err(self.state.fail(MiniLockError::InputSizeInvalid(format!(
                "block of {} bytes (expected 1..={MAX_BLOCK_BYTES})",
                block.len()
            ))));
        }

        let nonce = self.state.block_nonce(is_last_block);
        let body_start = BLOCK_LENGTH_TAG_SIZE + MAC_SIZE;

        let mut framed = Vec::with_capacity(body_start + block.len());
        framed.extend_from_slice(&encode_u32_le(block.len())?);
        framed.extend_from_slice(&[0u8; MAC_SIZE]);
        framed.extend_from_slice(block);

        let tag = self
            .state
            .cipher()
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut framed[body_start..]);
        let tag = match tag {
            Ok(tag) => tag,
            Err(e) => {
                return Err(self.state.fail(MiniLockError::InputSizeInvalid(format!(
                    "block encryption failed: {e}"
                ))))
            }
        };
        framed[BLOCK_LENGTH_TAG_SIZE..body_start].copy_from_slice(&tag);

        self.state.advance(&framed, is_last_block);
        trace!(block = self.state.blocks, bytes = block.len(), is_last_block, "encrypted block");
        Ok(framed)
    }
}

impl Default for StreamEncryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamProcess for StreamEncryptor {
    fn state(&self) -> &StreamState {
        &self.state
    }
}

/// Verifies and decrypts framed ciphertext blocks.
pub struct StreamDecryptor {
    state: StreamState,
}

impl StreamDecryptor {
    pub fn new(key: SecretBytes<KEY_SIZE>, file_nonce: [u8; FILE_NONCE_SIZE]) -> Self {
        Self {
            state: StreamState::new(key, file_nonce),
        }
    }

    /// Build from untrusted key/nonce bytes (e.g. from a header).
    pub fn from_slices(key: &[u8], file_nonce: &[u8]) -> MiniLockResult<Self> {
        let key = SecretBytes::from_slice(key).ok_or_else(|| {
            MiniLockError::InputSizeInvalid(format!(
                "file key of {} bytes (expected {KEY_SIZE})",
                key.len()
            ))
        })?;
        let file_nonce: [u8; FILE_NONCE_SIZE] = file_nonce.try_into().map_err(|_| {
            MiniLockError::InputSizeInvalid(format!(
                "file nonce of {} bytes (expected {FILE_NONCE_SIZE})",
                file_nonce.len()
            ))
        })?;
        Ok(Self::new(key, file_nonce))
    }

    /// Decrypt one framed block. The caller must flag the true final block
    /// with `is_last_block`; a wrong flag fails MAC verification.
    pub fn decrypt(&mut self, framed: &[u8], is_last_block: bool) -> MiniLockResult<Vec<u8>> {
        self.state.ensure_incomplete()?;

        let body_start = BLOCK_LENGTH_TAG_SIZE + MAC_SIZE;
        if framed.len() <= body_start {
            return Err(self.state.fail(MiniLockError::InputSizeInvalid(format!(
                "framed block of {} bytes is too short",
                framed.len()
            ))));
        }

        let mut tag_bytes = [0u8; BLOCK_LENGTH_TAG_SIZE];
        tag_bytes.copy_from_slice(&framed[..BLOCK_LENGTH_TAG_SIZE]);
        let length = decode_u32_le(tag_bytes);
        if length > MAX_BLOCK_BYTES || framed.len() != body_start + length {
            return Err(self.state.fail(MiniLockError::InputSizeInvalid(format!(
                "length tag {length} does not match framed block of {} bytes",
                framed.len()
            ))));
        }

        let nonce = self.state.block_nonce(is_last_block);
        let mac = &framed[BLOCK_LENGTH_TAG_SIZE..body_start];
        let mut plaintext = framed[body_start..].to_vec();

        let verified = self.state.cipher().decrypt_in_place_detached(
            GenericArray::from_slice(&nonce),
            b"",
            &mut plaintext,
            GenericArray::from_slice(mac),
        );
        if verified.is_err() {
            debug!(block = self.state.blocks, "MAC verification failed");
            return Err(self.state.fail(MiniLockError::MacVerificationFailed));
        }

        self.state.advance(framed, is_last_block);
        trace!(block = self.state.blocks, bytes = length, is_last_block, "decrypted block");
        Ok(plaintext)
    }
}

impl StreamProcess for StreamDecryptor {
    fn state(&self) -> &StreamState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (StreamEncryptor, StreamDecryptor) {
        let encryptor = StreamEncryptor::new();
        let decryptor = StreamDecryptor::new(encryptor.file_key().clone(), encryptor.file_nonce());
        (encryptor, decryptor)
    }

    fn counter(state: &StreamState) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&state.nonce[FILE_NONCE_SIZE..]);
        u64::from_le_bytes(bytes)
    }

    #[test]
    fn test_single_block_roundtrip() {
        let (mut enc, mut dec) = pair();
        let framed = enc.encrypt(b"hello, miniLock", true).unwrap();
        let plaintext = dec.decrypt(&framed, true).unwrap();

        assert_eq!(plaintext, b"hello, miniLock");
        assert_eq!(enc.status(), ProcessStatus::Succeeded);
        assert_eq!(dec.status(), ProcessStatus::Succeeded);
    }

    #[test]
    fn test_framed_layout() {
        let (mut enc, _) = pair();
        let framed = enc.encrypt(&[0xAAu8; 1000], false).unwrap();

        // length tag (4) + MAC (16) + ciphertext (1000)
        assert_eq!(framed.len(), 4 + 16 + 1000);
        assert_eq!(&framed[..4], &1000u32.to_le_bytes());
        assert_ne!(&framed[20..], &[0xAAu8; 1000][..]);
    }

    #[test]
    fn test_multi_block_hashes_agree() {
        let (mut enc, mut dec) = pair();
        let blocks: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; 100 + i as usize]).collect();

        let framed: Vec<Vec<u8>> = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| enc.encrypt(b, i == blocks.len() - 1).unwrap())
            .collect();
        for (i, f) in framed.iter().enumerate() {
            let pt = dec.decrypt(f, i == framed.len() - 1).unwrap();
            assert_eq!(pt, blocks[i]);
        }

        let hash = enc.cipher_text_hash().unwrap();
        assert_eq!(Some(hash), dec.cipher_text_hash());

        let mut expected = Blake2s256::new();
        for f in &framed {
            expected.update(f);
        }
        assert_eq!(&hash[..], &expected.finalize()[..]);
    }

    #[test]
    fn test_hash_unavailable_until_last_block() {
        let (mut enc, _) = pair();
        enc.encrypt(b"first", false).unwrap();
        assert!(enc.cipher_text_hash().is_none());
        assert_eq!(enc.status(), ProcessStatus::Incomplete);
    }

    #[test]
    fn test_process_complete_after_last_block() {
        let (mut enc, mut dec) = pair();
        let framed = enc.encrypt(b"only", true).unwrap();
        assert!(matches!(
            enc.encrypt(b"more", false),
            Err(MiniLockError::ProcessComplete)
        ));

        dec.decrypt(&framed, true).unwrap();
        assert!(matches!(
            dec.decrypt(&framed, true),
            Err(MiniLockError::ProcessComplete)
        ));
    }

    #[test]
    fn test_block_size_limits() {
        let (mut enc, _) = pair();
        assert!(matches!(
            enc.encrypt(&[], false),
            Err(MiniLockError::InputSizeInvalid(_))
        ));
        assert_eq!(enc.status(), ProcessStatus::Failed);

        let (mut enc, _) = pair();
        let too_big = vec![0u8; MAX_BLOCK_BYTES + 1];
        assert!(enc.encrypt(&too_big, false).is_err());

        let (mut enc, mut dec) = pair();
        let max = vec![7u8; MAX_BLOCK_BYTES];
        let framed = enc.encrypt(&max, true).unwrap();
        assert_eq!(dec.decrypt(&framed, true).unwrap(), max);
    }

    #[test]
    fn test_tampering_any_byte_fails() {
        let (mut enc, _) = pair();
        let framed = enc.encrypt(b"tamper target", true).unwrap();

        // skip the length tag: changing it is a size error, not a MAC error
        for i in BLOCK_LENGTH_TAG_SIZE..framed.len() {
            let mut dec = StreamDecryptor::new(enc.file_key().clone(), enc.file_nonce());
            let mut tampered = framed.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(dec.decrypt(&tampered, true), Err(MiniLockError::MacVerificationFailed)),
                "flip at byte {i} must fail MAC verification"
            );
            assert_eq!(dec.status(), ProcessStatus::Failed);
        }
    }

    #[test]
    fn test_failed_stream_rejects_further_blocks() {
        let (mut enc, mut dec) = pair();
        let mut framed = enc.encrypt(b"block", true).unwrap();
        framed[24] ^= 0xFF;

        assert!(dec.decrypt(&framed, true).is_err());
        framed[24] ^= 0xFF;
        assert!(matches!(
            dec.decrypt(&framed, true),
            Err(MiniLockError::ProcessComplete)
        ));
    }

    #[test]
    fn test_wrong_last_block_flag_fails() {
        let (mut enc, mut dec) = pair();
        let framed = enc.encrypt(b"final block", true).unwrap();
        assert!(matches!(
            dec.decrypt(&framed, false),
            Err(MiniLockError::MacVerificationFailed)
        ));
    }

    #[test]
    fn test_reordered_blocks_fail() {
        let (mut enc, mut dec) = pair();
        let _first = enc.encrypt(b"first", false).unwrap();
        let second = enc.encrypt(b"second", true).unwrap();

        // second block presented first: wrong counter
        assert!(dec.decrypt(&second, false).is_err());
    }

    #[test]
    fn test_length_tag_mismatch_rejected() {
        let (mut enc, mut dec) = pair();
        let mut framed = enc.encrypt(b"abc", true).unwrap();
        framed[..4].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            dec.decrypt(&framed, true),
            Err(MiniLockError::InputSizeInvalid(_))
        ));

        let (_, mut dec) = pair();
        let mut oversized = vec![0u8; 20];
        oversized[..4].copy_from_slice(&((MAX_BLOCK_BYTES + 1) as u32).to_le_bytes());
        assert!(dec.decrypt(&oversized, false).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut enc = StreamEncryptor::new();
        let framed = enc.encrypt(b"secret", true).unwrap();
        let mut dec = StreamDecryptor::new(SecretBytes::random(), enc.file_nonce());
        assert!(matches!(
            dec.decrypt(&framed, true),
            Err(MiniLockError::MacVerificationFailed)
        ));
    }

    #[test]
    fn test_nonce_counter_strictly_increases() {
        let (mut enc, _) = pair();
        let prefix = enc.file_nonce();
        for i in 0..10u64 {
            assert_eq!(counter(&enc.state), i);
            enc.encrypt(b"x", false).unwrap();
            assert_eq!(enc.file_nonce(), prefix, "prefix must never change");
        }
        assert_eq!(counter(&enc.state), 10);
    }

    #[test]
    fn test_nonce_increment_carries() {
        let mut state = StreamState::new(SecretBytes::random(), [9u8; FILE_NONCE_SIZE]);
        state.nonce[FILE_NONCE_SIZE] = 0xFF;
        state.nonce[FILE_NONCE_SIZE + 1] = 0xFF;
        state.increment_nonce();

        assert_eq!(counter(&state), 0x1_0000);
        assert_eq!(&state.nonce[..FILE_NONCE_SIZE], &[9u8; FILE_NONCE_SIZE]);
    }

    #[test]
    fn test_last_block_sets_counter_msb() {
        let state = StreamState::new(SecretBytes::random(), [0u8; FILE_NONCE_SIZE]);
        assert_eq!(state.block_nonce(false)[NONCE_SIZE - 1], 0);
        assert_eq!(state.block_nonce(true)[NONCE_SIZE - 1], 0x80);
    }

    #[test]
    fn test_from_slices_validates_sizes() {
        assert!(StreamDecryptor::from_slices(&[0u8; 32], &[0u8; 16]).is_ok());
        assert!(StreamDecryptor::from_slices(&[0u8; 31], &[0u8; 16]).is_err());
        assert!(StreamDecryptor::from_slices(&[0u8; 32], &[0u8; 24]).is_err());
    }
}
