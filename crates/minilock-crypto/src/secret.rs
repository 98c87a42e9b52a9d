//! Fixed-size secret buffers that are wiped when dropped

use rand::RngCore;
use zeroize::Zeroize;

/// Owns `N` secret bytes (private keys, file keys). Zeroized on drop.
///
/// Not `Copy`; duplicating the secret requires an explicit `clone()`.
#[derive(Clone)]
pub struct SecretBytes<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> SecretBytes<N> {
    pub fn from_bytes(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    /// Copy from a slice, returning `None` unless it is exactly `N` bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; N] = slice.try_into().ok()?;
        Some(Self { bytes })
    }

    /// Fill a new buffer from the thread-local CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; N];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<const N: usize> Drop for SecretBytes<N> {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl<const N: usize> std::fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBytes")
            .field("len", &N)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_requires_exact_length() {
        assert!(SecretBytes::<32>::from_slice(&[1u8; 32]).is_some());
        assert!(SecretBytes::<32>::from_slice(&[1u8; 31]).is_none());
        assert!(SecretBytes::<32>::from_slice(&[1u8; 33]).is_none());
    }

    #[test]
    fn test_random_buffers_differ() {
        let a = SecretBytes::<32>::random();
        let b = SecretBytes::<32>::random();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretBytes::from_bytes([0x41u8; 32]);
        let printed = format!("{secret:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("65"));
    }
}
