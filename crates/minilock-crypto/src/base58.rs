//! Base58 (Bitcoin alphabet) codec used for miniLock IDs

/// Encode bytes as base58. Empty input gives an empty string.
pub fn encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decode a base58 string. Returns `None` for empty input or characters
/// outside the alphabet. Leading '1's decode to leading zero bytes.
pub fn decode(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() {
        return None;
    }
    bs58::decode(s).into_vec().ok()
}
