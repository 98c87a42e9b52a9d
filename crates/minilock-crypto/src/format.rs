//! Constants and small codecs of the miniLock container format

use minilock_core::{MiniLockError, MiniLockResult};

/// Header `version` field written by this implementation
pub const VERSION: u32 = 1;

/// Largest plaintext block carried by one framed block (1 MiB)
pub const MAX_BLOCK_BYTES: usize = 1_048_576;

/// Random prefix of the 24-byte block nonce
pub const FILE_NONCE_SIZE: usize = 16;

/// Little-endian plaintext length prefix of each framed block
pub const BLOCK_LENGTH_TAG_SIZE: usize = 4;

/// Longest embedded filename in bytes; the name block carries one extra NUL
pub const FILE_NAME_MAX_LENGTH: usize = 255;

/// Size of the (always present) first plaintext block
pub const FILE_NAME_BLOCK_SIZE: usize = FILE_NAME_MAX_LENGTH + 1;

pub const MAGIC_BYTES: [u8; 8] = *b"miniLock";

/// Little-endian header length prefix following the magic bytes
pub const HEADER_LENGTH_SIZE: usize = 4;

/// Extension appended to encrypted file names
pub const FILE_EXTENSION: &str = "miniLock";

/// Build the fixed-size name block: UTF-8 name cut to at most 255 bytes
/// (on a character boundary) followed by NUL padding.
pub fn padded_file_name(name: &str) -> [u8; FILE_NAME_BLOCK_SIZE] {
    let mut end = name.len().min(FILE_NAME_MAX_LENGTH);
    while !name.is_char_boundary(end) {
        end -= 1;
    }

    let mut block = [0u8; FILE_NAME_BLOCK_SIZE];
    block[..end].copy_from_slice(&name.as_bytes()[..end]);
    block
}

/// Recover the embedded filename from a decrypted name block.
///
/// The name ends at the first NUL. It must be valid UTF-8 and a single path
/// component so it can be used directly as a destination file name.
pub fn embedded_file_name(block: &[u8]) -> MiniLockResult<String> {
    let end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
    let name =
        std::str::from_utf8(&block[..end]).map_err(|_| MiniLockError::CouldNotDecodeFileName)?;

    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(MiniLockError::CouldNotDecodeFileName);
    }

    Ok(name.to_string())
}

pub fn encode_u32_le(value: usize) -> MiniLockResult<[u8; 4]> {
    let value = u32::try_from(value)
        .map_err(|_| MiniLockError::InputSizeInvalid(format!("{value} does not fit in 32 bits")))?;
    Ok(value.to_le_bytes())
}

pub fn decode_u32_le(bytes: [u8; 4]) -> usize {
    u32::from_le_bytes(bytes) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes_spell_minilock() {
        assert_eq!(
            MAGIC_BYTES,
            [0x6d, 0x69, 0x6e, 0x69, 0x4c, 0x6f, 0x63, 0x6b]
        );
    }

    #[test]
    fn test_padded_file_name_roundtrip() {
        let block = padded_file_name("report.pdf");
        assert_eq!(block.len(), 256);
        assert_eq!(&block[..10], b"report.pdf");
        assert!(block[10..].iter().all(|&b| b == 0));
        assert_eq!(embedded_file_name(&block).unwrap(), "report.pdf");
    }

    #[test]
    fn test_long_name_truncated_to_255_bytes() {
        let name = "a".repeat(300);
        let block = padded_file_name(&name);
        assert_eq!(block[254], b'a');
        assert_eq!(block[255], 0);
        assert_eq!(embedded_file_name(&block).unwrap().len(), 255);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // 254 ASCII bytes then a 2-byte character straddling the limit
        let name = format!("{}é", "b".repeat(254));
        let block = padded_file_name(&name);
        let decoded = embedded_file_name(&block).unwrap();
        assert_eq!(decoded, "b".repeat(254));
    }

    #[test]
    fn test_all_zero_block_is_not_a_name() {
        let block = [0u8; FILE_NAME_BLOCK_SIZE];
        assert!(matches!(
            embedded_file_name(&block),
            Err(MiniLockError::CouldNotDecodeFileName)
        ));
    }

    #[test]
    fn test_invalid_utf8_name_rejected() {
        let mut block = [0u8; FILE_NAME_BLOCK_SIZE];
        block[0] = 0xff;
        block[1] = 0xfe;
        assert!(matches!(
            embedded_file_name(&block),
            Err(MiniLockError::CouldNotDecodeFileName)
        ));
    }

    #[test]
    fn test_path_traversal_name_rejected() {
        for name in ["../etc/passwd", "..", "dir/file.txt", "a\\b"] {
            let block = padded_file_name(name);
            assert!(embedded_file_name(&block).is_err(), "{name} must be rejected");
        }
    }

    #[test]
    fn test_u32_le_codec() {
        assert_eq!(encode_u32_le(0x0102_0304).unwrap(), [4, 3, 2, 1]);
        assert_eq!(decode_u32_le([4, 3, 2, 1]), 0x0102_0304);
    }
}
