//! File format orchestrator: builds and parses whole miniLock containers
//!
//! Encryption streams the payload into a spool first, because the header
//! embeds the ciphertext hash and must precede the payload on disk.
//! Decryption reads one framed block ahead so the true last block can be
//! flagged.
//!
//! File outputs are assembled in a temp file inside the destination
//! directory and persisted without clobbering; a failed run leaves nothing
//! behind.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use minilock_core::{MiniLockError, MiniLockResult};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::format::{
    decode_u32_le, embedded_file_name, encode_u32_le, padded_file_name, BLOCK_LENGTH_TAG_SIZE,
    FILE_EXTENSION, FILE_NAME_BLOCK_SIZE, HEADER_LENGTH_SIZE, MAGIC_BYTES, MAX_BLOCK_BYTES,
};
use crate::header::{FileKeyMaterial, Header};
use crate::id::Id;
use crate::keys::KeyPair;
use crate::stream::{StreamDecryptor, StreamEncryptor, StreamProcess};
use crate::MAC_SIZE;

/// Progress callback, invoked with values in `0.0..=1.0`. May be called from
/// whatever thread runs the operation.
pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;

/// Options for [`encrypt_file`].
#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Output directory (default: the source's directory)
    pub destination_dir: Option<PathBuf>,
    /// Output file name (default: `<source name>.miniLock`)
    pub file_name: Option<String>,
    /// Remove the source after a successful encryption
    pub delete_source: bool,
}

/// Options for [`decrypt_file`].
#[derive(Debug, Clone, Default)]
pub struct DecryptOptions {
    /// Output directory (default: the source's directory)
    pub destination_dir: Option<PathBuf>,
    /// Output file name (default: the name embedded in the container)
    pub file_name: Option<String>,
    /// Remove the container after a successful decryption
    pub delete_source: bool,
}

/// Result of [`decrypt_bytes`].
#[derive(Debug)]
pub struct DecryptedBytes {
    pub data: Vec<u8>,
    pub sender: Id,
    /// Embedded name; `None` when the name block is all zero or not a usable name
    pub file_name: Option<String>,
}

/// Result of [`decrypt_file`].
#[derive(Debug)]
pub struct DecryptedFile {
    pub path: PathBuf,
    pub sender: Id,
    /// Plaintext bytes written
    pub bytes: u64,
}

// ── Probe ────────────────────────────────────────────────────────────────

/// True only when the file starts with the 8 magic bytes. Reads at most 8
/// bytes; an empty or short file is `Ok(false)`.
pub fn is_encrypted_file(path: &Path) -> MiniLockResult<bool> {
    ensure_regular_file(path)?;

    let mut prefix = Vec::with_capacity(MAGIC_BYTES.len());
    File::open(path)?
        .take(MAGIC_BYTES.len() as u64)
        .read_to_end(&mut prefix)?;
    Ok(prefix == MAGIC_BYTES)
}

// ── Encrypt ──────────────────────────────────────────────────────────────

/// Encrypt an in-memory buffer. `file_name` is embedded in the name block;
/// `None` embeds an all-zero block.
pub fn encrypt_bytes(
    data: &[u8],
    file_name: Option<&str>,
    sender: &KeyPair,
    recipients: &[Id],
    progress: Option<&ProgressFn>,
) -> MiniLockResult<Vec<u8>> {
    check_encrypt_inputs(recipients, data.len() as u64, file_name)?;

    let mut payload = Vec::with_capacity(data.len() + data.len() / 64 + 512);
    let material = encrypt_payload(data, data.len() as u64, file_name, &mut payload, progress)?;
    let header = Header::build(sender, recipients, &material)?;

    let mut container = Vec::with_capacity(payload.len() + 1024);
    write_preamble(&mut container, &header)?;
    container.extend_from_slice(&payload);

    debug!(
        bytes = data.len(),
        recipients = recipients.len(),
        "encrypted buffer"
    );
    Ok(container)
}

/// Encrypt `source` into a new container file and return its path.
///
/// The source's file name is embedded in the container. An existing file at
/// the destination is never overwritten; a ` copy` suffix is chosen instead.
pub fn encrypt_file(
    source: &Path,
    options: &EncryptOptions,
    sender: &KeyPair,
    recipients: &[Id],
    progress: Option<&ProgressFn>,
) -> MiniLockResult<PathBuf> {
    if recipients.is_empty() {
        return Err(MiniLockError::RecipientListEmpty);
    }
    let source_len = ensure_regular_file(source)?;
    let source_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    check_encrypt_inputs(recipients, source_len, Some(source_name.as_str()))?;

    let destination_name = match &options.file_name {
        Some(name) if name.is_empty() => return Err(MiniLockError::FileNameEmpty),
        Some(name) => name.clone(),
        None => format!("{source_name}.{FILE_EXTENSION}"),
    };
    let destination_dir = destination_dir(source, options.destination_dir.as_deref());

    // Payload first: its hash goes into the header.
    let mut payload = tempfile::tempfile()?;
    let material = {
        let reader = BufReader::new(File::open(source)?);
        let mut writer = BufWriter::new(&mut payload);
        let material = encrypt_payload(
            reader,
            source_len,
            Some(source_name.as_str()),
            &mut writer,
            progress,
        )?;
        writer.flush()?;
        material
    };
    let header = Header::build(sender, recipients, &material)?;

    let mut container = NamedTempFile::new_in(&destination_dir)?;
    {
        let mut writer = BufWriter::new(container.as_file_mut());
        write_preamble(&mut writer, &header)?;
        payload.seek(SeekFrom::Start(0))?;
        io::copy(&mut payload, &mut writer)?;
        writer.flush()?;
    }

    let destination = persist_unique(container, &destination_dir, &destination_name)?;
    info!(
        source = %source.display(),
        destination = %destination.display(),
        bytes = source_len,
        recipients = recipients.len(),
        "encrypted file"
    );

    if options.delete_source {
        remove_source(source);
    }
    Ok(destination)
}

fn check_encrypt_inputs(
    recipients: &[Id],
    source_len: u64,
    file_name: Option<&str>,
) -> MiniLockResult<()> {
    if recipients.is_empty() {
        return Err(MiniLockError::RecipientListEmpty);
    }
    if file_name.is_some_and(str::is_empty) {
        return Err(MiniLockError::FileNameEmpty);
    }
    if source_len == 0 {
        return Err(MiniLockError::SourceEmpty);
    }
    Ok(())
}

/// Write the name block and every content block to `payload`, returning the
/// key material the header must carry.
fn encrypt_payload<R: Read, W: Write>(
    mut reader: R,
    source_len: u64,
    file_name: Option<&str>,
    payload: &mut W,
    progress: Option<&ProgressFn>,
) -> MiniLockResult<FileKeyMaterial> {
    let mut encryptor = StreamEncryptor::new();

    let name_block = match file_name {
        Some(name) => padded_file_name(name),
        None => [0u8; FILE_NAME_BLOCK_SIZE],
    };
    payload.write_all(&encryptor.encrypt(&name_block, false)?)?;

    let mut current = read_plaintext_block(&mut reader)?;
    if current.is_empty() {
        return Err(MiniLockError::SourceEmpty);
    }

    let mut encrypted = 0u64;
    loop {
        let next = read_plaintext_block(&mut reader)?;
        let is_last_block = next.is_empty();

        payload.write_all(&encryptor.encrypt(&current, is_last_block)?)?;
        encrypted += current.len() as u64;
        report(progress, encrypted, source_len, is_last_block);

        if is_last_block {
            break;
        }
        current = next;
    }

    let hash = encryptor.cipher_text_hash().ok_or_else(|| {
        MiniLockError::HeaderConstruction("stream finished without a ciphertext hash".into())
    })?;
    Ok(FileKeyMaterial {
        key: encryptor.file_key().clone(),
        nonce: encryptor.file_nonce(),
        hash,
    })
}

/// Fill up to one maximum-size block; empty at end of input.
fn read_plaintext_block<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut block = Vec::new();
    reader
        .by_ref()
        .take(MAX_BLOCK_BYTES as u64)
        .read_to_end(&mut block)?;
    Ok(block)
}

fn write_preamble<W: Write>(out: &mut W, header: &Header) -> MiniLockResult<()> {
    let json = header.to_json()?;
    out.write_all(&MAGIC_BYTES)?;
    out.write_all(&encode_u32_le(json.len())?)?;
    out.write_all(&json)?;
    Ok(())
}

// ── Decrypt ──────────────────────────────────────────────────────────────

/// Decrypt an in-memory container.
pub fn decrypt_bytes(
    container: &[u8],
    recipient: &KeyPair,
    progress: Option<&ProgressFn>,
) -> MiniLockResult<DecryptedBytes> {
    let mut data = Vec::new();
    let opened = decrypt_container(container, container.len() as u64, recipient, &mut data, progress)?;

    let file_name = match opened.name_block.first() {
        None | Some(0) => None,
        // The name is informational here; an undecodable one is dropped.
        Some(_) => embedded_file_name(&opened.name_block).ok(),
    };
    debug!(bytes = data.len(), sender = %opened.sender, "decrypted buffer");
    Ok(DecryptedBytes {
        data,
        sender: opened.sender,
        file_name,
    })
}

/// Decrypt a container file. The plaintext lands under the embedded file
/// name unless `options.file_name` overrides it.
pub fn decrypt_file(
    source: &Path,
    options: &DecryptOptions,
    recipient: &KeyPair,
    progress: Option<&ProgressFn>,
) -> MiniLockResult<DecryptedFile> {
    let source_len = ensure_regular_file(source)?;
    if options.file_name.as_deref().is_some_and(str::is_empty) {
        return Err(MiniLockError::FileNameEmpty);
    }
    let destination_dir = destination_dir(source, options.destination_dir.as_deref());

    let mut output = NamedTempFile::new_in(&destination_dir)?;
    let opened = {
        let reader = BufReader::new(File::open(source)?);
        let mut writer = BufWriter::new(output.as_file_mut());
        let opened = decrypt_container(reader, source_len, recipient, &mut writer, progress)?;
        writer.flush()?;
        opened
    };

    let name = match &options.file_name {
        Some(name) => name.clone(),
        None => embedded_file_name(&opened.name_block)?,
    };
    let path = persist_unique(output, &destination_dir, &name)?;
    info!(
        source = %source.display(),
        destination = %path.display(),
        bytes = opened.bytes,
        sender = %opened.sender,
        "decrypted file"
    );

    if options.delete_source {
        remove_source(source);
    }
    Ok(DecryptedFile {
        path,
        sender: opened.sender,
        bytes: opened.bytes,
    })
}

struct OpenedContainer {
    sender: Id,
    name_block: Vec<u8>,
    bytes: u64,
}

/// Parse the preamble, open the header for `recipient` and stream the
/// plaintext into `output`. Nothing written to `output` is trustworthy
/// unless this returns `Ok`.
fn decrypt_container<R: Read, W: Write>(
    mut reader: R,
    container_len: u64,
    recipient: &KeyPair,
    output: &mut W,
    progress: Option<&ProgressFn>,
) -> MiniLockResult<OpenedContainer> {
    let mut magic = [0u8; MAGIC_BYTES.len()];
    read_exact_or_corrupt(&mut reader, &mut magic, "magic bytes")?;
    if magic != MAGIC_BYTES {
        return Err(corrupt("not a miniLock file"));
    }

    let mut length_tag = [0u8; HEADER_LENGTH_SIZE];
    read_exact_or_corrupt(&mut reader, &mut length_tag, "header length")?;
    let header_len = decode_u32_le(length_tag);
    let preamble_len = (MAGIC_BYTES.len() + HEADER_LENGTH_SIZE) as u64 + header_len as u64;
    if header_len == 0 || preamble_len > container_len {
        return Err(corrupt(format!(
            "header length {header_len} does not fit a {container_len}-byte container"
        )));
    }

    let mut header_json = vec![0u8; header_len];
    read_exact_or_corrupt(&mut reader, &mut header_json, "header")?;
    let header = Header::from_json(&header_json)?;
    let (sender, material) = header.open(recipient)?;

    let mut decryptor = StreamDecryptor::new(material.key.clone(), material.nonce);
    let mut consumed = preamble_len;

    let name_framed =
        read_framed_block(&mut reader)?.ok_or_else(|| corrupt("missing file name block"))?;
    let name_block = decryptor
        .decrypt(&name_framed, false)
        .map_err(stream_failure)?;
    if name_block.len() != FILE_NAME_BLOCK_SIZE {
        return Err(corrupt(format!(
            "file name block is {} bytes",
            name_block.len()
        )));
    }
    consumed += name_framed.len() as u64;

    let mut current =
        read_framed_block(&mut reader)?.ok_or_else(|| corrupt("no content blocks"))?;
    let mut bytes = 0u64;
    loop {
        let next = read_framed_block(&mut reader)?;
        let is_last_block = next.is_none();

        let plaintext = decryptor
            .decrypt(&current, is_last_block)
            .map_err(stream_failure)?;
        output.write_all(&plaintext)?;
        bytes += plaintext.len() as u64;
        consumed += current.len() as u64;
        report(progress, consumed, container_len, is_last_block);

        match next {
            Some(block) => current = block,
            None => break,
        }
    }

    if decryptor.cipher_text_hash() != Some(material.hash) {
        return Err(corrupt("ciphertext hash does not match header"));
    }

    Ok(OpenedContainer {
        sender,
        name_block,
        bytes,
    })
}

/// Read one framed block (length tag, MAC, ciphertext). `None` at a clean
/// end of input; anything partial is corruption.
fn read_framed_block<R: Read>(reader: &mut R) -> MiniLockResult<Option<Vec<u8>>> {
    let mut tag = Vec::with_capacity(BLOCK_LENGTH_TAG_SIZE);
    reader
        .by_ref()
        .take(BLOCK_LENGTH_TAG_SIZE as u64)
        .read_to_end(&mut tag)?;
    match tag.len() {
        0 => return Ok(None),
        BLOCK_LENGTH_TAG_SIZE => {}
        n => return Err(corrupt(format!("truncated block length ({n} bytes)"))),
    }

    let mut length = [0u8; BLOCK_LENGTH_TAG_SIZE];
    length.copy_from_slice(&tag);
    let length = decode_u32_le(length);
    if length == 0 || length > MAX_BLOCK_BYTES {
        return Err(corrupt(format!("block length {length} out of range")));
    }

    let mut framed = vec![0u8; BLOCK_LENGTH_TAG_SIZE + MAC_SIZE + length];
    framed[..BLOCK_LENGTH_TAG_SIZE].copy_from_slice(&tag);
    read_exact_or_corrupt(reader, &mut framed[BLOCK_LENGTH_TAG_SIZE..], "block")?;
    Ok(Some(framed))
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> MiniLockResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => corrupt(format!("truncated {what}")),
        _ => MiniLockError::Io(e),
    })
}

/// Stream failures while reading a container are all corruption.
fn stream_failure(err: MiniLockError) -> MiniLockError {
    match err {
        MiniLockError::MacVerificationFailed => corrupt("block failed MAC verification"),
        MiniLockError::InputSizeInvalid(reason) => corrupt(reason),
        other => other,
    }
}

fn corrupt(reason: impl Into<String>) -> MiniLockError {
    MiniLockError::CorruptFile(reason.into())
}

// ── Shared helpers ───────────────────────────────────────────────────────

fn report(progress: Option<&ProgressFn>, done: u64, total: u64, finished: bool) {
    let Some(progress) = progress else {
        return;
    };
    let fraction = if finished || total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    };
    progress(fraction);
}

/// Length of `path`, or `NotAFile` unless it is a regular file.
fn ensure_regular_file(path: &Path) -> MiniLockResult<u64> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(MiniLockError::NotAFile(path.to_path_buf())),
    }
}

fn destination_dir(source: &Path, requested: Option<&Path>) -> PathBuf {
    match requested {
        Some(dir) => dir.to_path_buf(),
        None => match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
    }
}

/// First free name among `name`, `stem copy.ext`, `stem copy 2.ext`, ...
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut copy = 1u64;
    loop {
        let suffix = match copy {
            1 => " copy".to_string(),
            n => format!(" copy {n}"),
        };
        let file_name = match &extension {
            Some(ext) => format!("{stem}{suffix}.{ext}"),
            None => format!("{stem}{suffix}"),
        };
        let candidate = dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        copy += 1;
    }
}

/// Move a finished temp file into place without replacing anything.
fn persist_unique(mut file: NamedTempFile, dir: &Path, name: &str) -> MiniLockResult<PathBuf> {
    // A concurrent writer can take the chosen name between the check and
    // the rename; pick again in that case.
    for _ in 0..8 {
        let destination = unique_destination(dir, name);
        match file.persist_noclobber(&destination) {
            Ok(_) => return Ok(destination),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => file = e.file,
            Err(e) => return Err(MiniLockError::Io(e.error)),
        }
    }
    Err(MiniLockError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free destination name for {name} in {}", dir.display()),
    )))
}

fn remove_source(source: &Path) {
    if let Err(e) = fs::remove_file(source) {
        warn!(path = %source.display(), error = %e, "failed to delete source file");
    }
}
