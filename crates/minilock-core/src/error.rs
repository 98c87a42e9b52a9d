use std::path::PathBuf;

use thiserror::Error;

pub type MiniLockResult<T> = Result<T, MiniLockError>;

#[derive(Debug, Error)]
pub enum MiniLockError {
    #[error("no recipients selected")]
    RecipientListEmpty,

    #[error("path does not point to a file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("input filename was empty")]
    FileNameEmpty,

    #[error("the source is empty")]
    SourceEmpty,

    #[error("could not construct header: {0}")]
    HeaderConstruction(String),

    #[error("the file is corrupt: {0}")]
    CorruptFile(String),

    #[error("you are not a recipient of this file")]
    NotARecipient,

    #[error("the filename embedded in the encrypted file is corrupt")]
    CouldNotDecodeFileName,

    #[error("the encryption/decryption process is already complete")]
    ProcessComplete,

    #[error("input size invalid: {0}")]
    InputSizeInvalid(String),

    #[error("MAC verification failed")]
    MacVerificationFailed,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid miniLock ID: {0}")]
    InvalidId(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MiniLockError {
    /// True for format and integrity failures, which callers report as a corrupt file.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            MiniLockError::CorruptFile(_)
                | MiniLockError::MacVerificationFailed
                | MiniLockError::CouldNotDecodeFileName
        )
    }
}
