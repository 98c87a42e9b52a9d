//! minilock-core: shared error type and configuration schema for the miniLock workspace

pub mod config;
pub mod error;

pub use config::MiniLockConfig;
pub use error::{MiniLockError, MiniLockResult};
