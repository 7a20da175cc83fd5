//! Error taxonomy and its mapping onto SQLite result codes.

use std::ffi::c_int;

use libsqlite3_sys::{
    SQLITE_ERROR, SQLITE_IOERR_DATA, SQLITE_IOERR_SHORT_READ, SQLITE_MISUSE, SQLITE_READONLY,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Writes and truncation are never allowed through the shim.
    #[error("database is read-only")]
    ReadOnly,

    /// The block cipher rejected the page. Fatal for the read.
    #[error("page {page} decrypt failed: {reason}")]
    Cipher { page: u64, reason: String },

    /// The wrapped VFS returned a non-OK code; carried verbatim.
    #[error("underlying file returned sqlite code {code}")]
    Io { code: c_int },

    /// The read ran past end-of-file. Unread bytes have been zeroed.
    #[error("short read at offset {offset}")]
    ShortRead { offset: i64 },

    /// The key entry resolved at open time no longer exists.
    #[error("key for {path} was unregistered while the file was open")]
    KeyRevoked { path: String },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid page layout: {0}")]
    InvalidLayout(String),

    #[error("key manifest: {0}")]
    Manifest(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The code handed back to SQLite for this error. Cipher failures use
    /// `SQLITE_IOERR_DATA` so they never collide with a code the wrapped
    /// VFS can return for a failed read.
    pub fn sqlite_code(&self) -> c_int {
        match self {
            Error::ReadOnly => SQLITE_READONLY,
            Error::Cipher { .. } | Error::KeyRevoked { .. } => SQLITE_IOERR_DATA,
            Error::Io { code } => *code,
            Error::ShortRead { .. } => SQLITE_IOERR_SHORT_READ,
            Error::InvalidKey(_) | Error::InvalidLayout(_) => SQLITE_MISUSE,
            Error::Manifest(_) => SQLITE_ERROR,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Manifest(e.to_string())
    }
}
