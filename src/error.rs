use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

// Absence (cache miss, key not found, no filter, empty key) is never an error;
// it is reported through Option/bool at the call site.
#[derive(Debug, Error)]
pub enum Error {
    #[error("write file failed: {0}")]
    WriteFileFailed(#[source] io::Error),

    #[error("invalid object: {0}")]
    InvalidObject(&'static str),

    #[error("interrupted: {0}")]
    Interrupt(&'static str),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("logger error: {0}")]
    Logger(String),
}

impl Error {
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
