#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid time range: {0}")]
    InvalidRange(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("publisher closed")]
    Closed,
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Returns true for errors caused by caller input rather than storage.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::InvalidRange(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
