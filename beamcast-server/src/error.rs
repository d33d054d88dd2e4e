use thiserror::Error;

/// Server-level error type covering startup and listener failures.
///
/// Protocol-level failures never surface here: they are encoded as
/// `status_code`/`status_message` in the XML bodies the handlers build.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    Bind(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for server results.
pub type Result<T> = std::result::Result<T, ServerError>;
