//! Error taxonomy for the wire protocol and client.
//!
//! Only `Connection` and `Protocol` are fatal for a session. `Timeout` is
//! surfaced per call and the caller decides whether to retry. Malformed
//! records are logged and skipped by the read loop; they only appear as
//! errors at the single-record level.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport unavailable or closed underneath us. Fatal, no auto-retry.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Handshake status code >= 400.
    #[error("simulator refused session (status {code}): {text}")]
    Protocol { code: u16, text: String },

    /// No complete matching document arrived within the deadline.
    #[error("timed out waiting for <{tag}>")]
    Timeout { tag: String },

    /// A single unparseable line or document. Never fatal for the session.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A required attribute is absent from a response tag.
    #[error("missing attribute '{attr}' in <{tag}>")]
    MissingAttribute { tag: &'static str, attr: &'static str },

    /// An attribute is present but does not parse to the declared type.
    #[error("invalid value '{value}' for attribute '{attr}' in <{tag}>")]
    InvalidValue {
        tag: &'static str,
        attr: &'static str,
        value: String,
    },

    /// The document's outermost tag is not the one the schema expects.
    #[error("expected <{expected}>, got <{got}>")]
    UnexpectedTag { expected: &'static str, got: String },
}

pub type Result<T> = std::result::Result<T, Error>;
