//! Codec and pipeline error types.

use thiserror::Error;

/// Errors raised while framing HTTP/1.1 messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The status line or a header line could not be parsed.
    #[error("malformed response head: {0}")]
    Parse(#[from] httparse::Error),
    /// The response head did not terminate within the buffer limit.
    #[error("response head exceeds {limit} bytes")]
    HeadTooLarge {
        /// Maximum accepted head size in bytes.
        limit: usize,
    },
    /// `Content-Length` was present but not a valid length.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    /// A chunk-size line or chunk delimiter was malformed.
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
    /// The connection closed in the middle of a length-delimited message.
    #[error("connection closed before the response was complete")]
    Incomplete,
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The codec stage failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// An outbound message reached the transport without being encoded.
    #[error("{0} message reached the transport unencoded")]
    Unencoded(&'static str),
    /// A custom stage rejected an event.
    #[error("stage {stage} failed: {message}")]
    Stage {
        /// Name of the failing stage.
        stage: &'static str,
        /// Failure description.
        message: String,
    },
}

impl PipelineError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Codec(CodecError::Incomplete) => "incomplete_message",
            Self::Codec(CodecError::Io(_)) => "io",
            Self::Codec(_) => "framing",
            Self::Unencoded(_) => "unencoded",
            Self::Stage { .. } => "stage",
        }
    }
}
