use crate::config::ConfigError;

/// Failure surfaced while producing or consuming a data stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream transport error: {0}")]
    Transport(String),
    #[error("malformed provider event: {0}")]
    MalformedEvent(String),
    #[error(transparent)]
    Accumulator(#[from] AccumulatorError),
    #[error("failed to encode data stream part: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("data stream sink error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether the failure came from the upstream transport rather than event shape.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, StreamError::Transport(_) | StreamError::Io(_))
    }
}

impl From<std::convert::Infallible> for StreamError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

/// Invariant violations reported by the accumulator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccumulatorError {
    #[error("invalid state: {0} received without an active message")]
    InvalidState(&'static str),
    #[error("unknown tool call id: {0}")]
    UnknownToolCall(String),
    #[error("tool call delta received for already decoded args (id: {0})")]
    TypeMismatch(String),
    #[error("error in stream: {0}")]
    Stream(String),
}

/// Failures converting between canonical messages and provider shapes.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("unsupported message role: {0}")]
    UnsupportedRole(String),
    #[error("tool result {0} has no preceding tool call")]
    OrphanResult(String),
    #[error("tool result references unknown tool call id: {0}")]
    UnknownId(String),
    #[error("function response references unknown function name: {0}")]
    NameMismatch(String),
    #[error("failed to marshal {context}: {source}")]
    MarshalFailure {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("tool call args for {0} are not a JSON object")]
    InvalidArgsType(String),
    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),
    #[error("multiple system messages are not supported")]
    MultipleSystemMessages,
}

/// Failure decoding one `TAG:JSON` line of the wire protocol.
#[derive(Debug, thiserror::Error)]
pub enum PartParseError {
    #[error("data stream line has no type tag separator")]
    MissingSeparator,
    #[error("unknown data stream type tag: {0:?}")]
    UnknownTag(String),
    #[error("invalid payload for type tag {tag}: {source}")]
    Payload {
        tag: char,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level error for callers that mix streaming, conversion and config.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    PartParse(#[from] PartParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid arguments: {0}")]
    Usage(String),
}
