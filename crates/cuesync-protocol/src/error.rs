use std::time::Duration;

/// Why an outgoing request did not produce a response payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The peer answered with an `error_response`. Only its message survives.
    #[error("received error for request: {0}")]
    Remote(String),

    /// The peer answered, but not with the kind of response the caller needs.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The transport is gone, or the endpoint was torn down by a role that
    /// rejects outstanding requests on close.
    #[error("connection closed")]
    Closed,

    #[error("failed to encode frame: {0}")]
    Encode(String),
}
