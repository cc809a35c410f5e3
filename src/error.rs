//! Error types for sessions, the acceptor and the client.

use std::net::SocketAddr;

use crate::config::Endpoint;

/// Failure of a single session turn.
///
/// Every variant ends the session that produced it and nothing else.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Peer closed the connection before a complete line arrived.
    #[error("peer closed the connection")]
    EndOfStream,

    /// A line arrived but could not be used as a request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// No progress within the configured I/O deadline.
    #[error("timed out waiting for peer")]
    Timeout,

    /// Any other transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this is an ordinary end of a session rather than a fault.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, SessionError::EndOfStream)
    }
}

/// Acceptor errors. All of them are fatal to the server process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be created.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The listen endpoint did not resolve to any address.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client errors, reported to the operator as-is.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection refused by {0}")]
    ConnectionRefused(Endpoint),

    #[error("host unreachable: {0}")]
    HostUnreachable(Endpoint),

    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out talking to server")]
    Timeout,

    /// Operator input could not be turned into a request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The exchange itself failed after the connection was established.
    #[error("exchange failed: {0}")]
    Protocol(SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SessionError> for ClientError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Timeout => ClientError::Timeout,
            SessionError::Io(e) => ClientError::Io(e),
            other => ClientError::Protocol(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_stream_classification() {
        assert!(SessionError::EndOfStream.is_end_of_stream());
        assert!(!SessionError::Timeout.is_end_of_stream());
        assert!(!SessionError::MalformedRequest("x".into()).is_end_of_stream());
    }

    #[test]
    fn test_display() {
        let err = SessionError::MalformedRequest("not an integer: \"abc\"".into());
        assert_eq!(err.to_string(), "malformed request: not an integer: \"abc\"");

        let err = ClientError::ConnectionRefused(Endpoint::new("localhost", 12345));
        assert_eq!(err.to_string(), "connection refused by localhost:12345");
    }

    #[test]
    fn test_session_error_into_client_error() {
        assert!(matches!(
            ClientError::from(SessionError::Timeout),
            ClientError::Timeout
        ));
        assert!(matches!(
            ClientError::from(SessionError::EndOfStream),
            ClientError::Protocol(SessionError::EndOfStream)
        ));
    }
}
