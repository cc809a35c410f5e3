//! Echo protocol handler.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::error::SessionError;
use crate::session::Session;

/// Build the reply for one received line.
pub fn respond(prefix: &str, message: &str) -> String {
    format!("{prefix}:{message}")
}

/// Answer lines until the peer disconnects or shutdown is requested.
///
/// The reply is built from the line the peer sent and nothing else.
pub async fn handle_session<R, W>(session: &mut Session<R, W>) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let message = match session.begin_turn().await {
            Ok(Some(message)) => message,
            Ok(None) | Err(SessionError::EndOfStream) => return Ok(()),
            Err(e) => return Err(e),
        };

        trace!(%message, "echo request");
        let reply = respond(&session.config().prefix, &message);
        session.respond(&[reply]).await?;
    }
}
