//! Compute protocol handler.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use super::parser::{parse_operand, response_line, OPERANDS};
use crate::error::SessionError;
use crate::session::Session;

/// Run one compute exchange.
///
/// Both operands are read and parsed before anything is written, so a bad
/// request never produces a partial response. The session closes afterwards
/// either way.
pub async fn handle_session<R, W>(session: &mut Session<R, W>) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let first = match session.begin_turn().await {
        Ok(Some(line)) => line,
        // Nothing was requested
        Ok(None) | Err(SessionError::EndOfStream) => return Ok(()),
        Err(e) => return Err(e),
    };

    let mut lines = Vec::with_capacity(OPERANDS);
    if session.config().skip_preamble {
        debug!(message = %first, "discarding preamble");
    } else {
        lines.push(first);
    }

    while lines.len() < OPERANDS {
        match session.read_line().await {
            Ok(line) => lines.push(line),
            Err(SessionError::EndOfStream) => {
                return Err(SessionError::MalformedRequest(format!(
                    "connection closed after {} of {OPERANDS} operands",
                    lines.len()
                )));
            }
            Err(e) => return Err(e),
        }
    }

    let operands = lines
        .iter()
        .map(|line| parse_operand(line))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| session.fail(e))?;

    trace!(?operands, "compute request");
    let replies: Vec<String> = operands.iter().map(|&n| response_line(n)).collect();
    session.respond(&replies).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::protocols::Protocol;
    use crate::session::SessionState;
    use std::sync::Arc;
    use tokio::io::sink;
    use tokio::sync::watch;
    use tokio_test::io::Builder;

    fn config(skip_preamble: bool) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            protocol: Protocol::Compute,
            skip_preamble,
            ..SessionConfig::default()
        })
    }

    #[tokio::test]
    async fn test_squares_both_operands() {
        let reader = Builder::new().read(b"4\n7\n").build();
        let writer = Builder::new()
            .write(b"Square of 4: 16\n")
            .write(b"Square of 7: 49\n")
            .build();
        let (_tx, rx) = watch::channel(false);

        let turns = Session::new(reader, writer, config(false), rx).run().await.unwrap();
        assert_eq!(turns, 1);
    }

    #[tokio::test]
    async fn test_single_shot() {
        // Lines past the first pair are never answered
        let reader = Builder::new().read(b"1\n2\n3\n4\n").build();
        let writer = Builder::new()
            .write(b"Square of 1: 1\n")
            .write(b"Square of 2: 4\n")
            .build();
        let (_tx, rx) = watch::channel(false);

        let turns = Session::new(reader, writer, config(false), rx).run().await.unwrap();
        assert_eq!(turns, 1);
    }

    #[tokio::test]
    async fn test_skip_preamble() {
        let reader = Builder::new().read(b"hello server\n").read(b"-3\n5\n").build();
        let writer = Builder::new()
            .write(b"Square of -3: 9\n")
            .write(b"Square of 5: 25\n")
            .build();
        let (_tx, rx) = watch::channel(false);

        Session::new(reader, writer, config(true), rx).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_second_operand_writes_nothing() {
        let reader = Builder::new().read(b"4\nseven\n").build();
        let (_tx, rx) = watch::channel(false);
        let mut session = Session::new(reader, sink(), config(false), rx);

        let result = handle_session(&mut session).await;
        assert!(matches!(result, Err(SessionError::MalformedRequest(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.turns(), 0);
    }

    #[tokio::test]
    async fn test_eof_after_one_operand() {
        let reader = Builder::new().read(b"4\n").build();
        let (_tx, rx) = watch::channel(false);

        // A mock writer with no expectations panics on any write
        let writer = Builder::new().build();
        let result = Session::new(reader, writer, config(false), rx).run().await;
        assert!(matches!(result, Err(SessionError::MalformedRequest(_))));
    }

    #[tokio::test]
    async fn test_eof_before_request_is_clean() {
        let reader = Builder::new().build();
        let (_tx, rx) = watch::channel(false);

        let turns = Session::new(reader, sink(), config(false), rx).run().await.unwrap();
        assert_eq!(turns, 0);
    }
}
