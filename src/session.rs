//! Server side of one accepted connection.
//!
//! A session owns its connection's framer for its whole life and walks the
//! state machine
//! `AwaitingRequest -> Processing -> Responding -> AwaitingRequest | Closed`.
//! The protocol drivers in [`crate::protocols`] decide when a turn ends and
//! whether another one follows.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::trace;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::framer::LineFramer;
use crate::protocols::{compute, echo, Protocol};

/// Where a session is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first line of the next request.
    AwaitingRequest,
    /// Reading the rest of a request or computing the response.
    Processing,
    /// Writing the response.
    Responding,
    /// Connection released. Terminal.
    Closed,
}

/// One connection bound to one exchange kind.
pub struct Session<R, W> {
    framer: LineFramer<R, W>,
    config: Arc<SessionConfig>,
    shutdown: watch::Receiver<bool>,
    state: SessionState,
    turns: u64,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap a connection. The framer's limits are taken from `config`.
    pub fn new(
        reader: R,
        writer: W,
        config: Arc<SessionConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let framer = LineFramer::new(reader, writer)
            .with_timeout(config.io_timeout)
            .with_max_line_length(config.max_line_length);

        Self {
            framer,
            config,
            shutdown,
            state: SessionState::AwaitingRequest,
            turns: 0,
        }
    }

    /// Drive the configured exchange to completion and release the connection.
    ///
    /// Returns the number of completed turns.
    pub async fn run(mut self) -> Result<u64, SessionError> {
        let result = match self.config.protocol {
            Protocol::Echo => echo::handle_session(&mut self).await,
            Protocol::Compute => compute::handle_session(&mut self).await,
        };

        self.close().await;
        result.map(|()| self.turns)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Completed request/response turns so far.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Wait for the first line of the next request.
    ///
    /// Returns `None` if shutdown is signalled before a request starts; a
    /// request already in progress is never cut short by shutdown.
    pub async fn begin_turn(&mut self) -> Result<Option<String>, SessionError> {
        debug_assert_eq!(self.state, SessionState::AwaitingRequest);

        if *self.shutdown.borrow() {
            return Ok(None);
        }

        let line = tokio::select! {
            line = self.framer.read_line() => line,
            () = shutdown_signalled(&mut self.shutdown) => {
                trace!("shutdown while idle");
                return Ok(None);
            }
        };

        let line = self.fail_on_err(line)?;
        self.state = SessionState::Processing;
        Ok(Some(line))
    }

    /// Read a further line of the request in progress.
    pub async fn read_line(&mut self) -> Result<String, SessionError> {
        let line = self.framer.read_line().await;
        self.fail_on_err(line)
    }

    /// Write the response lines and return to `AwaitingRequest`.
    pub async fn respond(&mut self, lines: &[String]) -> Result<(), SessionError> {
        self.state = SessionState::Responding;
        for line in lines {
            let written = self.framer.write_line(line).await;
            self.fail_on_err(written)?;
        }
        self.turns += 1;
        self.state = SessionState::AwaitingRequest;
        Ok(())
    }

    /// Abandon the request in progress.
    pub fn fail(&mut self, err: SessionError) -> SessionError {
        self.state = SessionState::Closed;
        err
    }

    async fn close(&mut self) {
        self.state = SessionState::Closed;
        // Peer may already be gone; nothing left to report
        let _ = self.framer.shutdown().await;
    }

    fn fail_on_err<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        result.map_err(|e| self.fail(e))
    }
}

/// Resolves once shutdown has been requested. Never resolves if the sender is gone.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::sink;
    use tokio_test::io::Builder;

    fn config(protocol: Protocol) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            protocol,
            ..SessionConfig::default()
        })
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let reader = Builder::new().read(b"hi\n").build();
        let writer = Builder::new().write(b"ok\n").build();
        let (_tx, rx) = watch::channel(false);
        let mut session = Session::new(reader, writer, config(Protocol::Echo), rx);

        assert_eq!(session.state(), SessionState::AwaitingRequest);

        let line = session.begin_turn().await.unwrap();
        assert_eq!(line.as_deref(), Some("hi"));
        assert_eq!(session.state(), SessionState::Processing);

        session.respond(&["ok".to_string()]).await.unwrap();
        assert_eq!(session.state(), SessionState::AwaitingRequest);
        assert_eq!(session.turns(), 1);

        assert!(matches!(
            session.begin_turn().await,
            Err(SessionError::EndOfStream)
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_before_request() {
        let (_peer, local) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(local);
        let (tx, rx) = watch::channel(false);
        let mut session = Session::new(reader, writer, config(Protocol::Echo), rx);

        tx.send(true).unwrap();
        assert!(session.begin_turn().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let (_peer, local) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(local);
        let (tx, rx) = watch::channel(false);
        let session = Session::new(reader, writer, config(Protocol::Echo), rx);

        let handle = tokio::spawn(session.run());
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_end_session() {
        let reader = Builder::new().read(b"still here\n").build();
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let mut session = Session::new(reader, sink(), config(Protocol::Echo), rx);

        let line = session.begin_turn().await.unwrap();
        assert_eq!(line.as_deref(), Some("still here"));
    }
}
