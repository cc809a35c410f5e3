//! Client side of the line protocols.
//!
//! A [`Client`] owns one connection. Echo turns can be driven one at a time
//! or from any line source; a compute exchange consumes the client since the
//! server closes afterwards.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::config::Endpoint;
use crate::error::ClientError;
use crate::framer::LineFramer;
use crate::protocols::compute::parser::OPERANDS;

/// An open connection to a line protocol server.
pub struct Client {
    framer: LineFramer<OwnedReadHalf, OwnedWriteHalf>,
}

impl Client {
    /// Resolve `endpoint` and connect to the first address that accepts.
    ///
    /// `io_timeout` bounds the connect attempt and every later read/write.
    /// There is no retry.
    pub async fn connect(
        endpoint: &Endpoint,
        io_timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((endpoint.host(), endpoint.port()))
            .await
            .map_err(|source| ClientError::Resolve {
                endpoint: endpoint.clone(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            debug!(address = %addr, "Connecting");
            match connect_one(addr, io_timeout).await {
                Ok(stream) => {
                    let framer = LineFramer::from_tcp(stream).with_timeout(io_timeout);
                    return Ok(Client { framer });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(ConnectFailure::TimedOut) => ClientError::Timeout,
            Some(ConnectFailure::Io(e)) => classify_connect_error(endpoint, e),
            None => ClientError::Resolve {
                endpoint: endpoint.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            },
        })
    }

    /// Send one echo request and wait for its reply.
    pub async fn chat_line(&mut self, line: &str) -> Result<String, ClientError> {
        self.framer.write_line(line).await?;
        let reply = self.framer.read_line().await?;
        trace!(%line, %reply, "echo turn");
        Ok(reply)
    }

    /// Relay every line of `input` as an echo request, writing each reply
    /// to `output`. Stops at the end of `input`.
    ///
    /// Returns the number of completed turns.
    pub async fn chat<I, O>(&mut self, input: I, output: &mut O) -> Result<u64, ClientError>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut turns = 0;

        while let Some(line) = lines.next_line().await? {
            let reply = self.chat_line(&line).await?;
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
            turns += 1;
        }

        Ok(turns)
    }

    /// Run one compute exchange and close the connection.
    ///
    /// `message`, if any, is sent as a line of its own before the operands.
    /// The server must be configured to skip it.
    pub async fn compute(
        mut self,
        message: Option<&str>,
        first: i64,
        second: i64,
    ) -> Result<[String; OPERANDS], ClientError> {
        if let Some(message) = message {
            self.framer.write_line(message).await?;
        }
        self.framer.write_line(&first.to_string()).await?;
        self.framer.write_line(&second.to_string()).await?;

        let replies = [self.framer.read_line().await?, self.framer.read_line().await?];
        // Server hangs up after replying; a failed half-close changes nothing
        let _ = self.close().await;
        Ok(replies)
    }

    /// Close the write side, signalling end of input to the server.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.framer.shutdown().await?;
        Ok(())
    }
}

/// Read one line to send ahead of the compute operands.
///
/// A blank line (or end of input) means no message.
pub async fn read_message<I>(input: &mut I) -> Result<Option<String>, ClientError>
where
    I: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    input.read_line(&mut line).await?;
    let message = line.trim_end_matches(['\r', '\n']);
    Ok((!message.trim().is_empty()).then(|| message.to_string()))
}

/// Read two whitespace-separated integers, possibly across several lines.
pub async fn read_operands<I>(input: I) -> Result<(i64, i64), ClientError>
where
    I: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut operands = Vec::with_capacity(OPERANDS);

    while operands.len() < OPERANDS {
        let Some(line) = lines.next_line().await? else {
            return Err(ClientError::InvalidInput(format!(
                "expected {OPERANDS} integers, got {}",
                operands.len()
            )));
        };

        for token in line.split_whitespace() {
            if operands.len() == OPERANDS {
                break;
            }
            let n = token
                .parse::<i64>()
                .map_err(|_| ClientError::InvalidInput(format!("not an integer: {token:?}")))?;
            operands.push(n);
        }
    }

    Ok((operands[0], operands[1]))
}

enum ConnectFailure {
    TimedOut,
    Io(io::Error),
}

async fn connect_one(
    addr: SocketAddr,
    io_timeout: Option<Duration>,
) -> Result<TcpStream, ConnectFailure> {
    let connecting = TcpStream::connect(addr);
    let stream = match io_timeout {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| ConnectFailure::TimedOut)?,
        None => connecting.await,
    }
    .map_err(ConnectFailure::Io)?;

    stream.set_nodelay(true).map_err(ConnectFailure::Io)?;
    Ok(stream)
}

fn classify_connect_error(endpoint: &Endpoint, err: io::Error) -> ClientError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ClientError::ConnectionRefused(endpoint.clone()),
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            ClientError::HostUnreachable(endpoint.clone())
        }
        _ => ClientError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::SessionError;
    use crate::protocols::Protocol;
    use crate::server::Server;
    use tokio::sync::oneshot;

    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

    async fn start(protocol: Protocol, skip_preamble: bool) -> (Endpoint, oneshot::Sender<()>) {
        let mut config = Config::default();
        config.endpoint = Endpoint::new("127.0.0.1", 0);
        config.session.protocol = protocol;
        config.session.skip_preamble = skip_preamble;

        let server = Server::bind(&config).await.unwrap();
        let endpoint = Endpoint::new("127.0.0.1", server.local_addr().port());
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.run(async move {
            let _ = stopped.await;
        }));
        (endpoint, stop)
    }

    #[tokio::test]
    async fn test_chat_line() {
        let (endpoint, _stop) = start(Protocol::Echo, false).await;
        let mut client = Client::connect(&endpoint, TIMEOUT).await.unwrap();

        assert_eq!(client.chat_line("hi").await.unwrap(), "Server:hi");
        assert_eq!(client.chat_line("again").await.unwrap(), "Server:again");
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_relays_input() {
        let (endpoint, _stop) = start(Protocol::Echo, false).await;
        let mut client = Client::connect(&endpoint, TIMEOUT).await.unwrap();

        let input: &[u8] = b"first\nsecond\nthird\n";
        let mut output = Vec::new();
        let turns = client.chat(input, &mut output).await.unwrap();

        assert_eq!(turns, 3);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Server:first\nServer:second\nServer:third\n"
        );
    }

    #[tokio::test]
    async fn test_compute() {
        let (endpoint, _stop) = start(Protocol::Compute, false).await;
        let client = Client::connect(&endpoint, TIMEOUT).await.unwrap();

        let replies = client.compute(None, 4, 7).await.unwrap();
        assert_eq!(replies, ["Square of 4: 16", "Square of 7: 49"]);
    }

    #[tokio::test]
    async fn test_compute_with_message() {
        let (endpoint, _stop) = start(Protocol::Compute, true).await;
        let client = Client::connect(&endpoint, TIMEOUT).await.unwrap();

        let replies = client.compute(Some("hello"), -2, 9).await.unwrap();
        assert_eq!(replies, ["Square of -2: 4", "Square of 9: 81"]);
    }

    #[tokio::test]
    async fn test_compute_message_rejected_without_skip() {
        let (endpoint, _stop) = start(Protocol::Compute, false).await;
        let client = Client::connect(&endpoint, TIMEOUT).await.unwrap();

        match client.compute(Some("hello"), 1, 2).await {
            Err(ClientError::Protocol(SessionError::EndOfStream)) => {}
            // Unread operand bytes can turn the close into a reset
            Err(ClientError::Io(_)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Grab a free port, then release it
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::new("127.0.0.1", port);
        match Client::connect(&endpoint, TIMEOUT).await {
            Err(ClientError::ConnectionRefused(e)) => assert_eq!(e, endpoint),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let endpoint = Endpoint::new("no-such-host.invalid", 12345);
        assert!(matches!(
            Client::connect(&endpoint, TIMEOUT).await,
            Err(ClientError::Resolve { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_message_then_operands() {
        let mut input: &[u8] = b"hello server\r\n4 7\n";
        assert_eq!(
            read_message(&mut input).await.unwrap().as_deref(),
            Some("hello server")
        );
        assert_eq!(read_operands(&mut input).await.unwrap(), (4, 7));
    }

    #[tokio::test]
    async fn test_blank_message_is_none() {
        let mut input: &[u8] = b"   \n1 2\n";
        assert!(read_message(&mut input).await.unwrap().is_none());
        assert_eq!(read_operands(&mut input).await.unwrap(), (1, 2));

        let mut input: &[u8] = b"";
        assert!(read_message(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_operands() {
        let input: &[u8] = b"4 7\n";
        assert_eq!(read_operands(input).await.unwrap(), (4, 7));

        let input: &[u8] = b"\n-3\n  12  99\n";
        assert_eq!(read_operands(input).await.unwrap(), (-3, 12));
    }

    #[tokio::test]
    async fn test_read_operands_errors() {
        let input: &[u8] = b"4 seven\n";
        assert!(matches!(
            read_operands(input).await,
            Err(ClientError::InvalidInput(_))
        ));

        let input: &[u8] = b"4\n";
        assert!(matches!(
            read_operands(input).await,
            Err(ClientError::InvalidInput(_))
        ));
    }
}
