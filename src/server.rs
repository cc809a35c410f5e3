//! TCP acceptor for line protocol sessions.
//!
//! Accepts connections in a loop and runs a [`Session`] for each one on its
//! own task. Session failures are logged and go no further; the loop only
//! stops when the shutdown future resolves.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{Config, Endpoint, SessionConfig};
use crate::error::{ServerError, SessionError};
use crate::session::Session;

/// Listen backlog
const BACKLOG: i32 = 1024;

/// First delay between bind attempts; doubles each retry
const BIND_RETRY_BASE: Duration = Duration::from_millis(100);

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    session_config: Arc<SessionConfig>,
    connection_limit: Arc<Semaphore>,
    max_connections: u32,
    drain_timeout: Duration,
}

/// Bind to the configured endpoint and serve until `shutdown` resolves.
pub async fn serve<F>(config: &Config, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()>,
{
    Server::bind(config).await?.run(shutdown).await
}

impl Server {
    /// Create the listening socket.
    ///
    /// Fails with [`ServerError::Bind`] if the address is taken or not
    /// permitted, after `config.bind_retries` extra attempts.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = resolve(&config.endpoint).await?;
        let listener = bind_with_retry(addr, config.bind_retries).await?;
        let local_addr = listener.local_addr()?;

        let max_connections =
            u32::try_from(config.max_connections.clamp(1, Semaphore::MAX_PERMITS))
                .unwrap_or(u32::MAX);

        info!(
            address = %local_addr,
            protocol = ?config.session.protocol,
            max_connections,
            "Server listening"
        );

        Ok(Server {
            listener,
            local_addr,
            session_config: Arc::new(config.session.clone()),
            connection_limit: Arc::new(Semaphore::new(max_connections as usize)),
            max_connections,
            drain_timeout: config.drain_timeout,
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves, then drain.
    ///
    /// On shutdown the listener is closed first, idle sessions are told to
    /// stop, and sessions in the middle of a turn get up to the drain timeout
    /// to finish it.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            local_addr,
            session_config,
            connection_limit,
            max_connections,
            drain_timeout,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                permit = Arc::clone(&connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = &mut shutdown => break,
            };

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = &mut shutdown => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    spawn_session(
                        stream,
                        peer,
                        Arc::clone(&session_config),
                        shutdown_rx.clone(),
                        permit,
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        // Release the port before waiting on sessions
        drop(listener);
        info!(address = %local_addr, "Listener closed, draining sessions");
        let _ = shutdown_tx.send(true);

        let in_flight = max_connections as usize - connection_limit.available_permits();
        if in_flight > 0 {
            debug!(in_flight, "Waiting for sessions");
        }

        match tokio::time::timeout(drain_timeout, connection_limit.acquire_many(max_connections))
            .await
        {
            Ok(_) => info!("Server stopped"),
            Err(_) => {
                let remaining = max_connections as usize - connection_limit.available_permits();
                warn!(remaining, "Drain timed out, abandoning sessions");
            }
        }

        Ok(())
    }
}

/// Run one session on its own task. The permit is held until it ends.
fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<SessionConfig>,
    shutdown: watch::Receiver<bool>,
    permit: OwnedSemaphorePermit,
) {
    tokio::spawn(async move {
        info!(peer = %peer, "Client connected");

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        match Session::new(reader, writer, config, shutdown).run().await {
            Ok(turns) => info!(peer = %peer, turns, "Connection closed"),
            Err(e) if e.is_end_of_stream() => {
                info!(peer = %peer, "Connection closed by client");
            }
            Err(SessionError::Timeout) => {
                warn!(peer = %peer, "Connection timed out");
            }
            Err(e) => warn!(peer = %peer, error = %e, "Session failed"),
        }

        drop(permit);
    });
}

/// Resolve an endpoint to its first socket address.
async fn resolve(endpoint: &Endpoint) -> Result<SocketAddr, ServerError> {
    let resolve_err = |source| ServerError::Resolve {
        endpoint: endpoint.clone(),
        source,
    };

    tokio::net::lookup_host((endpoint.host(), endpoint.port()))
        .await
        .map_err(resolve_err)?
        .next()
        .ok_or_else(|| {
            resolve_err(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses found",
            ))
        })
}

async fn bind_with_retry(addr: SocketAddr, retries: u32) -> Result<TcpListener, ServerError> {
    let mut delay = BIND_RETRY_BASE;
    let mut attempt = 0;

    loop {
        match create_listener(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(address = %addr, error = %e, attempt, ?delay, "Bind failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(source) => return Err(ServerError::Bind { addr, source }),
        }
    }
}

/// Create a non-blocking listener.
///
/// `SO_REUSEADDR` lets a restarted server take the port while old
/// connections sit in TIME_WAIT; a live listener still blocks the bind.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}
