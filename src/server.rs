//! TCP listener for the echo server.
//!
//! Binds one address, accepts connections in a loop and spawns an
//! independent [`Session`] task for each of them. Sessions share nothing
//! with the listener or with each other.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::events::{Event, EventSink};
use crate::session::Session;

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Pause after accept fails for lack of descriptors or memory.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listener errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address '{addr}': {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener failed: {0}")]
    Accept(#[source] io::Error),
}

/// Server instance
pub struct Server {
    listen: String,
    backlog: u32,
    sink: Arc<dyn EventSink>,
}

impl Server {
    /// Create a server for `listen` (`host:port`, or `:port` for every
    /// interface).
    pub fn new(listen: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Server {
            listen: listen.into(),
            backlog: DEFAULT_BACKLOG,
            sink,
        }
    }

    pub fn from_config(config: &Config, sink: Arc<dyn EventSink>) -> Self {
        Self::new(config.listen(), sink).with_backlog(config.backlog)
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Bind the listening socket.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn bind(&self) -> Result<Listener, ServerError> {
        let addr = resolve(&self.listen).await?;
        let listener = create_listener(addr, self.backlog)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind {
                addr: self.listen.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.listen.clone(),
            source,
        })?;

        Ok(Listener {
            inner: listener,
            local_addr,
            sink: Arc::clone(&self.sink),
        })
    }
}

/// A bound listening socket.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    sink: Arc<dyn EventSink>,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever.
    ///
    /// Returns only when `accept` fails with an error the listener cannot
    /// recover from.
    pub async fn run(self) -> Result<(), ServerError> {
        self.sink.emit(Event::Listening {
            addr: self.local_addr(),
        });

        loop {
            match self.inner.accept().await {
                Ok((stream, peer)) => {
                    self.sink.emit(Event::Accepted { peer });
                    let session = Session::new(stream, peer, Arc::clone(&self.sink));
                    tokio::spawn(session.run());
                }
                Err(error) => self.on_accept_error(error).await?,
            }
        }
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Sessions already running are not told about the shutdown; they end
    /// with their connection or with the process.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => Ok(()),
        }
    }

    /// Report a transient accept failure and keep going, or hand back the
    /// error that ends the loop.
    async fn on_accept_error(&self, error: io::Error) -> Result<(), ServerError> {
        if !is_transient(&error) {
            return Err(ServerError::Accept(error));
        }

        self.sink.emit(Event::AcceptFailed { error: &error });
        if is_resource_exhaustion(&error) {
            tokio::time::sleep(ACCEPT_BACKOFF).await;
        }
        Ok(())
    }
}

/// Resolve a listen string; a leading `:` means every IPv4 interface.
async fn resolve(listen: &str) -> Result<SocketAddr, ServerError> {
    let target = if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    };

    let resolve_error = |source: io::Error| ServerError::Resolve {
        addr: listen.to_string(),
        source,
    };

    tokio::net::lookup_host(target)
        .await
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| {
            resolve_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no addresses found",
            ))
        })
}

/// Create a non-blocking listening socket. No SO_REUSEPORT, so a port that
/// is already taken fails here.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}

/// Accept errors that concern a single pending connection or a temporary
/// shortage, after which accepting can continue.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_resource_exhaustion(error)
}

fn is_resource_exhaustion(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
    )
}
