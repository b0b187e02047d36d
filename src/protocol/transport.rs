use std::{
    fs,
    io::{self, ErrorKind, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    os::unix::{
        fs::PermissionsExt,
        net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use thiserror::Error;

use crate::config::Endpoint;

use super::Peer;

/// Upper bound for the self-connect in [`Listener::wake`].
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve { endpoint: String, source: io::Error },
    #[error("failed to remove stale socket {}: {source}", .path.display())]
    RemoveStale { path: PathBuf, source: io::Error },
    #[error("failed to bind {endpoint}: {source}")]
    Bind { endpoint: String, source: io::Error },
    #[error("failed to set permissions on {}: {source}", .path.display())]
    Permissions { path: PathBuf, source: io::Error },
    #[error("failed to set listen backlog: {0}")]
    Backlog(io::Error),
    #[error("listener failed: {0}")]
    Accept(io::Error),
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// Binds `endpoint`. For unix sockets any existing filesystem entry at the
    /// path is removed first and `mode` is applied before the first accept.
    pub fn bind(endpoint: &Endpoint, backlog: u32) -> Result<Self, ServerError> {
        match endpoint {
            Endpoint::Unix { path, mode } => bind_unix(path, *mode),
            Endpoint::Tcp { host, port } => bind_tcp(host, *port, backlog),
        }
    }

    pub fn accept(&self) -> io::Result<(Stream, Peer)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept()?;
                Ok((Stream::Tcp(stream), Peer::Tcp(addr)))
            }
            Listener::Unix(listener, _) => {
                let (stream, addr) = listener.accept()?;
                let peer = Peer::Unix(addr.as_pathname().map(Path::to_path_buf));
                Ok((Stream::Unix(stream), peer))
            }
        }
    }

    /// Endpoint actually bound, with the kernel assigned port for `port = 0`.
    pub fn local_endpoint(&self, mode: u32) -> io::Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => {
                let addr = listener.local_addr()?;
                Ok(Endpoint::Tcp {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                })
            }
            Listener::Unix(_, path) => Ok(Endpoint::Unix {
                path: path.clone(),
                mode,
            }),
        }
    }

    /// Opens and drops a connection to ourselves, unblocking a pending accept.
    ///
    /// A TCP connect gives up after [`WAKE_TIMEOUT`] when the backlog is full.
    /// A unix connect to a full backlog fails at once with `EAGAIN`.
    pub(crate) fn wake(&self) -> io::Result<()> {
        match self {
            Listener::Tcp(listener) => {
                let mut addr = listener.local_addr()?;
                if addr.ip().is_unspecified() {
                    addr.set_ip(match addr {
                        SocketAddr::V4(_) => [127, 0, 0, 1].into(),
                        SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
                    });
                }
                TcpStream::connect_timeout(&addr, WAKE_TIMEOUT).map(drop)
            }
            Listener::Unix(_, path) => UnixStream::connect(path).map(drop),
        }
    }
}

fn bind_unix(path: &Path, mode: u32) -> Result<Listener, ServerError> {
    if fs::symlink_metadata(path).is_ok() {
        debug!("removing stale socket {}", path.display());
        fs::remove_file(path).map_err(|source| ServerError::RemoveStale {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
        endpoint: format!("unix:{}", path.display()),
        source,
    })?;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        ServerError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })?;

    info!("listening at unix:{} (mode {mode:o})", path.display());
    Ok(Listener::Unix(listener, path.to_path_buf()))
}

fn bind_tcp(host: &str, port: u16, backlog: u32) -> Result<Listener, ServerError> {
    let endpoint = format!("{host}:{port}");
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ServerError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?
        .collect::<Vec<_>>();

    let listener = TcpListener::bind(&addrs[..]).map_err(|source| ServerError::Bind {
        endpoint: endpoint.clone(),
        source,
    })?;
    set_backlog(&listener, backlog).map_err(ServerError::Backlog)?;

    info!("listening at {endpoint} (backlog {backlog})");
    Ok(Listener::Tcp(listener))
}

/// std binds with its own backlog; listening again on the bound socket
/// resizes the pending queue.
fn set_backlog(listener: &TcpListener, backlog: u32) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let backlog = backlog.min(libc::c_int::MAX as u32) as libc::c_int;
    // SAFETY: the descriptor is owned by `listener` and stays open for the call.
    if unsafe { libc::listen(listener.as_raw_fd(), backlog) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Whether an accept failure only concerns the connection being accepted.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    ) {
        return true;
    }

    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM | libc::EPROTO)
    )
}

/// An accepted connection.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Unix(s) => s.flush(),
        }
    }
}
