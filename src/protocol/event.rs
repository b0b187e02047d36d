use std::{error::Error, fmt, net::SocketAddr, path::PathBuf};

/// Lifecycle notification delivered to a [`Handler`].
///
/// Every connection sees exactly one `Open`, then zero or more `Receive`,
/// then exactly one `Close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    Open,
    Receive(&'a [u8]),
    Close,
}

impl Event<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Open => "open",
            Event::Receive(_) => "receive",
            Event::Close => "close",
        }
    }
}

/// Identity of the connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    Tcp(SocketAddr),
    /// Unix clients are usually unnamed.
    Unix(Option<PathBuf>),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Tcp(addr) => write!(f, "{addr}"),
            Peer::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Peer::Unix(None) => f.write_str("unix:unnamed"),
        }
    }
}

/// Bytes to write back, if any. An error ends the connection after `Close`.
pub type HandlerResult = Result<Option<Vec<u8>>, Box<dyn Error + Send + Sync>>;

/// Application side of a connection.
pub trait Handler: Send {
    fn handle(&mut self, event: Event<'_>, peer: &Peer) -> HandlerResult;
}

impl<F> Handler for F
where
    F: FnMut(Event<'_>, &Peer) -> HandlerResult + Send,
{
    fn handle(&mut self, event: Event<'_>, peer: &Peer) -> HandlerResult {
        self(event, peer)
    }
}

/// Builds one [`Handler`] per accepted connection.
pub trait HandlerFactory: Send + Sync + 'static {
    type Handler: Handler + 'static;

    fn create(&self, peer: &Peer) -> Self::Handler;
}

impl<F, H> HandlerFactory for F
where
    F: Fn(&Peer) -> H + Send + Sync + 'static,
    H: Handler + 'static,
{
    type Handler = H;

    fn create(&self, peer: &Peer) -> H {
        self(peer)
    }
}
