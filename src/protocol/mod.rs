//! Delimiter framed request serving.
//!
//! This module binds a TCP or Unix domain listener, accepts connections and
//! turns each connection's byte stream into discrete messages handed to an
//! application [`Handler`].
//!
//! # Overview
//!
//! A [`Server`] owns the listening socket. [`Server::serve`] runs a single
//! accept loop that spawns one thread per connection; each thread builds a
//! handler from the [`HandlerFactory`] and runs [`handle_connection`].
//!
//! Every connection delivers, in order:
//!
//! - [`Event::Open`], before anything is read,
//! - one [`Event::Receive`] per complete message,
//! - [`Event::Close`], once, whether the peer hung up, a read or write
//!   failed, or the handler returned an error or panicked.
//!
//! A `Receive` response is written to the connection before the next message
//! is handled.
//!
//! # Framing
//!
//! Messages end with a configurable delimiter and are bounded by a maximum
//! length. The [`Framer`] keeps fewer than `max_len` bytes per candidate
//! message: a message reaching the bound is discarded up to and including its
//! delimiter, and the following message is delivered normally. Bytes after the
//! last delimiter of a stream are never delivered.
//!
//! ```rust
//! use linewire::protocol::Framer;
//!
//! let mut framer = Framer::new("\n", 10);
//! let messages: Vec<Vec<u8>> = framer.feed(b"hi\nworld12345\nok\n").collect();
//! assert_eq!(messages, vec![b"hi".to_vec(), b"ok".to_vec()]);
//! ```
//!
//! # Shutdown
//!
//! [`ShutdownHandle::stop`] makes `serve` return `Ok(())`. Connections already
//! running are not interrupted.
mod dispatch;
mod event;
mod framer;
mod server;
mod thread;
mod transport;

use thread::ConnectionThreads;

pub use dispatch::handle_connection;
pub use event::{Event, Handler, HandlerFactory, HandlerResult, Peer};
pub use framer::{Framer, Frames};
pub use server::{Server, ShutdownHandle};
pub use transport::{Listener, ServerError, Stream};
