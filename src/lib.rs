pub mod config;
pub mod protocol;
pub mod runtime;

pub use config::{Config, ConfigError, Endpoint, EndpointConfig, banner};
pub use protocol::{Event, Handler, HandlerFactory, Peer, Server, ServerError, ShutdownHandle};
