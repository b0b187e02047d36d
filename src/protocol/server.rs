use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};

use crate::config::{Endpoint, EndpointConfig};

use super::{
    ConnectionThreads, Framer, HandlerFactory, Listener, ServerError, handle_connection,
    transport::is_transient,
};

/// Pause after running out of descriptors, so the accept loop does not spin.
const EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    config: EndpointConfig,
    listener: Arc<Listener>,
    stopping: Arc<AtomicBool>,
    threads: ConnectionThreads,
}

impl Server {
    pub fn bind(config: EndpointConfig) -> Result<Self, ServerError> {
        let listener = Listener::bind(config.endpoint(), config.backlog())?;

        Ok(Self {
            config,
            listener: Arc::new(listener),
            stopping: Arc::new(AtomicBool::new(false)),
            threads: ConnectionThreads::new(),
        })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// The bound endpoint; differs from the configured one when TCP port 0
    /// was requested.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        let mode = match self.config.endpoint() {
            Endpoint::Unix { mode, .. } => *mode,
            Endpoint::Tcp { .. } => 0,
        };
        self.listener.local_endpoint(mode)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            listener: Arc::clone(&self.listener),
            stopping: Arc::clone(&self.stopping),
        }
    }

    #[cfg(test)]
    fn active_connections(&self) -> Arc<std::sync::atomic::AtomicUsize> {
        self.threads.live()
    }

    /// Accepts connections until stopped, serving each on its own thread with
    /// a handler built by `factory`.
    ///
    /// Returns `Ok(())` once a [`ShutdownHandle`] stops the server. Live
    /// connections are left to finish on their own.
    pub fn serve<F: HandlerFactory>(mut self, factory: F) -> Result<(), ServerError> {
        let factory = Arc::new(factory);

        loop {
            let accepted = self.listener.accept();
            if self.stopping.load(Ordering::SeqCst) {
                info!("shutting down");
                return Ok(());
            }

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    on_accept_error(e)?;
                    continue;
                }
            };

            let factory = Arc::clone(&factory);
            let framer = Framer::new(self.config.delimiter(), self.config.max_message_length());

            let spawned = self.threads.spawn(move || {
                let mut handler = factory.create(&peer);
                handle_connection(stream, &peer, framer, &mut handler);
            });
            if let Err(e) = spawned {
                warn!("dropping connection, failed to spawn its thread: {e}");
            }
        }
    }
}

/// Logs a transient accept failure and lets the loop go on; any other failure
/// ends the loop.
fn on_accept_error(err: io::Error) -> Result<(), ServerError> {
    if !is_transient(&err) {
        return Err(ServerError::Accept(err));
    }

    warn!("failed to accept connection: {err}");
    if matches!(err.raw_os_error(), Some(libc::EMFILE | libc::ENFILE)) {
        thread::sleep(EXHAUSTED_BACKOFF);
    }
    Ok(())
}

/// Stops a running [`Server::serve`] from another thread or a signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    listener: Arc<Listener>,
    stopping: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.listener.wake() {
            debug!("failed to wake accept loop: {e}");
        }
    }
}
