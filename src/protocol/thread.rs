use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use log::debug;

/// Spawns one detached thread per connection and counts the live ones.
#[derive(Debug, Default)]
pub struct ConnectionThreads {
    spawned: usize,
    live: Arc<AtomicUsize>,
}

impl ConnectionThreads {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn live(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }

    pub fn spawn<F>(&mut self, f: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.spawned;
        self.spawned += 1;

        let guard = LiveGuard::enter(Arc::clone(&self.live));
        let live = self.live.load(Ordering::SeqCst);
        thread::Builder::new()
            .name(format!("conn-{id}"))
            .spawn(move || {
                let _guard = guard;
                debug!("worker {id} handling a connection ({live} live)");
                f();
                debug!("worker {id} finished");
            })?;

        Ok(())
    }
}

/// Decrements the live count when the thread ends, including by panic.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
