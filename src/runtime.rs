//! One-time, process-wide preparation performed before any socket is created.
//!
//! Connections are served on their own OS threads with blocking std I/O, so no
//! cooperative patching of I/O primitives is needed and `patch_all` changes
//! nothing in the process. The call is kept so that bootstrap has a single,
//! ordered place for such setup.
use std::sync::Once;

use log::debug;

static PREPARE: Once = Once::new();

/// Prepares the process for serving. Only the first call has an effect.
pub fn prepare(patch_all: bool) {
    PREPARE.call_once(|| {
        if patch_all {
            debug!("blocking thread-per-connection I/O needs no patching");
        } else {
            debug!("runtime preparation disabled");
        }
    });
}
