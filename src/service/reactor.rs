//! The execution context behind each orchestrator: a current-thread tokio
//! runtime driven by one dedicated, named background thread.
//!
//! All accept/connect/read/write tasks of an orchestrator are spawned onto
//! this runtime, so they never run concurrently with each other.

use std::thread::{self, JoinHandle};

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{constants, ProtocolError, Result};

/// Build the runtime for a new reactor. Setup work (bind, resolve) can run on
/// it with `block_on` before [`Reactor::start`] hands it to its thread.
pub(crate) fn build_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ProtocolError::Setup(format!("{}: {e}", constants::ERR_RUNTIME_BUILD)))
}

pub(crate) struct Reactor {
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Move `runtime` onto a new thread and drive it until [`Reactor::stop`].
    pub(crate) fn start(
        runtime: Runtime,
        shutdown: CancellationToken,
        thread_name: &str,
    ) -> Result<Self> {
        let token = shutdown.clone();

        let thread = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                runtime.block_on(token.cancelled());
                debug!("Reactor loop finished");
                // Dropping the runtime here cancels every remaining task and
                // releases the sockets they hold.
                drop(runtime);
            })
            .map_err(|e| ProtocolError::Setup(format!("{}: {e}", constants::ERR_THREAD_SPAWN)))?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stop the runtime and join its thread.
    ///
    /// When called from the reactor thread itself (from inside a hook) the
    /// thread is only signalled, since joining would deadlock.
    pub(crate) fn stop(&mut self) {
        self.shutdown.cancel();

        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("Reactor thread panicked");
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}
