//! The IO thread: a dedicated OS thread driving a single-threaded tokio
//! runtime. Every request proxy and scheme job runs as a task on it.

use std::future::Future;
use std::thread::{self, ThreadId};

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Owns the IO thread and its runtime. Dropping it stops the thread; tasks
/// still pending at that point are dropped.
pub struct IoThread {
    handle: Handle,
    thread_id: ThreadId,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl IoThread {
    /// Starts the IO thread with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the thread cannot be created.
    pub fn start(name: &str) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            runtime.block_on(async {
                let _ = shutdown_rx.await;
            });
            debug!("IO thread stopped");
        })?;
        let thread_id = join.thread().id();

        debug!("IO thread '{}' started", name);
        Ok(Self {
            handle,
            thread_id,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Returns the runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns a future onto the IO thread.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Posts a closure to run on the IO thread.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move { task() });
    }

    /// Returns true when called from the IO thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if self.is_current() {
            warn!("IO thread dropped from itself; not joining");
            return;
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("IO thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for IoThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoThread")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}
