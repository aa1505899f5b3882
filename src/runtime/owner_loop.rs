//! The owner thread's task queue.
//!
//! Notifications for a peer are posted here from the IO thread as closures
//! and run only when the owner thread pumps the loop, so a peer is never
//! touched from any other thread.

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

/// A unit of work for the owner thread.
pub type OwnerTask = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle that posts tasks to an [`OwnerLoop`].
#[derive(Clone)]
pub struct OwnerTaskRunner {
    tx: mpsc::UnboundedSender<OwnerTask>,
    thread_id: ThreadId,
}

impl OwnerTaskRunner {
    /// Posts a task. Returns false if the loop is gone.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }

    /// Returns true when called from the thread that created the loop.
    pub fn belongs_to_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl std::fmt::Debug for OwnerTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerTaskRunner")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

/// Task queue run by the owner thread.
///
/// The loop must be pumped from plain (non-async) code; it drives a private
/// current-thread runtime for its timed waits.
pub struct OwnerLoop {
    tx: mpsc::UnboundedSender<OwnerTask>,
    rx: mpsc::UnboundedReceiver<OwnerTask>,
    runtime: Runtime,
    thread_id: ThreadId,
}

impl OwnerLoop {
    /// Creates a loop bound to the current thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer runtime cannot be created.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            tx,
            rx,
            runtime,
            thread_id: thread::current().id(),
        })
    }

    /// Returns a runner that posts to this loop.
    pub fn runner(&self) -> OwnerTaskRunner {
        OwnerTaskRunner {
            tx: self.tx.clone(),
            thread_id: self.thread_id,
        }
    }

    /// Runs every task already queued. Returns how many ran.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Runs tasks until `done` returns true or `timeout` elapses. Returns the
    /// final value of `done`.
    pub fn run_until<F>(&mut self, mut done: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        let Self { rx, runtime, .. } = self;

        while !done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let next = runtime.block_on(async { tokio::time::timeout(remaining, rx.recv()).await });
            match next {
                Ok(Some(task)) => task(),
                Ok(None) | Err(_) => return done(),
            }
        }
        true
    }

    /// Runs tasks for `duration`.
    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(|| false, duration);
    }
}
