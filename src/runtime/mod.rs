//! Threading primitives for the two-party model.
//!
//! The loader runs on exactly two threads: the owner thread, which holds the
//! peers and pumps an [`OwnerLoop`], and the [`IoThread`], where proxies and
//! scheme jobs run. All traffic between them is posted closures and channel
//! messages; the owner only blocks in synchronous loads, on a
//! [`WaitableEvent`].

pub mod io_thread;
pub mod owner_loop;
pub mod waitable_event;

pub use io_thread::IoThread;
pub use owner_loop::{OwnerLoop, OwnerTask, OwnerTaskRunner};
pub use waitable_event::WaitableEvent;
