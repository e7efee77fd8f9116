//! Lenient drain of compute nodes.
//!
//! A node marked as draining keeps its in-flight runs; it is taken offline
//! only once it has nothing left to execute. Idleness is checked lazily:
//!
//! 1. [`CompletionListener`] receives every finalized run from the
//!    [`RunEventBus`](crate::events::RunEventBus)
//! 2. For each node the run may have occupied, if that node is draining,
//!    [`IdleProbeScheduler::schedule_idle_check`] spawns a delayed probe
//! 3. When the delay elapses the probe re-checks the drain, the node's
//!    presence, its offline state and its running work, and only then
//!    takes it offline with a cause naming the drain's current owner
//!
//! A node that never becomes idle is never taken offline; each later
//! completion gets another chance.

pub mod listener;
pub mod probe;

pub use listener::CompletionListener;
pub use probe::{IdleProbeScheduler, ProbeOutcome};
