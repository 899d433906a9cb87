//! Lock coordinator backends.
//!
//! All of them implement [`LockCoordinator`](crate::domain::ports::LockCoordinator)
//! and are interchangeable behind a `LockCoordinatorBox`.

pub mod advisory;
pub mod queue;

pub use advisory::{advisory_key, AdvisoryLock, SessionAdvisoryLock};
pub use queue::QueueLock;
