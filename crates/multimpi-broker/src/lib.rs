//! Checkin broker: the authoritative leader/follower registry and the
//! scheduling engine that matches follower cores to a waiting leader.
//!
//! Every checkin is handled to completion under one lock, so the
//! registry itself needs no finer-grained synchronization.

pub mod dispatch;
pub mod scheduler;
pub mod types;

pub use dispatch::Dispatcher;
pub use scheduler::Scheduler;
pub use types::{FollowerRecord, LeaderRecord};
