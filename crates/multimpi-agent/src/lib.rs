//! Leader and follower agents.
//!
//! Each agent polls the broker, reacts to what it is told, and returns one
//! result per unit of work. Leaders also own the external launcher process.

pub mod broker_process;
pub mod client;
pub mod follower;
pub mod identity;
pub mod launcher;
pub mod leader;
pub mod role;
pub mod sequence;
pub mod transport;
pub mod trust;

pub use client::HttpBroker;
pub use follower::run_follower;
pub use identity::Identity;
pub use launcher::{Completion, LaunchedProcess};
pub use leader::{run_leader, LeaderJob};
pub use role::{run_unit, RoleSpec, UnitResult};
pub use transport::Broker;
