//! multimpi core: wire protocol, configuration, errors and host helpers
//! shared by the broker, the agents and the launcher-layout translator.

pub mod config;
pub mod error;
pub mod host;
pub mod protocol;
pub mod rpc;

pub use config::{AgentConfig, BrokerConfig};
pub use error::{Error, Result};
pub use protocol::*;
