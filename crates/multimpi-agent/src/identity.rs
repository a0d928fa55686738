//! Who an agent claims to be when it checks in.

use multimpi_core::host;
use multimpi_core::protocol::endpoint_key;

/// Host plus a per-host discriminator (normally the process id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub host: String,
    pub pid: u32,
}

impl Identity {
    pub fn current() -> Self {
        Self {
            host: host::hostname(),
            pid: std::process::id(),
        }
    }

    pub fn key(&self) -> String {
        endpoint_key(&self.host, self.pid)
    }
}
