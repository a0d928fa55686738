//! Generic `host slots=N` list.

use multimpi_core::{Error, Result};

use crate::hosts::HostCores;

/// Render a slot list. One core on `own_host` is held back for the leader
/// process itself; hosts left with no cores are omitted.
pub fn slot_list(hosts: &HostCores, own_host: &str, requested: u32) -> Result<String> {
    let mut hosts = hosts.clone();
    hosts.take_one(own_host);

    let mut out = String::new();
    let mut total = 0;
    for (host, cores) in hosts.iter().filter(|(_, c)| *c > 0) {
        out.push_str(&format!("{} slots={}\n", host, cores));
        total += cores;
    }

    if total < requested {
        return Err(Error::Config(format!(
            "only {} slots available for {} requested cores",
            total, requested
        )));
    }
    Ok(out)
}
