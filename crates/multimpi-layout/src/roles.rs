//! Manager / datastream / compute role layout.
//!
//! The machines file lists one host per role: the manager first, then each
//! datastream, then one compute role per host with cores left. The threads
//! file carries one line per compute role with that host's leftover cores.

use multimpi_core::{Error, Result};
use tracing::debug;

use crate::hosts::HostCores;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleLayout {
    /// Host for each role, in role order.
    pub machines: Vec<String>,
    /// Thread count for each compute role.
    pub threads: Vec<u32>,
}

impl RoleLayout {
    /// Place the manager on `own_host` and `datastreams` datastream roles
    /// round-robin across all hosts, one core each.
    pub fn build(hosts: &HostCores, own_host: &str, datastreams: u32) -> Result<Self> {
        let mut remaining = hosts.clone();
        let mut machines = Vec::new();

        if !remaining.take_one(own_host) {
            return Err(Error::Config(format!(
                "no core left on {} for the manager",
                own_host
            )));
        }
        machines.push(own_host.to_string());

        let order: Vec<String> = remaining.iter().map(|(h, _)| h.to_string()).collect();
        let mut placed = 0;
        while placed < datastreams {
            let mut progressed = false;
            for host in &order {
                if placed == datastreams {
                    break;
                }
                if remaining.take_one(host) {
                    machines.push(host.clone());
                    placed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Err(Error::Config(format!(
                    "ran out of cores placing datastreams: {} of {} placed",
                    placed, datastreams
                )));
            }
        }

        let mut threads = Vec::new();
        for (host, cores) in remaining.iter().filter(|(_, c)| *c > 0) {
            machines.push(host.to_string());
            threads.push(cores);
        }
        debug!(
            roles = machines.len(),
            compute = threads.len(),
            "built manager/datastream/compute layout"
        );

        Ok(Self { machines, threads })
    }

    pub fn machines_file(&self) -> String {
        self.machines.iter().map(|h| format!("{}\n", h)).collect()
    }

    pub fn threads_file(&self) -> String {
        self.threads.iter().map(|t| format!("{}\n", t)).collect()
    }
}
