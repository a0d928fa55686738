//! Per-host core totals.

use multimpi_core::protocol::{endpoint_host, FollowerSlot};

/// Cores per host, in first-seen order. The leader's host, when built
/// from an assignment, is always first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostCores {
    hosts: Vec<(String, u32)>,
}

impl HostCores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate a leader assignment by host. Follower identities sharing a
    /// host prefix sum their cores under one entry.
    pub fn from_assignment(own_host: &str, lcores: u32, followers: &[FollowerSlot]) -> Self {
        let mut hosts = Self::new();
        hosts.add(own_host, lcores);
        for slot in followers {
            hosts.add(endpoint_host(&slot.fkey), slot.cores);
        }
        hosts
    }

    pub fn add(&mut self, host: &str, cores: u32) {
        match self.hosts.iter_mut().find(|(h, _)| h == host) {
            Some((_, total)) => *total += cores,
            None => self.hosts.push((host.to_string(), cores)),
        }
    }

    pub fn get(&self, host: &str) -> Option<u32> {
        self.hosts.iter().find(|(h, _)| h == host).map(|(_, c)| *c)
    }

    /// Take one core from `host`. Returns `false` if it has none left.
    pub fn take_one(&mut self, host: &str) -> bool {
        match self.hosts.iter_mut().find(|(h, _)| h == host) {
            Some((_, cores)) if *cores > 0 => {
                *cores -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn total(&self) -> u32 {
        self.hosts.iter().map(|(_, c)| c).sum()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.hosts.iter().map(|(h, c)| (h.as_str(), *c))
    }
}
