//! Checkin protocol records exchanged between agents and the broker.
//!
//! One params type and one reply type per RPC method. A `None` reply
//! (JSON `null`) means "no assignment yet"; callers keep polling.

use serde::{Deserialize, Serialize};

pub const METHOD_LEADER_CHECKIN: &str = "leader_checkin";
pub const METHOD_FOLLOWER_CHECKIN: &str = "follower_checkin";
pub const METHOD_HELLO_WORLD: &str = "hello_world";

/// Leader lifecycle: `waiting -> scheduled -> running -> exiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderState {
    Waiting,
    Scheduled,
    Running,
    Exiting,
}

impl std::fmt::Display for LeaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Exiting => write!(f, "exiting"),
        }
    }
}

/// Follower lifecycle: `available -> assigned -> running -> exiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowerState {
    Available,
    Assigned,
    Running,
    Exiting,
}

impl std::fmt::Display for FollowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Assigned => write!(f, "assigned"),
            Self::Running => write!(f, "running"),
            Self::Exiting => write!(f, "exiting"),
        }
    }
}

/// Registry key for a process: `host_pid`.
pub fn endpoint_key(host: &str, pid: u32) -> String {
    format!("{}_{}", host, pid)
}

/// Host part of an endpoint key (everything before the last `_`).
pub fn endpoint_host(key: &str) -> &str {
    key.rsplit_once('_').map(|(host, _)| host).unwrap_or(key)
}

/// `leader_checkin` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderCheckin {
    pub host: String,
    pub pid: u32,
    /// Cores the leader contributes itself.
    pub cores: u32,
    /// Total cores the job needs, leader included.
    pub wanted_cores: u32,
    /// Public credential handed to followers.
    #[serde(default)]
    pub pubkey: String,
    /// The leader's local view of its state.
    pub state: LeaderState,
    pub seq: u64,
}

impl LeaderCheckin {
    pub fn key(&self) -> String {
        endpoint_key(&self.host, self.pid)
    }
}

/// One follower in a leader's assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerSlot {
    pub fkey: String,
    pub cores: u32,
}

/// `leader_checkin` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderAssignment {
    pub state: LeaderState,
    /// `None` only in the `exiting` answer.
    pub followers: Option<Vec<FollowerSlot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lcores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobnumber: Option<u64>,
}

impl LeaderAssignment {
    pub fn exiting() -> Self {
        Self {
            state: LeaderState::Exiting,
            followers: None,
            lcores: None,
            jobnumber: None,
        }
    }

    /// Leader cores plus every follower's cores.
    pub fn total_cores(&self) -> u32 {
        let followers: u32 = self
            .followers
            .iter()
            .flatten()
            .map(|slot| slot.cores)
            .sum();
        self.lcores.unwrap_or(0) + followers
    }
}

/// `follower_checkin` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerCheckin {
    pub host: String,
    pub pid: u32,
    pub cores: u32,
    /// The follower's local view of its state.
    pub state: FollowerState,
    pub seq: u64,
}

impl FollowerCheckin {
    pub fn key(&self) -> String {
        endpoint_key(&self.host, self.pid)
    }
}

/// `follower_checkin` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerInstruction {
    pub state: FollowerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
}

impl FollowerInstruction {
    pub fn exiting() -> Self {
        Self {
            state: FollowerState::Exiting,
            leader: None,
            pubkey: None,
        }
    }

    /// Re-acknowledgement for a follower that already holds its assignment.
    pub fn assigned_ack() -> Self {
        Self {
            state: FollowerState::Assigned,
            leader: None,
            pubkey: None,
        }
    }
}

/// `hello_world` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloWorld {
    pub hello: String,
}

impl Default for HelloWorld {
    fn default() -> Self {
        Self {
            hello: "world!".into(),
        }
    }
}
