//! Registry records.

use std::time::Instant;

use multimpi_core::{FollowerCheckin, FollowerState, LeaderCheckin, LeaderState};

/// Broker-side view of one leader.
#[derive(Debug, Clone)]
pub struct LeaderRecord {
    pub cores: u32,
    pub wanted_cores: u32,
    pub pubkey: String,
    pub state: LeaderState,
    pub last_checkin: Instant,
    pub seq: u64,
    /// Followers assigned to the current job, in assignment order.
    pub fkeys: Vec<String>,
    /// Set by the first successful schedule.
    pub jobnumber: Option<u64>,
}

impl LeaderRecord {
    pub fn new(req: &LeaderCheckin, now: Instant) -> Self {
        Self {
            cores: req.cores,
            wanted_cores: req.wanted_cores,
            pubkey: req.pubkey.clone(),
            state: LeaderState::Waiting,
            last_checkin: now,
            seq: req.seq,
            fkeys: Vec::new(),
            jobnumber: None,
        }
    }

    /// Refresh the advertised wants of a waiting leader.
    pub fn overwrite(&mut self, req: &LeaderCheckin) {
        self.state = LeaderState::Waiting;
        self.cores = req.cores;
        self.wanted_cores = req.wanted_cores;
        self.seq = req.seq;
        self.pubkey = req.pubkey.clone();
        self.fkeys.clear();
        self.jobnumber = None;
    }
}

/// Broker-side view of one follower.
#[derive(Debug, Clone)]
pub struct FollowerRecord {
    pub cores: u32,
    pub state: FollowerState,
    pub last_checkin: Instant,
    pub seq: u64,
    /// Registration order; followers are offered to leaders FIFO.
    pub ordinal: u64,
    pub leader: Option<String>,
    pub pubkey: Option<String>,
    pub jobnumber: Option<u64>,
}

impl FollowerRecord {
    pub fn new(req: &FollowerCheckin, ordinal: u64, now: Instant) -> Self {
        Self {
            cores: req.cores,
            state: FollowerState::Available,
            last_checkin: now,
            seq: req.seq,
            ordinal,
            leader: None,
            pubkey: None,
            jobnumber: None,
        }
    }

    /// Drop any assignment and offer the cores again.
    pub fn release(&mut self) {
        self.state = FollowerState::Available;
        self.leader = None;
        self.pubkey = None;
        self.jobnumber = None;
    }

    /// Whether this follower still counts toward `jobnumber`.
    pub fn serves(&self, jobnumber: Option<u64>) -> bool {
        matches!(self.state, FollowerState::Assigned | FollowerState::Running)
            && self.jobnumber.is_some()
            && self.jobnumber == jobnumber
    }
}
