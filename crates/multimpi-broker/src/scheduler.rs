//! Scheduler: leader/follower registries and the checkin state machines.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use multimpi_core::{
    FollowerCheckin, FollowerInstruction, FollowerSlot, FollowerState, LeaderAssignment,
    LeaderCheckin, LeaderState,
};
use tracing::{debug, info, warn};

use crate::types::{FollowerRecord, LeaderRecord};

/// Authoritative broker state. Not thread-safe on its own; callers
/// serialize checkins (see [`crate::Dispatcher`]).
#[derive(Debug)]
pub struct Scheduler {
    leaders: HashMap<String, LeaderRecord>,
    followers: HashMap<String, FollowerRecord>,
    record_lifetime: Duration,
    next_jobnumber: u64,
    next_ordinal: u64,
    exiting: bool,
}

impl Scheduler {
    pub fn new(record_lifetime: Duration) -> Self {
        Self {
            leaders: HashMap::new(),
            followers: HashMap::new(),
            record_lifetime,
            next_jobnumber: 0,
            next_ordinal: 0,
            exiting: false,
        }
    }

    pub fn leader(&self, key: &str) -> Option<&LeaderRecord> {
        self.leaders.get(key)
    }

    pub fn follower(&self, key: &str) -> Option<&FollowerRecord> {
        self.followers.get(key)
    }

    /// (leaders, followers) currently registered.
    pub fn counts(&self) -> (usize, usize) {
        (self.leaders.len(), self.followers.len())
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    pub fn is_drained(&self) -> bool {
        self.leaders.is_empty() && self.followers.is_empty()
    }

    // ---------------------------------------------------------------
    // Leader checkin
    // ---------------------------------------------------------------

    pub fn leader_checkin(&mut self, req: &LeaderCheckin) -> Option<LeaderAssignment> {
        self.leader_checkin_at(req, Instant::now())
    }

    /// Handle one leader checkin as of `now`.
    pub fn leader_checkin_at(
        &mut self,
        req: &LeaderCheckin,
        now: Instant,
    ) -> Option<LeaderAssignment> {
        let lkey = req.key();

        if self.exiting {
            self.forget(&lkey);
            return Some(LeaderAssignment::exiting());
        }

        if self.followers.remove(&lkey).is_some() {
            info!(key = %lkey, "follower identity now checking in as a leader, dropping follower record");
        }

        let fresh = match self.leaders.get_mut(&lkey) {
            Some(leader) if leader.seq != req.seq => {
                info!(
                    key = %lkey,
                    state = %leader.state,
                    "leader checked in with new sequence number, replacing old record"
                );
                *leader = LeaderRecord::new(req, now);
                true
            }
            Some(leader) => {
                leader.last_checkin = now;
                false
            }
            None => {
                self.leaders.insert(lkey.clone(), LeaderRecord::new(req, now));
                true
            }
        };

        let prior = self.leaders.get(&lkey)?.state;

        if prior == LeaderState::Exiting {
            return Some(LeaderAssignment::exiting());
        }

        if req.state == LeaderState::Exiting {
            self.finish_job(&lkey, prior);
            return Some(LeaderAssignment::exiting());
        }

        let reason = match prior {
            LeaderState::Scheduled | LeaderState::Running => self.check_followers(&lkey, prior),
            LeaderState::Waiting => {
                if let Some(leader) = self.leaders.get_mut(&lkey) {
                    leader.overwrite(req);
                }
                Some(if fresh { "new leader" } else { "waiting leader" })
            }
            LeaderState::Exiting => None,
        };

        if let Some(reason) = reason {
            info!(key = %lkey, "trying schedule because of {}", reason);
            if !self.schedule(&lkey, now) && prior == LeaderState::Scheduled {
                self.revert_to_waiting(&lkey);
            }
        }

        let leader = self.leaders.get(&lkey)?;
        match leader.state {
            LeaderState::Scheduled | LeaderState::Running => Some(self.assignment_for(leader)),
            _ => None,
        }
    }

    /// Re-validate the followers of a scheduled or running leader. Returns a
    /// reschedule reason when a scheduled job lost followers.
    fn check_followers(&mut self, lkey: &str, prior: LeaderState) -> Option<&'static str> {
        let valid = self.valid_fkeys(lkey);
        let all_running = valid.iter().all(|f| {
            self.followers
                .get(f)
                .map_or(false, |f| f.state == FollowerState::Running)
        });
        let leader = self.leaders.get_mut(lkey)?;

        if valid.len() != leader.fkeys.len() {
            debug!(key = %lkey, old = ?leader.fkeys, new = ?valid, "follower set shrank");
            leader.fkeys = valid;
            if prior == LeaderState::Scheduled {
                return Some("a follower disappeared while scheduled");
            }
            warn!(key = %lkey, "running leader lost a follower, the launched job keeps its layout");
        } else if prior == LeaderState::Scheduled && all_running {
            info!(jobnumber = ?leader.jobnumber, "job has reached the running state");
            leader.state = LeaderState::Running;
        }
        None
    }

    /// Leader announced that its job ended: one-way move to `exiting`.
    fn finish_job(&mut self, lkey: &str, prior: LeaderState) {
        if prior == LeaderState::Running {
            for fkey in self.valid_fkeys(lkey) {
                if let Some(follower) = self.followers.get_mut(&fkey) {
                    if follower.state == FollowerState::Running {
                        follower.state = FollowerState::Exiting;
                    }
                }
            }
        } else {
            warn!(key = %lkey, state = %prior, "leader announced exiting without running");
        }
        if let Some(leader) = self.leaders.get_mut(lkey) {
            leader.state = LeaderState::Exiting;
        }
    }

    /// Followers of `lkey` that still exist, are assigned or running, and
    /// carry the leader's current job number.
    fn valid_fkeys(&self, lkey: &str) -> Vec<String> {
        let Some(leader) = self.leaders.get(lkey) else {
            return Vec::new();
        };
        leader
            .fkeys
            .iter()
            .filter(|f| {
                self.followers
                    .get(f.as_str())
                    .map_or(false, |f| f.serves(leader.jobnumber))
            })
            .cloned()
            .collect()
    }

    fn assignment_for(&self, leader: &LeaderRecord) -> LeaderAssignment {
        let followers = leader
            .fkeys
            .iter()
            .filter_map(|fkey| {
                self.followers.get(fkey).map(|f| FollowerSlot {
                    fkey: fkey.clone(),
                    cores: f.cores,
                })
            })
            .collect();
        LeaderAssignment {
            state: leader.state,
            followers: Some(followers),
            lcores: Some(leader.cores),
            jobnumber: leader.jobnumber,
        }
    }

    // ---------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------

    /// Try to (re)schedule `lkey`. On failure nothing is modified apart from
    /// reaping and pruning already-invalid followers.
    fn schedule(&mut self, lkey: &str, now: Instant) -> bool {
        self.reap(now);

        let valid = self.valid_fkeys(lkey);
        let Some(leader) = self.leaders.get_mut(lkey) else {
            return false;
        };
        leader.fkeys = valid;

        let is_reschedule = !leader.fkeys.is_empty() && leader.jobnumber.is_some();
        let held: i64 = leader
            .fkeys
            .iter()
            .filter_map(|f| self.followers.get(f))
            .map(|f| i64::from(f.cores))
            .sum();
        let need = i64::from(leader.wanted_cores) - i64::from(leader.cores) - held;
        debug!(key = %lkey, need, held, "schedule: cores wanted beyond leader and held followers");

        let chosen = if need > 0 {
            match self.find_followers(need) {
                Some(chosen) => chosen,
                None => {
                    info!(key = %lkey, need, "failed to schedule");
                    return false;
                }
            }
        } else {
            Vec::new()
        };

        let jobnumber = match (is_reschedule, self.leaders.get(lkey).and_then(|l| l.jobnumber)) {
            (true, Some(existing)) => existing,
            _ => {
                let minted = self.next_jobnumber;
                self.next_jobnumber += 1;
                minted
            }
        };

        let Some(leader) = self.leaders.get_mut(lkey) else {
            return false;
        };
        for fkey in &chosen {
            if let Some(follower) = self.followers.get_mut(fkey) {
                follower.state = FollowerState::Assigned;
                follower.leader = Some(lkey.to_string());
                follower.pubkey = Some(leader.pubkey.clone());
                follower.jobnumber = Some(jobnumber);
            }
        }
        leader.fkeys.extend(chosen);
        leader.jobnumber = Some(jobnumber);

        if leader.fkeys.is_empty() {
            info!(key = %lkey, jobnumber, "job fits the leader, running");
            leader.state = LeaderState::Running;
        } else {
            info!(
                key = %lkey,
                jobnumber,
                followers = leader.fkeys.len(),
                "{}",
                if is_reschedule { "re-scheduled" } else { "scheduled" }
            );
            leader.state = LeaderState::Scheduled;
        }
        true
    }

    /// Available followers in registration order until `need` cores are
    /// covered, or `None` if the pool cannot cover it.
    fn find_followers(&self, need: i64) -> Option<Vec<String>> {
        let mut available: Vec<(&String, &FollowerRecord)> = self
            .followers
            .iter()
            .filter(|(_, f)| f.state == FollowerState::Available)
            .collect();
        available.sort_by_key(|(_, f)| f.ordinal);

        let mut remaining = need;
        let mut chosen = Vec::new();
        for (key, follower) in available {
            if remaining <= 0 {
                break;
            }
            remaining -= i64::from(follower.cores);
            chosen.push(key.clone());
        }
        (remaining <= 0).then_some(chosen)
    }

    fn revert_to_waiting(&mut self, lkey: &str) {
        let Some(leader) = self.leaders.get_mut(lkey) else {
            return;
        };
        if !leader.fkeys.is_empty() {
            info!(key = %lkey, count = leader.fkeys.len(), "after failed reschedule, freeing followers");
        }
        for fkey in leader.fkeys.drain(..) {
            if let Some(follower) = self.followers.get_mut(&fkey) {
                follower.release();
            }
        }
        leader.state = LeaderState::Waiting;
    }

    // ---------------------------------------------------------------
    // Follower checkin
    // ---------------------------------------------------------------

    pub fn follower_checkin(&mut self, req: &FollowerCheckin) -> Option<FollowerInstruction> {
        self.follower_checkin_at(req, Instant::now())
    }

    /// Handle one follower checkin as of `now`.
    pub fn follower_checkin_at(
        &mut self,
        req: &FollowerCheckin,
        now: Instant,
    ) -> Option<FollowerInstruction> {
        let fkey = req.key();

        if self.exiting {
            self.forget(&fkey);
            return Some(FollowerInstruction::exiting());
        }

        if let Some(old) = self.leaders.remove(&fkey) {
            info!(key = %fkey, "leader identity now checking in as a follower, dropping leader record");
            for f in &old.fkeys {
                if let Some(follower) = self.followers.get_mut(f) {
                    if follower.state == FollowerState::Assigned {
                        follower.state = FollowerState::Exiting;
                    }
                }
            }
        }

        match self.followers.get_mut(&fkey) {
            Some(follower) if follower.seq != req.seq => {
                info!(
                    key = %fkey,
                    state = %follower.state,
                    "follower checked in with new sequence number, replacing old record"
                );
                *follower = FollowerRecord::new(req, follower.ordinal, now);
            }
            Some(follower) => follower.last_checkin = now,
            None => {
                let ordinal = self.next_ordinal;
                self.next_ordinal += 1;
                self.followers
                    .insert(fkey.clone(), FollowerRecord::new(req, ordinal, now));
            }
        }

        let follower = self.followers.get_mut(&fkey)?;

        match (follower.state, req.state) {
            (FollowerState::Exiting, _) => Some(FollowerInstruction::exiting()),

            // Duplicate delivery: the follower already holds this assignment.
            (FollowerState::Running, FollowerState::Assigned) => {
                Some(FollowerInstruction::assigned_ack())
            }

            // The follower holds an assignment the broker no longer has for
            // it. Tell it to go back to available; a pending new assignment
            // is delivered on its next checkin.
            (stored, FollowerState::Assigned) => {
                debug!(key = %fkey, %stored, "follower reports a stale assignment");
                if stored == FollowerState::Available {
                    follower.cores = req.cores;
                }
                Some(FollowerInstruction {
                    state: FollowerState::Available,
                    leader: None,
                    pubkey: None,
                })
            }

            // Hand-off. Re-derived from stored state, so a repeated
            // `available` checkin gets the same answer.
            (FollowerState::Assigned | FollowerState::Running, FollowerState::Available) => {
                follower.state = FollowerState::Running;
                Some(FollowerInstruction {
                    state: FollowerState::Assigned,
                    leader: follower.leader.clone(),
                    pubkey: follower.pubkey.clone(),
                })
            }

            (stored, _) => {
                if stored == FollowerState::Running {
                    debug!(key = %fkey, "destroying follower schedule");
                }
                follower.release();
                follower.cores = req.cores;
                None
            }
        }
    }

    // ---------------------------------------------------------------
    // Reaper and shutdown
    // ---------------------------------------------------------------

    /// Purge records that have not checked in within the record lifetime.
    /// Returns the number of records removed.
    pub fn reap(&mut self, now: Instant) -> usize {
        let lifetime = self.record_lifetime;
        let expired = |t: Instant| now.saturating_duration_since(t) > lifetime;
        let before = self.leaders.len() + self.followers.len();

        self.followers.retain(|fkey, f| {
            if !expired(f.last_checkin) {
                return true;
            }
            match f.state {
                FollowerState::Running => warn!(
                    key = %fkey,
                    jobnumber = ?f.jobnumber,
                    "running follower timed out, that is a bad sign"
                ),
                FollowerState::Assigned => info!(
                    key = %fkey,
                    jobnumber = ?f.jobnumber,
                    "assigned follower timed out, its leader will reschedule"
                ),
                _ => debug!(key = %fkey, state = %f.state, "follower timed out"),
            }
            false
        });

        self.leaders.retain(|lkey, l| {
            if !expired(l.last_checkin) {
                return true;
            }
            info!(key = %lkey, state = %l.state, jobnumber = ?l.jobnumber, "leader timed out");
            false
        });

        before - (self.leaders.len() + self.followers.len())
    }

    /// Start draining. Returns `true` when nothing is left to drain.
    pub fn shutdown(&mut self) -> bool {
        self.exiting = true;
        self.leaders.retain(|_, l| l.state != LeaderState::Exiting);
        self.followers.retain(|_, f| f.state != FollowerState::Exiting);
        let (leaders, followers) = self.counts();
        if leaders + followers > 0 {
            info!(leaders, followers, "draining, records remain");
        }
        self.is_drained()
    }

    /// Drop an identity from both tables after telling it to exit.
    fn forget(&mut self, key: &str) {
        self.leaders.remove(key);
        self.followers.remove(key);
    }
}
