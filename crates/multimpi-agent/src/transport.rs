//! The agents' view of the broker.

use std::future::Future;

use multimpi_core::{
    FollowerCheckin, FollowerInstruction, LeaderAssignment, LeaderCheckin, Result,
};

/// One checkin per call.
///
/// `Ok(None)` means "nothing for you yet" and covers transient failures an
/// implementation chose to mask. `Err` is fatal to the calling agent.
pub trait Broker: Send + Sync {
    fn leader_checkin(
        &self,
        req: &LeaderCheckin,
    ) -> impl Future<Output = Result<Option<LeaderAssignment>>> + Send;

    fn follower_checkin(
        &self,
        req: &FollowerCheckin,
    ) -> impl Future<Output = Result<Option<FollowerInstruction>>> + Send;
}
