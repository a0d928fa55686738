//! Follower agent: advertise cores, accept the leader's key, wait for the end.

use multimpi_core::{AgentConfig, FollowerCheckin, FollowerState, Result};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::identity::Identity;
use crate::sequence::next_sequence;
use crate::transport::Broker;
use crate::trust::deploy_public_key;

/// Poll until the broker says `exiting`.
pub async fn run_follower<B: Broker>(
    broker: &B,
    config: &AgentConfig,
    identity: &Identity,
    ncores: u32,
) -> Result<()> {
    let mut checkin = FollowerCheckin {
        host: identity.host.clone(),
        pid: identity.pid,
        cores: ncores,
        state: FollowerState::Available,
        seq: next_sequence(),
    };
    info!(key = %identity.key(), cores = ncores, seq = checkin.seq, "follower starting");

    loop {
        if let Some(instruction) = broker.follower_checkin(&checkin).await? {
            match instruction.state {
                FollowerState::Exiting => {
                    info!(key = %identity.key(), "follower told to exit");
                    return Ok(());
                }
                FollowerState::Assigned if checkin.state != FollowerState::Assigned => {
                    info!(leader = ?instruction.leader, "follower assigned");
                    let pubkey = instruction.pubkey.as_deref().unwrap_or_default();
                    deploy_public_key(&config.ssh_dir, pubkey)?;
                }
                FollowerState::Available if checkin.state != FollowerState::Available => {
                    debug!("broker dropped our assignment, available again");
                }
                _ => {}
            }
            checkin.state = instruction.state;
        }
        sleep(config.follower_poll_interval).await;
    }
}
