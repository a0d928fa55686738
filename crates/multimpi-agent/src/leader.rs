//! Leader agent: wait for an assignment, launch once, report completion.

use multimpi_core::{AgentConfig, Error, LeaderAssignment, LeaderCheckin, LeaderState, Result};
use multimpi_layout::{HostCores, LauncherFlavor};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::identity::Identity;
use crate::launcher::{expand_template, Completion, LaunchedProcess};
use crate::sequence::next_sequence;
use crate::transport::Broker;
use crate::trust::read_public_key;

/// What a leader asks for and how it launches.
#[derive(Debug, Clone)]
pub struct LeaderJob {
    /// Cores the leader contributes.
    pub ncores: u32,
    /// Cores the launched job runs on; also the `{np}` of the template.
    /// The broker is asked for `wanted + flavor.reserved_cores()`, so with
    /// `openmpi` it sees one core more than this.
    pub wanted: u32,
    /// Launch template, see [`expand_template`].
    pub run_args: String,
    pub flavor: LauncherFlavor,
    pub capture_output: bool,
}

/// Drive one job attempt to completion.
///
/// Returns the launched process's completion. Fails with
/// [`Error::BrokerExiting`] if the broker drains before anything launched.
pub async fn run_leader<B: Broker>(
    broker: &B,
    config: &AgentConfig,
    identity: &Identity,
    job: &LeaderJob,
) -> Result<Completion> {
    let mut checkin = LeaderCheckin {
        host: identity.host.clone(),
        pid: identity.pid,
        cores: job.ncores,
        wanted_cores: job.wanted + job.flavor.reserved_cores(),
        pubkey: read_public_key(&config.ssh_dir),
        state: LeaderState::Waiting,
        seq: next_sequence(),
    };
    info!(key = %identity.key(), wanted = job.wanted, seq = checkin.seq, "leader starting");

    let mut process: Option<LaunchedProcess> = None;

    loop {
        let reply = broker.leader_checkin(&checkin).await?;

        match reply.as_ref().map(|a| a.state) {
            Some(LeaderState::Exiting) => {
                return match process.take() {
                    Some(running) => {
                        warn!("broker is exiting, interrupting the launched process");
                        interrupt_and_finish(running).await
                    }
                    None => Err(Error::BrokerExiting),
                };
            }
            Some(LeaderState::Waiting) => {
                if let Some(running) = process.take() {
                    warn!("broker sent a running leader back to waiting, a follower was lost");
                    return interrupt_and_finish(running).await;
                }
            }
            Some(LeaderState::Running) if process.is_none() => {
                if let Some(assignment) = &reply {
                    match launch(config, identity, job, assignment) {
                        Ok(launched) => {
                            process = Some(launched);
                            checkin.state = LeaderState::Running;
                        }
                        Err(e) => {
                            warn!("launch failed, releasing followers: {}", e);
                            checkin.state = LeaderState::Exiting;
                            if let Err(ack) = acknowledge_exit(broker, config, &checkin).await {
                                warn!("could not report exiting: {}", ack);
                            }
                            return Err(e);
                        }
                    }
                }
            }
            _ => {}
        }

        if let Some(running) = process.as_mut() {
            if let Some(code) = running.try_status()? {
                info!(returncode = code, "launched process exited");
                let completion = match process.take() {
                    Some(done) => done.finish().await?,
                    None => return Err(Error::Internal("launched process vanished".into())),
                };
                checkin.state = LeaderState::Exiting;
                if let Err(e) = acknowledge_exit(broker, config, &checkin).await {
                    warn!("job finished but exiting was never reported: {}", e);
                }
                return Ok(completion);
            }
        }

        sleep(config.leader_poll_interval).await;
    }
}

fn launch(
    config: &AgentConfig,
    identity: &Identity,
    job: &LeaderJob,
    assignment: &LeaderAssignment,
) -> Result<LaunchedProcess> {
    let followers = assignment.followers.as_deref().unwrap_or_default();
    let lcores = assignment.lcores.unwrap_or(job.ncores);
    info!(
        jobnumber = ?assignment.jobnumber,
        followers = followers.len(),
        total = assignment.total_cores(),
        "job is running, launching"
    );

    let hosts = HostCores::from_assignment(&identity.host, lcores, followers);
    let files = job
        .flavor
        .write(&hosts, &identity.host, job.wanted, &config.work_dir)?;
    let argv = expand_template(&job.run_args, job.wanted, &files)?;
    LaunchedProcess::spawn(&argv, job.capture_output, &config.work_dir)
}

async fn interrupt_and_finish(process: LaunchedProcess) -> Result<Completion> {
    process.interrupt()?;
    process.finish().await
}

/// Keep reporting `exiting` until the broker echoes it, within a bounded
/// number of attempts.
async fn acknowledge_exit<B: Broker>(
    broker: &B,
    config: &AgentConfig,
    checkin: &LeaderCheckin,
) -> Result<()> {
    for _ in 0..config.exit_ack_attempts {
        let reply = broker.leader_checkin(checkin).await?;
        if reply.map_or(false, |a| a.state == LeaderState::Exiting) {
            return Ok(());
        }
        sleep(config.leader_poll_interval).await;
    }
    warn!(
        attempts = config.exit_ack_attempts,
        "broker never acknowledged exiting"
    );
    Ok(())
}
