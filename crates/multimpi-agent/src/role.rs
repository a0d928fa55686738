//! Per-unit entry point for a work-distribution runtime.

use multimpi_core::{host, AgentConfig, Result};
use multimpi_layout::LauncherFlavor;
use serde::{Deserialize, Serialize};

use crate::follower::run_follower;
use crate::identity::Identity;
use crate::launcher::Completion;
use crate::leader::{run_leader, LeaderJob};
use crate::transport::Broker;

/// Placeholder result of a follower unit.
pub const FOLLOWER_DONE: &str = "follower done";

/// One unit of work as declared to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RoleSpec {
    Leader {
        /// Defaults to every local core.
        #[serde(default)]
        ncores: Option<u32>,
        wanted: u32,
        run_args: String,
        /// Launcher flavor, `openmpi` when absent.
        #[serde(default)]
        mpi: Option<String>,
        #[serde(default)]
        datastreams: Option<u32>,
        #[serde(default)]
        capture_output: bool,
    },
    Follower {
        #[serde(default)]
        ncores: Option<u32>,
    },
}

/// One result per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UnitResult {
    Leader { cli: Completion },
    Follower { cli: String },
}

impl RoleSpec {
    pub fn ncores(&self) -> u32 {
        let (Self::Leader { ncores, .. } | Self::Follower { ncores }) = self;
        ncores.unwrap_or_else(host::local_cores)
    }

    /// Resolve a leader descriptor into a job. Bad flavors fail here, before
    /// the first checkin.
    fn leader_job(&self) -> Result<Option<LeaderJob>> {
        let Self::Leader {
            wanted,
            run_args,
            mpi,
            datastreams,
            capture_output,
            ..
        } = self
        else {
            return Ok(None);
        };
        Ok(Some(LeaderJob {
            ncores: self.ncores(),
            wanted: *wanted,
            run_args: run_args.clone(),
            flavor: LauncherFlavor::parse(mpi.as_deref(), *datastreams)?,
            capture_output: *capture_output,
        }))
    }
}

/// Run one unit to completion.
pub async fn run_unit<B: Broker>(
    broker: &B,
    config: &AgentConfig,
    identity: &Identity,
    role: &RoleSpec,
) -> Result<UnitResult> {
    match role.leader_job()? {
        Some(job) => {
            let cli = run_leader(broker, config, identity, &job).await?;
            Ok(UnitResult::Leader { cli })
        }
        None => {
            run_follower(broker, config, identity, role.ncores()).await?;
            Ok(UnitResult::Follower {
                cli: FOLLOWER_DONE.to_string(),
            })
        }
    }
}
