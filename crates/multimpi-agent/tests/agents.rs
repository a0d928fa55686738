//! Leader and follower agents against an in-process broker.

use std::path::Path;
use std::time::Duration;

use multimpi_agent::{run_follower, run_leader, Broker, Identity, LeaderJob};
use multimpi_broker::{Dispatcher, Scheduler};
use multimpi_core::rpc::RpcRequest;
use multimpi_core::{
    AgentConfig, Error, FollowerCheckin, FollowerInstruction, LeaderAssignment, LeaderCheckin,
    LeaderState, Result, METHOD_FOLLOWER_CHECKIN, METHOD_LEADER_CHECKIN,
};
use multimpi_layout::LauncherFlavor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Goes through the JSON-RPC dispatcher, minus HTTP.
struct LocalBroker {
    dispatcher: Dispatcher,
}

impl LocalBroker {
    fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(Scheduler::new(Duration::from_secs(30))),
        }
    }

    fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: &P) -> Result<R> {
        let request = RpcRequest::new(method, serde_json::to_value(params)?, 0);
        let response = self.dispatcher.handle_request(request);
        assert!(response.error.is_none(), "{:?}", response.error);
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }
}

impl Broker for LocalBroker {
    async fn leader_checkin(&self, req: &LeaderCheckin) -> Result<Option<LeaderAssignment>> {
        self.call(METHOD_LEADER_CHECKIN, req)
    }

    async fn follower_checkin(&self, req: &FollowerCheckin) -> Result<Option<FollowerInstruction>> {
        self.call(METHOD_FOLLOWER_CHECKIN, req)
    }
}

fn config(dir: &Path) -> AgentConfig {
    let mut config = AgentConfig::new("http://unused.invalid/jsonrpc");
    config.ssh_dir = dir.join("ssh");
    config.work_dir = dir.join("work");
    config.leader_poll_interval = Duration::from_millis(10);
    config.follower_poll_interval = Duration::from_millis(10);
    config.exit_ack_attempts = 5;
    config
}

fn identity(host: &str, pid: u32) -> Identity {
    Identity {
        host: host.into(),
        pid,
    }
}

#[tokio::test]
async fn test_leader_and_two_followers_run_job() {
    let broker = LocalBroker::new();

    let leader_dir = tempfile::tempdir().unwrap();
    let leader_config = config(leader_dir.path());
    std::fs::create_dir_all(&leader_config.ssh_dir).unwrap();
    std::fs::write(leader_config.ssh_dir.join("id_rsa.pub"), "ssh-rsa KEY head\n").unwrap();
    let script = leader_dir.path().join("job.sh");
    std::fs::write(&script, "cat \"$1\"\necho \"np=$2\"\n").unwrap();

    let job = LeaderJob {
        ncores: 2,
        wanted: 3,
        run_args: format!("sh {} {{machinefile}} {{np}}", script.display()),
        flavor: LauncherFlavor::OpenMpi,
        capture_output: true,
    };

    let f1_dir = tempfile::tempdir().unwrap();
    let f2_dir = tempfile::tempdir().unwrap();
    let f1_config = config(f1_dir.path());
    let f2_config = config(f2_dir.path());

    let head = identity("head", 1);
    let node1 = identity("node1", 11);
    let node2 = identity("node2", 12);
    let (completion, f1, f2) = tokio::join!(
        run_leader(&broker, &leader_config, &head, &job),
        run_follower(&broker, &f1_config, &node1, 1),
        run_follower(&broker, &f2_config, &node2, 1),
    );

    let completion = completion.unwrap();
    f1.unwrap();
    f2.unwrap();

    assert_eq!(completion.returncode, 0);
    assert_eq!(
        completion.stdout.as_deref(),
        Some("head slots=1\nnode1 slots=1\nnode2 slots=1\nnp=3\n")
    );
    for dir in [&f1_config.ssh_dir, &f2_config.ssh_dir] {
        let keys = std::fs::read_to_string(dir.join("authorized_keys")).unwrap();
        assert_eq!(keys, "ssh-rsa KEY head\n");
    }
    assert!(leader_config.work_dir.join("multimpi.machines").exists());
}

#[tokio::test]
async fn test_draining_broker_stops_agents() {
    let broker = LocalBroker::new();
    assert!(broker.dispatcher.scheduler().shutdown());

    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let job = LeaderJob {
        ncores: 1,
        wanted: 1,
        run_args: "true".into(),
        flavor: LauncherFlavor::OpenMpi,
        capture_output: false,
    };

    let err = run_leader(&broker, &config, &identity("head", 1), &job)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BrokerExiting));

    run_follower(&broker, &config, &identity("node", 2), 4).await.unwrap();
}

#[tokio::test]
async fn test_broker_exit_interrupts_running_job() {
    let broker = LocalBroker::new();
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let job = LeaderJob {
        ncores: 2,
        wanted: 1,
        run_args: "sleep 30".into(),
        flavor: LauncherFlavor::OpenMpi,
        capture_output: false,
    };

    let drain = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        broker.dispatcher.scheduler().shutdown();
    };
    let head = identity("head", 1);
    let (completion, ()) = tokio::join!(run_leader(&broker, &config, &head, &job), drain);

    let completion = completion.unwrap();
    assert_eq!(completion.returncode, -2, "SIGINT ends the job");
}

#[tokio::test]
async fn test_bad_layout_aborts_before_launch() {
    let broker = LocalBroker::new();
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let marker = dir.path().join("launched");
    let job = LeaderJob {
        ncores: 2,
        wanted: 2,
        run_args: format!("touch {}", marker.display()),
        flavor: LauncherFlavor::Difx { datastreams: 10 },
        capture_output: false,
    };

    let err = run_leader(&broker, &config, &identity("head", 1), &job)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_launch_failure_releases_followers() {
    let broker = LocalBroker::new();
    let leader_dir = tempfile::tempdir().unwrap();
    let follower_dir = tempfile::tempdir().unwrap();
    let leader_config = config(leader_dir.path());
    let follower_config = config(follower_dir.path());
    let job = LeaderJob {
        ncores: 1,
        wanted: 3,
        run_args: "true".into(),
        flavor: LauncherFlavor::Difx { datastreams: 10 },
        capture_output: false,
    };

    let head = identity("head", 1);
    let node = identity("node", 2);
    let (leader, follower) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            run_leader(&broker, &leader_config, &head, &job),
            run_follower(&broker, &follower_config, &node, 2),
        )
    })
    .await
    .expect("follower was left running after the leader failed to launch");

    assert!(matches!(leader.unwrap_err(), Error::Config(_)));
    follower.unwrap();
}

#[tokio::test]
async fn test_relative_work_dir() {
    let broker = LocalBroker::new();
    let scratch = tempfile::tempdir_in(".").unwrap();
    let relative = Path::new(".").join(scratch.path().file_name().unwrap());
    let mut config = config(&relative);
    assert!(config.work_dir.is_relative());
    config.ssh_dir = scratch.path().join("ssh");

    let job = LeaderJob {
        ncores: 2,
        wanted: 1,
        run_args: "cat {machinefile}".into(),
        flavor: LauncherFlavor::OpenMpi,
        capture_output: true,
    };
    let completion = run_leader(&broker, &config, &identity("head", 1), &job)
        .await
        .unwrap();
    assert_eq!(completion.returncode, 0, "{:?}", completion.stderr);
    assert_eq!(completion.stdout.as_deref(), Some("head slots=1\n"));
}

/// Loses the broker for good once the leader reports `exiting`.
struct LostOnExit(LocalBroker);

impl Broker for LostOnExit {
    async fn leader_checkin(&self, req: &LeaderCheckin) -> Result<Option<LeaderAssignment>> {
        if req.state == LeaderState::Exiting {
            return Err(Error::TooManyFailures {
                method: METHOD_LEADER_CHECKIN.into(),
                failures: 101,
            });
        }
        self.0.leader_checkin(req).await
    }

    async fn follower_checkin(&self, req: &FollowerCheckin) -> Result<Option<FollowerInstruction>> {
        self.0.follower_checkin(req).await
    }
}

#[tokio::test]
async fn test_completion_survives_lost_exit_report() {
    let broker = LostOnExit(LocalBroker::new());
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let job = LeaderJob {
        ncores: 2,
        wanted: 1,
        run_args: "echo finished".into(),
        flavor: LauncherFlavor::OpenMpi,
        capture_output: true,
    };

    let completion = run_leader(&broker, &config, &identity("head", 1), &job)
        .await
        .unwrap();
    assert_eq!(completion.returncode, 0);
    assert_eq!(completion.stdout.as_deref(), Some("finished\n"));
}
