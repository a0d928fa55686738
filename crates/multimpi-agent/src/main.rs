//! multimpi-agent: run leader/follower units, or drive a whole batch
//! against a broker it owns.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use multimpi_agent::broker_process::{broker_program, resolve_hostport, watch_interrupts, BrokerProcess};
use multimpi_agent::{run_unit, HttpBroker, Identity, RoleSpec};
use multimpi_core::AgentConfig;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage:
  multimpi-agent unit <role-json>            Run one leader or follower unit
  multimpi-agent drive <units.json> [host:port]
                                             Start a broker, run every unit, stop the broker

Environment:
  MULTIMPI_SERVER_URL   broker JSON-RPC URL (unit)
  MULTIMPI_BROKER_BIN   broker binary (drive)
  MULTIMPI_SSH_DIR      ssh directory, default $HOME/.ssh
  MULTIMPI_WORK_DIR     where launcher files are written";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries unit results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("unit") if args.len() == 3 => unit(&args[2]).await,
        Some("drive") if args.len() == 3 || args.len() == 4 => {
            let hostport = args.get(3).map(String::as_str).unwrap_or(":8889");
            drive(&args[2], hostport).await
        }
        Some("--help" | "-h" | "help") => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

/// One unit; the result is printed as a JSON line on stdout.
async fn unit(role_json: &str) -> anyhow::Result<()> {
    let role: RoleSpec = serde_json::from_str(role_json).context("bad role descriptor")?;
    let config = AgentConfig::from_env()?;
    let broker = HttpBroker::new(&config)?;
    let result = run_unit(&broker, &config, &Identity::current(), &role).await?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

/// Start a broker, exec one `unit` child per descriptor, print their
/// results as a JSON array, then stop the broker.
async fn drive(units_path: &str, hostport: &str) -> anyhow::Result<()> {
    let units: Vec<RoleSpec> = serde_json::from_str(
        &std::fs::read_to_string(units_path).with_context(|| format!("reading {}", units_path))?,
    )
    .context("bad unit list")?;

    let addr = resolve_hostport(hostport)?;
    let url = addr.url();
    let broker = Arc::new(Mutex::new(BrokerProcess::start(&broker_program(), addr).await?));
    info!("broker url is {}", url);

    let exe = std::env::current_exe()?;
    let mut children = JoinSet::new();
    for (index, role) in units.iter().enumerate() {
        let child = Command::new(&exe)
            .arg("unit")
            .arg(serde_json::to_string(role)?)
            .env("MULTIMPI_SERVER_URL", &url)
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        children.spawn(async move { (index, child.wait_with_output().await) });
    }

    let mut watcher = tokio::spawn(watch_interrupts(Arc::clone(&broker)));
    let mut results = vec![Value::Null; units.len()];
    let mut failures = 0;

    loop {
        tokio::select! {
            joined = children.join_next() => {
                let Some(joined) = joined else { break };
                let (index, output) = joined?;
                let output = output?;
                results[index] = match last_json_line(&output.stdout) {
                    Some(value) if output.status.success() => value,
                    _ => {
                        failures += 1;
                        warn!(unit = index, status = %output.status, "unit failed");
                        json!({"kind": "failed", "status": output.status.code()})
                    }
                };
            }
            _ = &mut watcher => {
                children.shutdown().await;
                std::process::exit(1);
            }
        }
    }
    watcher.abort();

    broker.lock().await.end().await?;
    info!(units = units.len(), failures, "all units finished");
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// Units may share stdout with their launched process; the result is the
/// last line.
fn last_json_line(stdout: &[u8]) -> Option<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line).ok())
}
