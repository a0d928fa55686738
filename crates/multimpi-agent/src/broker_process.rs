//! Owning the broker as a child process: start, probe, tear down.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use multimpi_core::config::{DEFAULT_PORT, RPC_PATH};
use multimpi_core::{host, AgentConfig, Error, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::client::HttpBroker;

const STARTUP_GRACE: Duration = Duration::from_secs(3);
const TEARDOWN_POLLS: u32 = 10;
const TEARDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Where a broker listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    pub host: String,
    pub port: u16,
}

impl BrokerAddr {
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, RPC_PATH)
    }
}

/// Parse `host:port`. An empty host means this machine's fully qualified
/// name; a missing port means the default.
pub fn resolve_hostport(hostport: &str) -> Result<BrokerAddr> {
    let (host, port) = match hostport.rsplit_once(':') {
        Some((host, "")) => (host, DEFAULT_PORT),
        Some((host, port)) => (
            host,
            port.parse()
                .map_err(|_| Error::Config(format!("bad broker port in {:?}", hostport)))?,
        ),
        None => (hostport, DEFAULT_PORT),
    };

    let host = if host.is_empty() {
        host::fqdn().ok_or_else(|| {
            Error::Config("did not find a valid FQDN, pass a host name explicitly".into())
        })?
    } else {
        host.to_string()
    };
    Ok(BrokerAddr { host, port })
}

/// The broker binary: `MULTIMPI_BROKER_BIN`, else `multimpi-broker` next to
/// this executable, else whatever `multimpi-broker` resolves to on `PATH`.
pub fn broker_program() -> PathBuf {
    if let Ok(path) = std::env::var("MULTIMPI_BROKER_BIN") {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("multimpi-broker")))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from("multimpi-broker"))
}

pub struct BrokerProcess {
    child: Child,
    addr: BrokerAddr,
}

impl BrokerProcess {
    /// Spawn the broker, give it a moment, and probe it.
    pub async fn start(program: &Path, addr: BrokerAddr) -> Result<Self> {
        let child = Command::new(program)
            .arg(&addr.host)
            .arg(addr.port.to_string())
            .spawn()
            .map_err(|e| Error::Broker(format!("failed to start {}: {}", program.display(), e)))?;
        info!("started broker {} (pid {:?})", program.display(), child.id());

        let mut process = Self { child, addr };
        sleep(STARTUP_GRACE).await;
        if let Some(status) = process.child.try_wait()? {
            return Err(Error::Broker(format!("broker exited immediately with {}", status)));
        }

        let probe = HttpBroker::new(&AgentConfig::new(process.addr.url()))?;
        if let Err(e) = probe.hello_world().await {
            process.tear_down().await?;
            return Err(e);
        }
        info!("broker answering at {}", process.addr.url());
        Ok(process)
    }

    pub fn addr(&self) -> &BrokerAddr {
        &self.addr
    }

    pub fn is_running(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_none())
    }

    /// SIGHUP, wait up to ten seconds, then SIGKILL.
    pub async fn tear_down(&mut self) -> Result<()> {
        if let Some(pid) = self.child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGHUP) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(Error::Broker(format!("SIGHUP to broker: {}", e))),
            }
        }

        for _ in 0..TEARDOWN_POLLS {
            if let Some(status) = self.child.try_wait()? {
                info!("broker exited with {}", status);
                return Ok(());
            }
            sleep(TEARDOWN_POLL_INTERVAL).await;
        }

        warn!("broker ignored SIGHUP, killing it");
        self.child.kill().await?;
        Ok(())
    }

    /// Tear down unless the broker already exited on its own.
    pub async fn end(&mut self) -> Result<()> {
        match self.child.try_wait()? {
            Some(status) => {
                info!("broker had already exited with {}", status);
                Ok(())
            }
            None => self.tear_down().await,
        }
    }
}

/// First ^C only warns; the second tears the broker down and returns so the
/// caller can exit.
pub async fn watch_interrupts(broker: Arc<Mutex<BrokerProcess>>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut seen = 0;
    while sigint.recv().await.is_some() {
        seen += 1;
        if seen == 1 {
            warn!("^C seen, type it again to tear down the broker");
            continue;
        }
        warn!("tearing down the broker for ^C");
        broker.lock().await.tear_down().await?;
        return Ok(());
    }
    Ok(())
}
