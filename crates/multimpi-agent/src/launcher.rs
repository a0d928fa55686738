//! External multi-host process: spawn, interrupt, poll, drain.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use multimpi_core::{Error, Result};
use multimpi_layout::LauncherFiles;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How the external process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Exit code, or the negated signal number if it was killed.
    pub returncode: i32,
    /// Captured output; `None` when capture was off.
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Expand a launch template into argv.
///
/// `{}` and `{np}` become the core count, `{machinefile}` and
/// `{threadsfile}` the written launcher files.
pub fn expand_template(template: &str, np: u32, files: &LauncherFiles) -> Result<Vec<String>> {
    let mut expanded = template
        .replace("{np}", &np.to_string())
        .replace("{}", &np.to_string())
        .replace("{machinefile}", &files.machinefile.display().to_string());

    if expanded.contains("{threadsfile}") {
        let threads = files.threadsfile.as_ref().ok_or_else(|| {
            Error::Config("launch template uses {threadsfile} but the flavor writes none".into())
        })?;
        expanded = expanded.replace("{threadsfile}", &threads.display().to_string());
    }

    let argv: Vec<String> = expanded.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(Error::Config("empty launch command".into()));
    }
    Ok(argv)
}

pub struct LaunchedProcess {
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
    status: Option<ExitStatus>,
}

impl LaunchedProcess {
    /// Start `argv` in `dir`. With `capture`, stdout and stderr are drained
    /// by background tasks so the child never blocks on a full pipe.
    pub fn spawn(argv: &[String], capture: bool, dir: &Path) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Config("empty launch command".into()))?;

        let mut command = Command::new(program);
        command.args(args).current_dir(dir).stdin(Stdio::null());
        if capture {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Launch(format!("failed to start {}: {}", program, e)))?;
        info!("launched {} (pid {:?})", argv.join(" "), child.id());

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        Ok(Self {
            child,
            stdout,
            stderr,
            status: None,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send SIGINT. A process that already exited is not an error.
    pub fn interrupt(&self) -> Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        debug!(pid, "interrupting launched process");
        kill(Pid::from_raw(pid as i32), Signal::SIGINT)
            .map_err(|e| Error::Launch(format!("SIGINT to {}: {}", pid, e)))
    }

    /// Non-blocking exit check.
    pub fn try_status(&mut self) -> Result<Option<i32>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status.map(returncode))
    }

    /// Wait for exit and collect captured output.
    pub async fn finish(mut self) -> Result<Completion> {
        let status = match self.status {
            Some(status) => status,
            None => self.child.wait().await?,
        };
        let stdout = collect(self.stdout.take()).await?;
        let stderr = collect(self.stderr.take()).await?;
        let returncode = returncode(status);
        info!(returncode, "launched process finished");
        Ok(Completion {
            returncode,
            stdout,
            stderr,
        })
    }
}

fn returncode(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or(0))
}

fn drain<R>(mut pipe: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("pipe read ended early: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn collect(handle: Option<JoinHandle<String>>) -> Result<Option<String>> {
    match handle {
        Some(handle) => handle
            .await
            .map(Some)
            .map_err(|e| Error::Internal(format!("output reader: {}", e))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    fn files() -> LauncherFiles {
        LauncherFiles {
            machinefile: PathBuf::from("/tmp/work/multimpi.machines"),
            threadsfile: None,
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn test_expand_template() {
        let argv = expand_template("mpirun -np {} --hostfile {machinefile} ./a.out", 3, &files())
            .unwrap();
        assert_eq!(
            argv,
            vec!["mpirun", "-np", "3", "--hostfile", "/tmp/work/multimpi.machines", "./a.out"]
        );
        let argv = expand_template("run {np}", 8, &files()).unwrap();
        assert_eq!(argv, vec!["run", "8"]);
    }

    #[test]
    fn test_expand_template_errors() {
        assert!(matches!(
            expand_template("run {threadsfile}", 1, &files()),
            Err(Error::Config(_))
        ));
        assert!(matches!(expand_template("   ", 1, &files()), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_capture_output() {
        let dir = tempfile::tempdir().unwrap();
        let proc = LaunchedProcess::spawn(&sh("echo out; echo err >&2; exit 3"), true, dir.path())
            .unwrap();
        let done = proc.finish().await.unwrap();
        assert_eq!(done.returncode, 3);
        assert_eq!(done.stdout.as_deref(), Some("out\n"));
        assert_eq!(done.stderr.as_deref(), Some("err\n"));
    }

    #[tokio::test]
    async fn test_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = LaunchedProcess::spawn(
            &["sleep".to_string(), "30".to_string()],
            false,
            dir.path(),
        )
        .unwrap();
        assert_eq!(proc.try_status().unwrap(), None);
        proc.interrupt().unwrap();
        let done = proc.finish().await.unwrap();
        assert_eq!(done.returncode, -2);
        assert!(done.stdout.is_none());
    }

    #[tokio::test]
    async fn test_try_status_sees_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = LaunchedProcess::spawn(&sh("exit 0"), false, dir.path()).unwrap();
        let mut status = None;
        for _ in 0..50 {
            status = proc.try_status().unwrap();
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, Some(0));
        assert_eq!(proc.finish().await.unwrap().returncode, 0);
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let err = LaunchedProcess::spawn(&["/nonexistent/launcher".to_string()], false, dir.path())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Launch(_)));
    }
}
