//! Launcher flavors and the files they read.

use std::path::{Path, PathBuf};

use multimpi_core::{Error, Result};
use tracing::info;

use crate::hosts::HostCores;
use crate::roles::RoleLayout;
use crate::slots::slot_list;

pub const MACHINEFILE_NAME: &str = "multimpi.machines";
pub const THREADSFILE_NAME: &str = "multimpi.threads";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherFlavor {
    /// `host slots=N` lines.
    OpenMpi,
    /// Manager, datastream and compute roles plus a threads file.
    Difx { datastreams: u32 },
}

impl LauncherFlavor {
    /// Resolve a flavor name from a role descriptor. `None` means the
    /// generic slot list.
    pub fn parse(name: Option<&str>, datastreams: Option<u32>) -> Result<Self> {
        match name.unwrap_or("openmpi") {
            "openmpi" => Ok(Self::OpenMpi),
            "difx" => datastreams
                .map(|datastreams| Self::Difx { datastreams })
                .ok_or_else(|| Error::Config("difx launcher needs a datastream count".into())),
            other => Err(Error::Config(format!("unsupported launcher flavor: {}", other))),
        }
    }

    /// Cores on the leader's host the launcher cannot hand to ranks. The
    /// slot list holds one back for the leader process; the role layout
    /// runs its manager there instead.
    pub fn reserved_cores(&self) -> u32 {
        match self {
            Self::OpenMpi => 1,
            Self::Difx { .. } => 0,
        }
    }

    /// Write the launcher files for `hosts` into `dir`.
    pub fn write(
        &self,
        hosts: &HostCores,
        own_host: &str,
        requested: u32,
        dir: &Path,
    ) -> Result<LauncherFiles> {
        std::fs::create_dir_all(dir)?;
        // The launched process runs inside `dir`, so relative paths would
        // resolve twice.
        let dir = std::fs::canonicalize(dir)?;
        let machinefile = dir.join(MACHINEFILE_NAME);

        match self {
            Self::OpenMpi => {
                let contents = slot_list(hosts, own_host, requested)?;
                std::fs::write(&machinefile, contents)?;
                info!("wrote slot list to {}", machinefile.display());
                Ok(LauncherFiles {
                    machinefile,
                    threadsfile: None,
                })
            }
            Self::Difx { datastreams } => {
                let layout = RoleLayout::build(hosts, own_host, *datastreams)?;
                let threadsfile = dir.join(THREADSFILE_NAME);
                std::fs::write(&machinefile, layout.machines_file())?;
                std::fs::write(&threadsfile, layout.threads_file())?;
                info!(
                    "wrote {} roles to {} and {}",
                    layout.machines.len(),
                    machinefile.display(),
                    threadsfile.display()
                );
                Ok(LauncherFiles {
                    machinefile,
                    threadsfile: Some(threadsfile),
                })
            }
        }
    }
}

/// Paths of the files a launch command may reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherFiles {
    pub machinefile: PathBuf,
    pub threadsfile: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> HostCores {
        let mut hosts = HostCores::new();
        hosts.add("me", 3);
        hosts.add("foo", 6);
        hosts
    }

    #[test]
    fn test_parse() {
        assert_eq!(LauncherFlavor::parse(None, None).unwrap(), LauncherFlavor::OpenMpi);
        assert_eq!(
            LauncherFlavor::parse(Some("difx"), Some(2)).unwrap(),
            LauncherFlavor::Difx { datastreams: 2 }
        );
        assert!(matches!(
            LauncherFlavor::parse(Some("mpich"), None),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            LauncherFlavor::parse(Some("difx"), None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_reserved_cores() {
        assert_eq!(LauncherFlavor::OpenMpi.reserved_cores(), 1);
        assert_eq!(LauncherFlavor::Difx { datastreams: 4 }.reserved_cores(), 0);
    }

    #[test]
    fn test_write_slot_list() {
        let dir = tempfile::tempdir().unwrap();
        let files = LauncherFlavor::OpenMpi
            .write(&hosts(), "me", 8, dir.path())
            .unwrap();
        assert!(files.threadsfile.is_none());
        let contents = std::fs::read_to_string(&files.machinefile).unwrap();
        assert_eq!(contents, "me slots=2\nfoo slots=6\n");
    }

    #[test]
    fn test_write_role_layout() {
        let dir = tempfile::tempdir().unwrap();
        let files = LauncherFlavor::Difx { datastreams: 3 }
            .write(&hosts(), "me", 9, dir.path())
            .unwrap();
        let machines = std::fs::read_to_string(&files.machinefile).unwrap();
        let threads = std::fs::read_to_string(files.threadsfile.unwrap()).unwrap();
        assert_eq!(machines, "me\nme\nfoo\nme\nfoo\n");
        assert_eq!(threads, "5\n");
    }

    #[test]
    fn test_relative_dir_yields_absolute_paths() {
        let dir = tempfile::tempdir_in(".").unwrap();
        let relative = Path::new(".").join(dir.path().file_name().unwrap()).join("work");
        assert!(relative.is_relative());

        let files = LauncherFlavor::Difx { datastreams: 1 }
            .write(&hosts(), "me", 9, &relative)
            .unwrap();
        assert!(files.machinefile.is_absolute());
        assert!(files.machinefile.exists());
        assert!(files.threadsfile.unwrap().is_absolute());
    }

    #[test]
    fn test_insufficient_cores_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let err = LauncherFlavor::OpenMpi
            .write(&hosts(), "me", 20, dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!dir.path().join(MACHINEFILE_NAME).exists());
    }
}
