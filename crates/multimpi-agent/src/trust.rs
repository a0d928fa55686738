//! Public key discovery and the authorized-keys trust store.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use multimpi_core::Result;
use tracing::{info, warn};

pub const PUBLIC_KEY_FILE: &str = "id_rsa.pub";
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// The leader's public key, or an empty string if it has none.
pub fn read_public_key(ssh_dir: &Path) -> String {
    let path = ssh_dir.join(PUBLIC_KEY_FILE);
    match fs::read_to_string(&path) {
        Ok(key) => key,
        Err(e) => {
            warn!("no public key at {}: {}; followers will not be configured", path.display(), e);
            String::new()
        }
    }
}

/// Append `pubkey` to `authorized_keys` unless it is already present.
/// Returns whether the file was changed. An empty key is a no-op.
pub fn deploy_public_key(ssh_dir: &Path, pubkey: &str) -> Result<bool> {
    let key = pubkey.trim();
    if key.is_empty() {
        return Ok(false);
    }

    if !ssh_dir.exists() {
        DirBuilder::new().recursive(true).mode(0o700).create(ssh_dir)?;
    }

    let path = ssh_dir.join(AUTHORIZED_KEYS_FILE);
    let existing = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let changed = if existing.lines().any(|line| line.trim() == key) {
        false
    } else {
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        writeln!(file, "{}", key)?;
        info!("added public key to {}", path.display());
        true
    };

    fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE: &str = "a fake public key\n";

    #[test]
    fn test_read_public_key() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_public_key(dir.path()), "");
        fs::write(dir.path().join(PUBLIC_KEY_FILE), FAKE).unwrap();
        assert_eq!(read_public_key(dir.path()), FAKE);
    }

    #[test]
    fn test_deploy_once() {
        let dir = tempfile::tempdir().unwrap();
        let keyfile = dir.path().join(AUTHORIZED_KEYS_FILE);

        assert!(deploy_public_key(dir.path(), FAKE).unwrap());
        let mode = fs::metadata(&keyfile).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_to_string(&keyfile).unwrap(), FAKE);

        assert!(!deploy_public_key(dir.path(), FAKE).unwrap());
        assert_eq!(fs::read_to_string(&keyfile).unwrap(), FAKE);
    }

    #[test]
    fn test_creates_private_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = dir.path().join("home").join(".ssh");
        deploy_public_key(&ssh, FAKE).unwrap();
        let mode = fs::metadata(&ssh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_appends_after_unterminated_line() {
        let dir = tempfile::tempdir().unwrap();
        let keyfile = dir.path().join(AUTHORIZED_KEYS_FILE);
        fs::write(&keyfile, "ssh-ed25519 other").unwrap();
        deploy_public_key(dir.path(), FAKE).unwrap();
        assert_eq!(
            fs::read_to_string(&keyfile).unwrap(),
            "ssh-ed25519 other\na fake public key\n"
        );
    }

    #[test]
    fn test_empty_key_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!deploy_public_key(dir.path(), "  \n").unwrap());
        assert!(!dir.path().join(AUTHORIZED_KEYS_FILE).exists());
    }
}
