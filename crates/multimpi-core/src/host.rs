//! Local host facts: name, fully qualified name, usable cores.

/// Short host name used in endpoint keys.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Fully qualified host name, if one can be found.
///
/// Falls back to `hostname -f` when the kernel host name is unqualified.
pub fn fqdn() -> Option<String> {
    let name = hostname();
    if name.contains('.') {
        return Some(name);
    }

    #[cfg(unix)]
    {
        use std::process::Command;
        let qualified = Command::new("hostname")
            .arg("-f")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| s.contains('.'));
        if qualified.is_some() {
            return qualified;
        }
    }

    tracing::debug!("no fully qualified name found for host {}", name);
    None
}

/// Cores this process may run on (respects CPU affinity on Linux).
pub fn local_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_not_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_local_cores_positive() {
        assert!(local_cores() >= 1);
    }

    #[test]
    fn test_fqdn_is_qualified() {
        if let Some(name) = fqdn() {
            assert!(name.contains('.'));
        }
    }
}
