use crate::error::{FleetError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Local file names
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "fleet.yaml";
pub const TEARDOWN_INSTANCES_SCRIPT: &str = "teardown-instances.sh";
pub const TEARDOWN_FIREWALL_SCRIPT: &str = "teardown-firewall.sh";

// ---------------------------------------------------------------------------
// Remote file names (relative to the login user's home directory)
// ---------------------------------------------------------------------------

pub const REMOTE_PAYLOAD: &str = "fleet-install.sh";
pub const REMOTE_ACCESS_SCRIPT: &str = "cluster-urls.sh";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

pub fn teardown_instances_path(dir: &Path) -> PathBuf {
    dir.join(TEARDOWN_INSTANCES_SCRIPT)
}

pub fn teardown_firewall_path(dir: &Path) -> PathBuf {
    dir.join(TEARDOWN_FIREWALL_SCRIPT)
}

// ---------------------------------------------------------------------------
// Resource names
// ---------------------------------------------------------------------------

/// Longest name Compute Engine accepts for instances and firewall rules.
pub const MAX_NAME_LEN: usize = 63;

/// Name of the `index`-th machine (1-based).
pub fn machine_name(prefix: &str, index: u32) -> String {
    format!("{prefix}-{index}")
}

pub fn ssh_rule_name(prefix: &str) -> String {
    format!("{prefix}-allow-ssh")
}

pub fn services_rule_name(prefix: &str) -> String {
    format!("{prefix}-allow-services")
}

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").unwrap())
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || !name_re().is_match(name) {
        return Err(FleetError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in ["k8s-node", "a", "node-10", "x1"] {
            validate_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
    }

    #[test]
    fn invalid_names() {
        for name in [
            "",
            "-starts-with-dash",
            "ends-with-dash-",
            "1-starts-with-digit",
            "has spaces",
            "UPPER",
            "a_b",
        ] {
            assert!(validate_name(name).is_err(), "expected invalid: {name}");
        }
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn derived_names() {
        assert_eq!(machine_name("k8s-node", 3), "k8s-node-3");
        assert_eq!(ssh_rule_name("k8s-node"), "k8s-node-allow-ssh");
        assert_eq!(services_rule_name("k8s-node"), "k8s-node-allow-services");
    }

    #[test]
    fn path_helpers() {
        let dir = Path::new("/tmp/work");
        assert_eq!(config_path(dir), PathBuf::from("/tmp/work/fleet.yaml"));
        assert_eq!(
            teardown_firewall_path(dir),
            PathBuf::from("/tmp/work/teardown-firewall.sh")
        );
    }
}
