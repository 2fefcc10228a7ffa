use crate::error::{FleetError, Result};
use crate::paths;
use crate::types::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// LocationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Falls back to `gcloud config get-value project` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_zone")]
    pub zone: String,
}

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_zone() -> String {
    "us-central1-a".to_string()
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            project: None,
            region: default_region(),
            zone: default_zone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MachineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_machine_type")]
    pub machine_type: String,
    #[serde(default = "default_image_family")]
    pub image_family: String,
    #[serde(default = "default_image_project")]
    pub image_project: String,
    #[serde(default = "default_disk_size")]
    pub disk_size_gb: u32,
    #[serde(default = "default_disk_type")]
    pub disk_type: String,
    /// Network tag attached to every instance and targeted by the shared rules.
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_prefix() -> String {
    "k8s-node".to_string()
}

fn default_machine_type() -> String {
    "e2-standard-4".to_string()
}

fn default_image_family() -> String {
    "ubuntu-2204-lts".to_string()
}

fn default_image_project() -> String {
    "ubuntu-os-cloud".to_string()
}

fn default_disk_size() -> u32 {
    50
}

fn default_disk_type() -> String {
    "pd-balanced".to_string()
}

fn default_tag() -> String {
    "fleet-k8s".to_string()
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            machine_type: default_machine_type(),
            image_family: default_image_family(),
            image_project: default_image_project(),
            disk_size_gb: default_disk_size(),
            disk_type: default_disk_type(),
            tag: default_tag(),
        }
    }
}

// ---------------------------------------------------------------------------
// ReadinessConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound of random extra delay added to each interval.
    #[serde(default)]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_interval_secs() -> u64 {
    10
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_secs: default_interval_secs(),
            jitter_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// StackConfig
// ---------------------------------------------------------------------------

/// Component versions baked into the installation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default = "default_kind_version")]
    pub kind_version: String,
    #[serde(default = "default_kubectl_version")]
    pub kubectl_version: String,
    #[serde(default = "default_helm_version")]
    pub helm_version: String,
    #[serde(default = "default_calico_version")]
    pub calico_version: String,
    #[serde(default = "default_node_image")]
    pub node_image: String,
}

fn default_kind_version() -> String {
    "v0.23.0".to_string()
}

fn default_kubectl_version() -> String {
    "v1.30.2".to_string()
}

fn default_helm_version() -> String {
    "v3.15.2".to_string()
}

fn default_calico_version() -> String {
    "v3.28.0".to_string()
}

fn default_node_image() -> String {
    "kindest/node:v1.30.0".to_string()
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            kind_version: default_kind_version(),
            kubectl_version: default_kubectl_version(),
            helm_version: default_helm_version(),
            calico_version: default_calico_version(),
            node_image: default_node_image(),
        }
    }
}

// ---------------------------------------------------------------------------
// FleetConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Retry the copy+run pair once per machine before marking it failed.
    #[serde(default)]
    pub retry_remote_once: bool,
    #[serde(default)]
    pub stack: StackConfig,
}

impl FleetConfig {
    /// Load `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: FleetConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Write a default config into `dir` unless one exists. Returns true if written.
    pub fn init(dir: &Path) -> Result<bool> {
        let data = serde_yaml::to_string(&Self::default())?;
        crate::io::write_if_missing(&paths::config_path(dir), data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // Longest derived name is "<prefix>-allow-services".
        let longest = paths::services_rule_name(&self.machine.prefix);
        if paths::validate_name(&self.machine.prefix).is_err()
            || paths::validate_name(&longest).is_err()
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "machine.prefix '{}' does not yield valid resource names",
                    self.machine.prefix
                ),
            });
        }

        if paths::validate_name(&self.machine.tag).is_err() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("machine.tag '{}' is not a valid network tag", self.machine.tag),
            });
        }

        // Zones are `<region>-<letter>`.
        if !self
            .location
            .zone
            .starts_with(&format!("{}-", self.location.region))
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "zone '{}' is not in region '{}'",
                    self.location.zone, self.location.region
                ),
            });
        }

        if self.readiness.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "readiness.max_attempts must be at least 1".to_string(),
            });
        }

        if self.readiness.interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "readiness.interval_secs is 0; probes will run back to back".to_string(),
            });
        }

        if self.machine.disk_size_gb < 20 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "machine.disk_size_gb {} is likely too small for the cluster images",
                    self.machine.disk_size_gb
                ),
            });
        }

        warnings
    }

    /// Fail on the first `Error`-level warning.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(FleetError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = FleetConfig::load(&dir.path().join("fleet.yaml")).unwrap();
        assert_eq!(cfg.machine.prefix, "k8s-node");
        assert_eq!(cfg.location.zone, "us-central1-a");
        assert_eq!(cfg.failure_policy, FailurePolicy::FailFast);
        assert!(!cfg.retry_remote_once);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleet.yaml");
        std::fs::write(
            &path,
            "machine:\n  prefix: lab\nreadiness:\n  max_attempts: 5\nfailure_policy: continue\n",
        )
        .unwrap();
        let cfg = FleetConfig::load(&path).unwrap();
        assert_eq!(cfg.machine.prefix, "lab");
        assert_eq!(cfg.machine.machine_type, "e2-standard-4");
        assert_eq!(cfg.readiness.max_attempts, 5);
        assert_eq!(cfg.readiness.interval_secs, 10);
        assert_eq!(cfg.failure_policy, FailurePolicy::Continue);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleet.yaml");
        let mut cfg = FleetConfig::default();
        cfg.location.project = Some("demo-project".into());
        cfg.save(&path).unwrap();
        let loaded = FleetConfig::load(&path).unwrap();
        assert_eq!(loaded.location.project.as_deref(), Some("demo-project"));
    }

    #[test]
    fn init_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        assert!(FleetConfig::init(dir.path()).unwrap());
        assert!(!FleetConfig::init(dir.path()).unwrap());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(FleetConfig::default().validate().is_empty());
        FleetConfig::default().ensure_valid().unwrap();
    }

    #[test]
    fn validate_flags_bad_prefix_and_zone() {
        let mut cfg = FleetConfig::default();
        cfg.machine.prefix = "Bad_Prefix".into();
        cfg.location.zone = "europe-west1-b".into();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("machine.prefix")));
        assert!(warnings.iter().any(|w| w.message.contains("not in region")));
        assert!(matches!(
            cfg.ensure_valid().unwrap_err(),
            FleetError::InvalidConfig(_)
        ));
    }

    #[test]
    fn validate_zero_attempts_is_error() {
        let mut cfg = FleetConfig::default();
        cfg.readiness.max_attempts = 0;
        assert!(cfg.ensure_valid().is_err());
    }

    #[test]
    fn zone_must_belong_to_region_not_just_share_a_prefix() {
        let mut cfg = FleetConfig::default();
        cfg.location.region = "us-central1".into();
        cfg.location.zone = "us-central10-a".into();
        assert!(cfg.validate().iter().any(|w| w.message.contains("not in region")));

        cfg.location.zone = "us-central1-f".into();
        assert!(cfg.ensure_valid().is_ok());
    }
}
