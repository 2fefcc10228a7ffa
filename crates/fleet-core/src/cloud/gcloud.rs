//! `gcloud`-backed implementation of the cloud, probe and remote seams.
//!
//! Every call is one synchronous `gcloud` invocation. Nothing here retries:
//! the ensure, poll and provision layers decide what a failure means.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;

use super::{CloudApi, CloudResult, FirewallRule, InstanceSpec};
use crate::error::{CloudError, FleetError, Result};
use crate::io;
use crate::paths;
use crate::payload::PayloadArtifact;
use crate::readiness::Probe;
use crate::remote::{RemoteExecutor, RemoteOutcome};
use crate::types::{CloudResource, ResourceKind};

/// Resolve the `gcloud` binary on `PATH`.
pub fn gcloud_bin() -> Result<PathBuf> {
    which::which("gcloud").map_err(|_| FleetError::GcloudNotInstalled)
}

/// The project `gcloud` is currently configured for.
pub fn active_project() -> Result<String> {
    let bin = gcloud_bin()?;
    let output = Command::new(&bin)
        .args(["config", "get-value", "project"])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| FleetError::Precondition(e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FleetError::Precondition(stderr.trim().to_string()));
    }
    let project = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if project.is_empty() || project == "(unset)" {
        return Err(FleetError::NoActiveProject);
    }
    Ok(project)
}

#[derive(Debug, Clone)]
pub struct GcloudCli {
    bin: PathBuf,
    project: String,
    zone: String,
}

impl GcloudCli {
    pub fn new(project: impl Into<String>, zone: impl Into<String>) -> Result<Self> {
        Ok(Self::with_binary(gcloud_bin()?, project, zone))
    }

    pub fn with_binary(
        bin: impl Into<PathBuf>,
        project: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            bin: bin.into(),
            project: project.into(),
            zone: zone.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Argument builders
    // -----------------------------------------------------------------------

    fn scoped(&self, mut args: Vec<String>, zonal: bool) -> Vec<String> {
        if zonal {
            args.push(format!("--zone={}", self.zone));
        }
        args.push(format!("--project={}", self.project));
        args
    }

    fn instance_create_args(&self, spec: &InstanceSpec) -> Vec<String> {
        let args = vec![
            "compute".into(),
            "instances".into(),
            "create".into(),
            spec.name.clone(),
            format!("--machine-type={}", spec.machine_type),
            format!("--image-family={}", spec.image_family),
            format!("--image-project={}", spec.image_project),
            format!("--boot-disk-size={}GB", spec.disk_size_gb),
            format!("--boot-disk-type={}", spec.disk_type),
            format!("--tags={}", spec.tags.join(",")),
        ];
        let mut args = self.scoped(args, false);
        // The spec carries its own zone; it wins over the client default.
        args.push(format!("--zone={}", spec.zone));
        args
    }

    fn firewall_create_args(&self, rule: &FirewallRule) -> Vec<String> {
        let args = vec![
            "compute".into(),
            "firewall-rules".into(),
            "create".into(),
            rule.name.clone(),
            format!("--network={}", rule.network),
            "--direction=INGRESS".into(),
            format!("--allow={}", rule.allow.join(",")),
            format!("--source-ranges={}", rule.source_ranges.join(",")),
            format!("--target-tags={}", rule.target_tags.join(",")),
        ];
        self.scoped(args, false)
    }

    fn ssh_args(&self, machine: &str, command: &str) -> Vec<String> {
        let args = vec![
            "compute".into(),
            "ssh".into(),
            machine.to_string(),
            "--quiet".into(),
            "--strict-host-key-checking=no".into(),
            "--ssh-flag=-oConnectTimeout=5".into(),
            format!("--command={command}"),
        ];
        self.scoped(args, true)
    }

    fn scp_args(&self, local: &Path, machine: &str) -> Vec<String> {
        let args = vec![
            "compute".into(),
            "scp".into(),
            "--quiet".into(),
            "--strict-host-key-checking=no".into(),
            local.display().to_string(),
            format!("{machine}:{}", paths::REMOTE_PAYLOAD),
        ];
        self.scoped(args, true)
    }

    // -----------------------------------------------------------------------
    // Process plumbing
    // -----------------------------------------------------------------------

    /// Run gcloud with captured output. Non-zero exit becomes `CommandFailed`.
    fn run(&self, args: &[String]) -> CloudResult<String> {
        tracing::debug!(args = ?args, "gcloud");
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CloudError::Spawn(e.to_string()))?;
        if !output.status.success() {
            return Err(CloudError::CommandFailed {
                command: describe(args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run gcloud with stdout/stderr passed through; returns the exit code.
    fn run_streaming(&self, args: &[String]) -> CloudResult<i32> {
        tracing::debug!(args = ?args, "gcloud (streaming)");
        let status = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| CloudError::Spawn(e.to_string()))?;
        // Killed by a signal: no code, report as -1.
        Ok(status.code().unwrap_or(-1))
    }

    fn exists(&self, args: Vec<String>) -> CloudResult<bool> {
        match self.run(&args) {
            Ok(_) => Ok(true),
            Err(CloudError::CommandFailed { stderr, .. }) if is_not_found(&stderr) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(&self, kind: ResourceKind, name: &str, args: Vec<String>) -> CloudResult<()> {
        match self.run(&args) {
            Ok(_) => Ok(()),
            Err(CloudError::CommandFailed { stderr, .. }) if is_already_exists(&stderr) => {
                Err(CloudError::AlreadyExists {
                    kind,
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn delete(&self, kind: ResourceKind, name: &str, args: Vec<String>) -> CloudResult<()> {
        match self.run(&args) {
            Ok(_) => Ok(()),
            Err(CloudError::CommandFailed { stderr, .. }) if is_not_found(&stderr) => {
                Err(CloudError::NotFound {
                    kind,
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn describe(args: &[String]) -> String {
    args.iter()
        .take_while(|a| !a.starts_with("--"))
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("was not found") || stderr.contains("notFound")
}

fn is_already_exists(stderr: &str) -> bool {
    stderr.contains("already exists") || stderr.contains("alreadyExists")
}

// ---------------------------------------------------------------------------
// Listing formats (`--format=json`)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InstanceListing {
    name: String,
    /// Full resource URL; the zone is the last path segment.
    zone: String,
    #[serde(default)]
    tags: Option<InstanceTags>,
}

#[derive(Debug, Deserialize)]
struct InstanceTags {
    #[serde(default)]
    items: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirewallListing {
    name: String,
    #[serde(default)]
    target_tags: Vec<String>,
}

fn parse_instances(json: &str) -> CloudResult<Vec<CloudResource>> {
    let listing: Vec<InstanceListing> =
        serde_json::from_str(json).map_err(|e| CloudError::Parse(e.to_string()))?;
    Ok(listing
        .into_iter()
        .map(|i| {
            let zone = i.zone.rsplit('/').next().unwrap_or(&i.zone).to_string();
            let tags = i.tags.map(|t| t.items).unwrap_or_default();
            CloudResource::instance(i.name, zone, tags)
        })
        .collect())
}

fn parse_firewall_rules(json: &str) -> CloudResult<Vec<CloudResource>> {
    let listing: Vec<FirewallListing> =
        serde_json::from_str(json).map_err(|e| CloudError::Parse(e.to_string()))?;
    Ok(listing
        .into_iter()
        .map(|r| CloudResource::network_rule(r.name, r.target_tags))
        .collect())
}

// ---------------------------------------------------------------------------
// CloudApi
// ---------------------------------------------------------------------------

impl CloudApi for GcloudCli {
    fn preflight(&self) -> CloudResult<()> {
        let args = vec![
            "compute".into(),
            "zones".into(),
            "describe".into(),
            self.zone.clone(),
            "--format=value(name)".into(),
        ];
        self.run(&self.scoped(args, false)).map(|_| ())
    }

    fn instance_exists(&self, name: &str) -> CloudResult<bool> {
        let args = vec![
            "compute".into(),
            "instances".into(),
            "describe".into(),
            name.to_string(),
            "--format=value(name)".into(),
        ];
        self.exists(self.scoped(args, true))
    }

    fn create_instance(&self, spec: &InstanceSpec) -> CloudResult<()> {
        self.create(
            ResourceKind::ComputeInstance,
            &spec.name,
            self.instance_create_args(spec),
        )
    }

    fn delete_instance(&self, name: &str, zone: &str) -> CloudResult<()> {
        let args = vec![
            "compute".into(),
            "instances".into(),
            "delete".into(),
            name.to_string(),
            format!("--zone={zone}"),
            "--quiet".into(),
        ];
        self.delete(
            ResourceKind::ComputeInstance,
            name,
            self.scoped(args, false),
        )
    }

    fn firewall_rule_exists(&self, name: &str) -> CloudResult<bool> {
        let args = vec![
            "compute".into(),
            "firewall-rules".into(),
            "describe".into(),
            name.to_string(),
            "--format=value(name)".into(),
        ];
        self.exists(self.scoped(args, false))
    }

    fn create_firewall_rule(&self, rule: &FirewallRule) -> CloudResult<()> {
        self.create(
            ResourceKind::NetworkRule,
            &rule.name,
            self.firewall_create_args(rule),
        )
    }

    fn delete_firewall_rule(&self, name: &str) -> CloudResult<()> {
        let args = vec![
            "compute".into(),
            "firewall-rules".into(),
            "delete".into(),
            name.to_string(),
            "--quiet".into(),
        ];
        self.delete(ResourceKind::NetworkRule, name, self.scoped(args, false))
    }

    fn list_instances(&self) -> CloudResult<Vec<CloudResource>> {
        let args = vec![
            "compute".into(),
            "instances".into(),
            "list".into(),
            "--format=json".into(),
        ];
        parse_instances(&self.run(&self.scoped(args, false))?)
    }

    fn list_firewall_rules(&self) -> CloudResult<Vec<CloudResource>> {
        let args = vec![
            "compute".into(),
            "firewall-rules".into(),
            "list".into(),
            "--format=json".into(),
        ];
        parse_firewall_rules(&self.run(&self.scoped(args, false))?)
    }
}

// ---------------------------------------------------------------------------
// Probe / RemoteExecutor
// ---------------------------------------------------------------------------

impl Probe for GcloudCli {
    fn probe(&self, target: &str) -> std::result::Result<(), String> {
        self.run(&self.ssh_args(target, "true"))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

impl RemoteExecutor for GcloudCli {
    fn transfer(&self, machine: &str, artifact: &PayloadArtifact) -> std::result::Result<(), String> {
        let tmp = io::temp_script(artifact.body()).map_err(|e| e.to_string())?;
        self.run(&self.scp_args(tmp.path(), machine))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn invoke(&self, machine: &str) -> std::result::Result<RemoteOutcome, String> {
        let command = format!(
            "chmod +x {p} && ./{p}",
            p = paths::REMOTE_PAYLOAD
        );
        let exit_code = self
            .run_streaming(&self.ssh_args(machine, &command))
            .map_err(|e| e.to_string())?;
        Ok(RemoteOutcome::from_exit_code(exit_code))
    }
}
