use serde::Serialize;

use crate::cloud::{FirewallRule, InstanceSpec};
use crate::config::{FleetConfig, StackConfig};
use crate::error::{FleetError, Result};
use crate::paths;
use crate::readiness::BackoffPolicy;
use crate::types::FailurePolicy;

pub const MIN_MACHINES: u32 = 1;
pub const MAX_MACHINES: u32 = 10;

/// Parse the positional machine count. Absent means one machine.
pub fn parse_machine_count(raw: Option<&str>) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(MIN_MACHINES);
    };
    match raw.trim().parse::<u32>() {
        Ok(n) if (MIN_MACHINES..=MAX_MACHINES).contains(&n) => Ok(n),
        _ => Err(FleetError::InvalidMachineCount(raw.to_string())),
    }
}

fn check_count(count: u32) -> Result<()> {
    if !(MIN_MACHINES..=MAX_MACHINES).contains(&count) {
        return Err(FleetError::InvalidMachineCount(count.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub family: String,
    pub project: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskSpec {
    pub size_gb: u32,
    pub disk_type: String,
}

/// Everything one provisioning run needs. Built once, validated on
/// construction, and only ever passed by reference afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionRequest {
    pub count: u32,
    pub project: String,
    pub region: String,
    pub zone: String,
    pub prefix: String,
    pub machine_type: String,
    pub tag: String,
    pub image: ImageRef,
    pub disk: DiskSpec,
    pub readiness: BackoffPolicy,
    pub failure_policy: FailurePolicy,
    pub retry_remote_once: bool,
    pub stack: StackConfig,
}

impl ProvisionRequest {
    pub fn new(count: u32, project: impl Into<String>, cfg: &FleetConfig) -> Result<Self> {
        check_count(count)?;
        cfg.ensure_valid()?;
        let project = project.into();
        if project.trim().is_empty() {
            return Err(FleetError::NoActiveProject);
        }

        let request = Self {
            count,
            project,
            region: cfg.location.region.clone(),
            zone: cfg.location.zone.clone(),
            prefix: cfg.machine.prefix.clone(),
            machine_type: cfg.machine.machine_type.clone(),
            tag: cfg.machine.tag.clone(),
            image: ImageRef {
                family: cfg.machine.image_family.clone(),
                project: cfg.machine.image_project.clone(),
            },
            disk: DiskSpec {
                size_gb: cfg.machine.disk_size_gb,
                disk_type: cfg.machine.disk_type.clone(),
            },
            readiness: BackoffPolicy::from(&cfg.readiness),
            failure_policy: cfg.failure_policy,
            retry_remote_once: cfg.retry_remote_once,
            stack: cfg.stack.clone(),
        };
        request.validate()?;
        Ok(request)
    }

    /// Bounds and naming checks. Runs again at the start of every
    /// orchestration run, before any side effect.
    pub fn validate(&self) -> Result<()> {
        check_count(self.count)?;
        for name in self.machine_names() {
            paths::validate_name(&name)?;
        }
        for rule in self.shared_rules() {
            paths::validate_name(&rule.name)?;
        }
        Ok(())
    }

    /// `prefix-1` .. `prefix-N`, ascending.
    pub fn machine_names(&self) -> Vec<String> {
        (1..=self.count)
            .map(|i| paths::machine_name(&self.prefix, i))
            .collect()
    }

    pub fn instance_spec(&self, name: &str) -> InstanceSpec {
        InstanceSpec {
            name: name.to_string(),
            zone: self.zone.clone(),
            machine_type: self.machine_type.clone(),
            image_family: self.image.family.clone(),
            image_project: self.image.project.clone(),
            disk_size_gb: self.disk.size_gb,
            disk_type: self.disk.disk_type.clone(),
            tags: vec![self.tag.clone()],
        }
    }

    /// The two network rules every machine in the run relies on.
    pub fn shared_rules(&self) -> [FirewallRule; 2] {
        [
            FirewallRule {
                name: paths::ssh_rule_name(&self.prefix),
                network: "default".to_string(),
                allow: vec!["tcp:22".to_string()],
                source_ranges: vec!["0.0.0.0/0".to_string()],
                target_tags: vec![self.tag.clone()],
            },
            FirewallRule {
                name: paths::services_rule_name(&self.prefix),
                network: "default".to_string(),
                allow: vec![
                    "tcp:6443".to_string(),
                    "tcp:30000-32767".to_string(),
                ],
                source_ranges: vec!["0.0.0.0/0".to_string()],
                target_tags: vec![self.tag.clone()],
            },
        ]
    }

    /// Human-readable summary shown before anything is created.
    pub fn summary(&self) -> String {
        let rules: Vec<String> = self.shared_rules().iter().map(|r| r.name.clone()).collect();
        format!(
            "Project:       {}\n\
             Region:        {}\n\
             Zone:          {}\n\
             Machine count: {}\n\
             Machine type:  {}\n\
             Machines:      {}\n\
             Network tag:   {}\n\
             Firewall:      {}\n",
            self.project,
            self.region,
            self.zone,
            self.count,
            self.machine_type,
            self.machine_names().join(", "),
            self.tag,
            rules.join(", "),
        )
    }
}
