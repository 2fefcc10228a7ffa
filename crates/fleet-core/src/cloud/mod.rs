//! The cloud control plane as seen by the orchestrator.
//!
//! [`CloudApi`] is the only way the rest of the crate talks to Compute Engine.
//! Production uses [`GcloudCli`], which shells out to the `gcloud` binary;
//! tests use an in-memory implementation with scripted failures.

pub mod gcloud;
#[cfg(test)]
pub mod memory;

pub use gcloud::GcloudCli;

use serde::{Deserialize, Serialize};

use crate::error::CloudError;
use crate::types::CloudResource;

pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// A firewall rule descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub network: String,
    /// Protocol/port specs such as `tcp:22` or `tcp:30000-32767`.
    pub allow: Vec<String>,
    pub source_ranges: Vec<String>,
    pub target_tags: Vec<String>,
}

/// A compute instance descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub image_family: String,
    pub image_project: String,
    pub disk_size_gb: u32,
    pub disk_type: String,
    pub tags: Vec<String>,
}

pub trait CloudApi {
    /// Cheap call proving the API is reachable for the configured project.
    fn preflight(&self) -> CloudResult<()>;

    fn instance_exists(&self, name: &str) -> CloudResult<bool>;
    fn create_instance(&self, spec: &InstanceSpec) -> CloudResult<()>;
    fn delete_instance(&self, name: &str, zone: &str) -> CloudResult<()>;

    fn firewall_rule_exists(&self, name: &str) -> CloudResult<bool>;
    fn create_firewall_rule(&self, rule: &FirewallRule) -> CloudResult<()>;
    fn delete_firewall_rule(&self, name: &str) -> CloudResult<()>;

    fn list_instances(&self) -> CloudResult<Vec<CloudResource>>;
    fn list_firewall_rules(&self) -> CloudResult<Vec<CloudResource>>;
}
