//! Check-then-create for named cloud resources.
//!
//! The check and the create are two separate API calls, so a concurrent run
//! can create the resource in between. A create that fails because the
//! resource now exists, or a failed create followed by a positive re-check,
//! counts as `AlreadyExisted`.

use serde::{Deserialize, Serialize};

use crate::cloud::{CloudApi, CloudResult, FirewallRule, InstanceSpec};
use crate::error::CloudError;
use crate::types::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnsureOutcome {
    AlreadyExisted,
    Created,
    Failed { cause: String },
}

impl EnsureOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, EnsureOutcome::Failed { .. })
    }
}

/// A named cloud object with an existence predicate and a creation action.
pub trait ManagedResource {
    fn kind(&self) -> ResourceKind;
    fn name(&self) -> &str;
    fn exists(&self, cloud: &dyn CloudApi) -> CloudResult<bool>;
    fn create(&self, cloud: &dyn CloudApi) -> CloudResult<()>;
}

impl ManagedResource for FirewallRule {
    fn kind(&self) -> ResourceKind {
        ResourceKind::NetworkRule
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self, cloud: &dyn CloudApi) -> CloudResult<bool> {
        cloud.firewall_rule_exists(&self.name)
    }

    fn create(&self, cloud: &dyn CloudApi) -> CloudResult<()> {
        cloud.create_firewall_rule(self)
    }
}

impl ManagedResource for InstanceSpec {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ComputeInstance
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self, cloud: &dyn CloudApi) -> CloudResult<bool> {
        cloud.instance_exists(&self.name)
    }

    fn create(&self, cloud: &dyn CloudApi) -> CloudResult<()> {
        cloud.create_instance(self)
    }
}

/// Make sure `resource` exists. At most one creation call per invocation.
pub fn ensure(cloud: &dyn CloudApi, resource: &dyn ManagedResource) -> EnsureOutcome {
    let kind = resource.kind();
    let name = resource.name();

    match resource.exists(cloud) {
        Ok(true) => {
            tracing::info!(kind = %kind, name = %name, "already exists");
            return EnsureOutcome::AlreadyExisted;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(kind = %kind, name = %name, error = %e, "existence check failed");
            return EnsureOutcome::Failed {
                cause: e.to_string(),
            };
        }
    }

    tracing::info!(kind = %kind, name = %name, "creating");
    match resource.create(cloud) {
        Ok(()) => EnsureOutcome::Created,
        Err(CloudError::AlreadyExists { .. }) => {
            tracing::info!(kind = %kind, name = %name, "created concurrently by another run");
            EnsureOutcome::AlreadyExisted
        }
        Err(e) => {
            if let Ok(true) = resource.exists(cloud) {
                tracing::info!(kind = %kind, name = %name, error = %e, "create failed but resource now exists");
                return EnsureOutcome::AlreadyExisted;
            }
            tracing::warn!(kind = %kind, name = %name, error = %e, "create failed");
            EnsureOutcome::Failed {
                cause: e.to_string(),
            }
        }
    }
}
