use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ResourceKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    NetworkRule,
    ComputeInstance,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::NetworkRule => "network-rule",
            ResourceKind::ComputeInstance => "compute-instance",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CloudResource
// ---------------------------------------------------------------------------

/// A resource as seen in a project listing. Used only by teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudResource {
    pub kind: ResourceKind,
    pub name: String,
    /// Network tags for instances, target tags for firewall rules.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Zone for instances; `None` for global resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

impl CloudResource {
    pub fn instance(name: impl Into<String>, zone: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            kind: ResourceKind::ComputeInstance,
            name: name.into(),
            tags,
            zone: Some(zone.into()),
        }
    }

    pub fn network_rule(name: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            kind: ResourceKind::NetworkRule,
            name: name.into(),
            tags,
            zone: None,
        }
    }
}

// ---------------------------------------------------------------------------
// FailurePolicy
// ---------------------------------------------------------------------------

/// What the orchestrator does after a machine ends in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failed machine; later machines stay `pending`.
    #[default]
    FailFast,
    /// Attempt every machine and report `partial` on mixed results.
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail_fast"),
            FailurePolicy::Continue => write!(f, "continue"),
        }
    }
}
