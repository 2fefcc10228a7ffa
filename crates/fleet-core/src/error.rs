use thiserror::Error;

use crate::types::ResourceKind;

/// Failures reported by a [`crate::cloud::CloudApi`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("gcloud {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to spawn gcloud: {0}")]
    Spawn(String),

    #[error("could not parse gcloud output: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid machine count '{0}': expected an integer between 1 and 10")]
    InvalidMachineCount(String),

    #[error("invalid resource name '{0}': must start with a lowercase letter, contain only lowercase letters, digits and hyphens, and be at most 63 characters")]
    InvalidName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "gcloud not found\n\n\
         fleet drives Google Compute Engine through the gcloud CLI.\n\
         Install it from https://cloud.google.com/sdk/docs/install and run:\n\
         \n\
           gcloud auth login\n\
           gcloud config set project <PROJECT_ID>"
    )]
    GcloudNotInstalled,

    #[error("no active project: pass --project, set FLEET_PROJECT, or run 'gcloud config set project <PROJECT_ID>'")]
    NoActiveProject,

    #[error("cloud API unreachable: {0}")]
    Precondition(String),

    #[error("failed to ensure shared {kind} '{name}': {cause}")]
    SharedResource {
        kind: ResourceKind,
        name: String,
        cause: String,
    },

    #[error("failed to create instance '{name}': {cause}")]
    InstanceCreate { name: String, cause: String },

    #[error("instance '{name}' did not become reachable after {attempts} attempts")]
    ReadinessTimeout { name: String, attempts: u32 },

    #[error("failed to copy payload to '{name}': {cause}")]
    RemoteTransfer { name: String, cause: String },

    #[error("failed to run payload on '{name}': {cause}")]
    RemoteInvoke { name: String, cause: String },

    #[error("payload on '{name}' exited with status {exit_code}")]
    RemoteExecution { name: String, exit_code: i32 },

    #[error("teardown finished with {failed} failed deletion(s): {names}")]
    TeardownIncomplete { failed: usize, names: String },

    #[error("template variable '{0}' has no value")]
    MissingTemplateVar(String),

    #[error("template variable '{0}' is never used")]
    UnusedTemplateVar(String),

    #[error("unterminated placeholder in template at byte {0}")]
    UnterminatedPlaceholder(usize),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Process exit status for this error. Each fatal class gets its own code
    /// so wrapper scripts can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            FleetError::InvalidMachineCount(_)
            | FleetError::InvalidName(_)
            | FleetError::InvalidConfig(_) => 2,
            FleetError::GcloudNotInstalled
            | FleetError::NoActiveProject
            | FleetError::Precondition(_) => 3,
            FleetError::SharedResource { .. } => 4,
            FleetError::InstanceCreate { .. } => 5,
            FleetError::ReadinessTimeout { .. } => 6,
            FleetError::RemoteTransfer { .. }
            | FleetError::RemoteInvoke { .. }
            | FleetError::RemoteExecution { .. } => 7,
            FleetError::TeardownIncomplete { .. } => 8,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let codes = [
            FleetError::InvalidMachineCount("0".into()).exit_code(),
            FleetError::NoActiveProject.exit_code(),
            FleetError::SharedResource {
                kind: ResourceKind::NetworkRule,
                name: "r".into(),
                cause: "x".into(),
            }
            .exit_code(),
            FleetError::InstanceCreate {
                name: "n".into(),
                cause: "x".into(),
            }
            .exit_code(),
            FleetError::ReadinessTimeout {
                name: "n".into(),
                attempts: 3,
            }
            .exit_code(),
            FleetError::RemoteExecution {
                name: "n".into(),
                exit_code: 1,
            }
            .exit_code(),
            FleetError::TeardownIncomplete {
                failed: 1,
                names: "n".into(),
            }
            .exit_code(),
        ];
        let mut sorted = codes.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }

    #[test]
    fn io_errors_use_generic_code() {
        let err = FleetError::from(std::io::Error::other("disk"));
        assert_eq!(err.exit_code(), 1);
    }
}
