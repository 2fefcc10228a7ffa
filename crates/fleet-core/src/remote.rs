//! Delivering the payload to a machine and running it there.

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::payload::PayloadArtifact;

/// Exit status of the remote payload process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOutcome {
    pub exit_code: i32,
    pub status: String,
}

impl RemoteOutcome {
    pub fn from_exit_code(exit_code: i32) -> Self {
        let status = match exit_code {
            0 => "succeeded".to_string(),
            -1 => "terminated by signal".to_string(),
            n => format!("exited with status {n}"),
        };
        Self { exit_code, status }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A channel that can place a file on a machine and execute it.
///
/// Implementors provide the two steps; callers go through
/// [`RemoteExecutor::deliver_and_run`], which enforces their order.
pub trait RemoteExecutor {
    /// Copy the artifact onto the machine.
    fn transfer(&self, machine: &str, artifact: &PayloadArtifact) -> std::result::Result<(), String>;

    /// Run the previously transferred artifact and wait for it to exit.
    fn invoke(&self, machine: &str) -> std::result::Result<RemoteOutcome, String>;

    /// Transfer, then invoke. Invoke is never attempted if transfer fails.
    /// A non-zero remote exit is returned as an `Ok` outcome for the caller
    /// to judge; only channel failures are errors, and they name the step
    /// that broke.
    fn deliver_and_run(&self, machine: &str, artifact: &PayloadArtifact) -> Result<RemoteOutcome> {
        self.transfer(machine, artifact)
            .map_err(|cause| FleetError::RemoteTransfer {
                name: machine.to_string(),
                cause,
            })?;
        tracing::info!(machine = %machine, bytes = artifact.body().len(), "payload copied, running");
        self.invoke(machine).map_err(|cause| FleetError::RemoteInvoke {
            name: machine.to_string(),
            cause,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeRemote;
    use super::*;

    fn artifact() -> PayloadArtifact {
        PayloadArtifact::new("#!/bin/sh\necho hi\n".to_string())
    }

    #[test]
    fn transfer_then_invoke() {
        let remote = FakeRemote::default();
        let out = remote.deliver_and_run("node-1", &artifact()).unwrap();
        assert!(out.success());
        assert_eq!(remote.calls(), vec!["transfer:node-1", "invoke:node-1"]);
    }

    #[test]
    fn failed_transfer_never_invokes() {
        let remote = FakeRemote::default();
        remote.fail_transfer("node-1", 1);
        let err = remote.deliver_and_run("node-1", &artifact()).unwrap_err();
        assert!(matches!(err, FleetError::RemoteTransfer { .. }));
        assert_eq!(remote.calls(), vec!["transfer:node-1"]);
    }

    #[test]
    fn nonzero_exit_is_surfaced_not_an_error() {
        let remote = FakeRemote::default();
        remote.exit_with("node-1", vec![42]);
        let out = remote.deliver_and_run("node-1", &artifact()).unwrap();
        assert_eq!(out.exit_code, 42);
        assert!(!out.success());
        assert_eq!(out.status, "exited with status 42");
    }

    #[test]
    fn invoke_channel_failure_is_not_a_copy_failure() {
        let remote = FakeRemote::default();
        remote.fail_invoke("node-1", "ssh: connect to host timed out");
        let err = remote.deliver_and_run("node-1", &artifact()).unwrap_err();
        assert!(matches!(err, FleetError::RemoteInvoke { .. }));
        assert!(err.to_string().starts_with("failed to run payload on 'node-1'"));
        assert_eq!(err.exit_code(), 7);
        assert_eq!(remote.calls(), vec!["transfer:node-1", "invoke:node-1"]);
    }
}
