//! Per-machine lifecycle: `pending → created → ready → provisioned`.
//!
//! `failed` is absorbing and reachable from any non-terminal state. A record
//! only ever moves forward; attempts to move it backwards are ignored and
//! logged.

use serde::{Deserialize, Serialize};

use crate::cloud::CloudApi;
use crate::ensure::{self, EnsureOutcome};
use crate::error::{FleetError, Result};
use crate::payload::{self, PayloadArtifact};
use crate::readiness::{PollOutcome, Probe, ReadinessPoller, Sleeper};
use crate::remote::RemoteExecutor;
use crate::request::ProvisionRequest;

// ---------------------------------------------------------------------------
// MachineState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Pending,
    Created,
    Ready,
    Provisioned,
    Failed,
}

impl MachineState {
    fn rank(self) -> u8 {
        match self {
            MachineState::Pending => 0,
            MachineState::Created => 1,
            MachineState::Ready => 2,
            MachineState::Provisioned => 3,
            MachineState::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MachineState::Provisioned | MachineState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MachineState::Pending => "pending",
            MachineState::Created => "created",
            MachineState::Ready => "ready",
            MachineState::Provisioned => "provisioned",
            MachineState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MachineRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Create,
    Readiness,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineFailure {
    pub stage: FailureStage,
    pub message: String,
    /// Process exit code for this failure class.
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub index: u32,
    pub name: String,
    state: MachineState,
    /// Every state visited, starting with `pending`.
    history: Vec<MachineState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<MachineFailure>,
}

impl MachineRecord {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            state: MachineState::Pending,
            history: vec![MachineState::Pending],
            failure: None,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn history(&self) -> &[MachineState] {
        &self.history
    }

    pub fn failure(&self) -> Option<&MachineFailure> {
        self.failure.as_ref()
    }

    pub(crate) fn advance(&mut self, to: MachineState) {
        if self.state.is_terminal() || to.rank() <= self.state.rank() {
            tracing::error!(
                machine = %self.name,
                from = %self.state,
                to = %to,
                "ignored non-monotonic transition"
            );
            return;
        }
        tracing::info!(machine = %self.name, from = %self.state, to = %to, "transition");
        self.state = to;
        self.history.push(to);
    }

    pub(crate) fn fail(&mut self, stage: FailureStage, err: &FleetError) {
        if self.state.is_terminal() {
            return;
        }
        self.failure = Some(MachineFailure {
            stage,
            message: err.to_string(),
            exit_code: err.exit_code(),
        });
        self.advance(MachineState::Failed);
    }
}

// ---------------------------------------------------------------------------
// SharedPayload
// ---------------------------------------------------------------------------

/// The run's payload, rendered on first use and reused for every machine.
#[derive(Debug, Default)]
pub struct SharedPayload {
    artifact: Option<PayloadArtifact>,
    renders: u32,
}

impl SharedPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_render(&mut self, request: &ProvisionRequest) -> Result<&PayloadArtifact> {
        let artifact = match self.artifact.take() {
            Some(a) => a,
            None => {
                self.renders += 1;
                payload::render(request)?
            }
        };
        Ok(self.artifact.insert(artifact))
    }

    /// How many times the payload was actually rendered.
    pub fn renders(&self) -> u32 {
        self.renders
    }
}

// ---------------------------------------------------------------------------
// VmProvisioner
// ---------------------------------------------------------------------------

pub struct VmProvisioner<'a> {
    cloud: &'a dyn CloudApi,
    probe: &'a dyn Probe,
    sleeper: &'a dyn Sleeper,
    remote: &'a dyn RemoteExecutor,
}

impl<'a> VmProvisioner<'a> {
    pub fn new(
        cloud: &'a dyn CloudApi,
        probe: &'a dyn Probe,
        sleeper: &'a dyn Sleeper,
        remote: &'a dyn RemoteExecutor,
    ) -> Self {
        Self {
            cloud,
            probe,
            sleeper,
            remote,
        }
    }

    /// Drive one machine to a terminal state. On error the record is already
    /// `failed` with the cause attached.
    pub fn provision(
        &self,
        request: &ProvisionRequest,
        record: &mut MachineRecord,
        payload: &mut SharedPayload,
    ) -> Result<()> {
        let name = record.name.clone();

        // pending → created
        let spec = request.instance_spec(&name);
        if let EnsureOutcome::Failed { cause } = ensure::ensure(self.cloud, &spec) {
            let err = FleetError::InstanceCreate { name, cause };
            record.fail(FailureStage::Create, &err);
            return Err(err);
        }
        record.advance(MachineState::Created);

        // created → ready
        let poller = ReadinessPoller::new(self.probe, self.sleeper);
        if let PollOutcome::TimedOut { attempts } = poller.wait_ready(&name, &request.readiness) {
            let err = FleetError::ReadinessTimeout { name, attempts };
            record.fail(FailureStage::Readiness, &err);
            return Err(err);
        }
        record.advance(MachineState::Ready);

        // ready → provisioned
        let artifact = match payload.get_or_render(request) {
            Ok(a) => a,
            Err(err) => {
                record.fail(FailureStage::Remote, &err);
                return Err(err);
            }
        };
        let attempts = if request.retry_remote_once { 2 } else { 1 };
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.run_payload(&name, artifact) {
                Ok(()) => {
                    record.advance(MachineState::Provisioned);
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(machine = %name, attempt, error = %err, "payload delivery failed");
                    last_err = Some(err);
                }
            }
        }
        let err = last_err.unwrap_or_else(|| FleetError::RemoteExecution {
            name: name.clone(),
            exit_code: -1,
        });
        record.fail(FailureStage::Remote, &err);
        Err(err)
    }

    fn run_payload(&self, name: &str, artifact: &PayloadArtifact) -> Result<()> {
        let outcome = self.remote.deliver_and_run(name, artifact)?;
        if !outcome.success() {
            return Err(FleetError::RemoteExecution {
                name: name.to_string(),
                exit_code: outcome.exit_code,
            });
        }
        Ok(())
    }
}
