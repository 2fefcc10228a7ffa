//! One provisioning run, end to end.
//!
//! Validate, confirm, preflight, ensure the shared network rules, then drive
//! each machine to a terminal state in ascending index order. Machines are
//! handled strictly one at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cloud::CloudApi;
use crate::confirm::Confirmer;
use crate::ensure::{self, EnsureOutcome};
use crate::error::{FleetError, Result};
use crate::provision::{MachineRecord, MachineState, SharedPayload, VmProvisioner};
use crate::readiness::{Probe, Sleeper};
use crate::remote::RemoteExecutor;
use crate::request::ProvisionRequest;
use crate::types::{FailurePolicy, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Overall {
    Success,
    Partial,
    Failed,
    /// The operator said no; nothing was touched.
    Declined,
}

impl Overall {
    pub fn as_str(self) -> &'static str {
        match self {
            Overall::Success => "success",
            Overall::Partial => "partial",
            Overall::Failed => "failed",
            Overall::Declined => "declined",
        }
    }
}

impl std::fmt::Display for Overall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SharedResourceResult {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: EnsureOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub policy: FailurePolicy,
    pub shared: Vec<SharedResourceResult>,
    pub per_machine: Vec<MachineRecord>,
    pub overall: Overall,
}

impl RunReport {
    /// Process exit code: 0 for success or a decline, otherwise the code of
    /// the first failed machine.
    pub fn exit_code(&self) -> i32 {
        match self.overall {
            Overall::Success | Overall::Declined => 0,
            Overall::Partial | Overall::Failed => self
                .per_machine
                .iter()
                .find_map(|m| m.failure().map(|f| f.exit_code))
                .unwrap_or(1),
        }
    }

    pub fn count_in(&self, state: MachineState) -> usize {
        self.per_machine.iter().filter(|m| m.state() == state).count()
    }
}

fn aggregate(policy: FailurePolicy, records: &[MachineRecord]) -> Overall {
    let provisioned = records
        .iter()
        .filter(|m| m.state() == MachineState::Provisioned)
        .count();
    let failed = records
        .iter()
        .filter(|m| m.state() == MachineState::Failed)
        .count();

    match (policy, provisioned, failed) {
        (_, _, 0) if provisioned == records.len() => Overall::Success,
        (_, _, 0) => Overall::Failed,
        (FailurePolicy::FailFast, _, _) => Overall::Failed,
        (FailurePolicy::Continue, 0, _) => Overall::Failed,
        (FailurePolicy::Continue, _, _) => Overall::Partial,
    }
}

pub struct Orchestrator<'a> {
    cloud: &'a dyn CloudApi,
    probe: &'a dyn Probe,
    sleeper: &'a dyn Sleeper,
    remote: &'a dyn RemoteExecutor,
    confirmer: &'a dyn Confirmer,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        cloud: &'a dyn CloudApi,
        probe: &'a dyn Probe,
        sleeper: &'a dyn Sleeper,
        remote: &'a dyn RemoteExecutor,
        confirmer: &'a dyn Confirmer,
    ) -> Self {
        Self {
            cloud,
            probe,
            sleeper,
            remote,
            confirmer,
        }
    }

    /// Run the whole sequence. Errors are reserved for failures that happen
    /// before any machine is touched; machine failures land in the report.
    pub fn run(&self, request: &ProvisionRequest) -> Result<RunReport> {
        request.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = tracing::info_span!("run", run_id = %run_id, count = request.count);
        let _guard = span.enter();

        let mut records: Vec<MachineRecord> = request
            .machine_names()
            .into_iter()
            .zip(1..)
            .map(|(name, index)| MachineRecord::new(index, name))
            .collect();

        if !self.confirmer.confirm(&request.summary()) {
            tracing::info!("run declined, nothing created");
            return Ok(RunReport {
                run_id,
                started_at,
                finished_at: Utc::now(),
                policy: request.failure_policy,
                shared: Vec::new(),
                per_machine: records,
                overall: Overall::Declined,
            });
        }

        self.cloud
            .preflight()
            .map_err(|e| FleetError::Precondition(e.to_string()))?;

        let shared = self.ensure_shared(request)?;

        let provisioner = VmProvisioner::new(self.cloud, self.probe, self.sleeper, self.remote);
        let mut payload = SharedPayload::new();
        for record in records.iter_mut() {
            if let Err(err) = provisioner.provision(request, record, &mut payload) {
                tracing::error!(machine = %record.name, error = %err, "machine failed");
                if request.failure_policy == FailurePolicy::FailFast {
                    tracing::warn!("fail-fast: remaining machines left pending");
                    break;
                }
            }
        }

        let overall = aggregate(request.failure_policy, &records);
        tracing::info!(
            overall = %overall,
            provisioned = records.iter().filter(|m| m.state() == MachineState::Provisioned).count(),
            total = records.len(),
            "run finished"
        );
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            policy: request.failure_policy,
            shared,
            per_machine: records,
            overall,
        })
    }

    fn ensure_shared(&self, request: &ProvisionRequest) -> Result<Vec<SharedResourceResult>> {
        let mut results = Vec::new();
        for rule in request.shared_rules() {
            let outcome = ensure::ensure(self.cloud, &rule);
            if let EnsureOutcome::Failed { cause } = outcome {
                return Err(FleetError::SharedResource {
                    kind: ResourceKind::NetworkRule,
                    name: rule.name,
                    cause,
                });
            }
            results.push(SharedResourceResult {
                kind: ResourceKind::NetworkRule,
                name: rule.name,
                outcome,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::InMemoryCloud;
    use crate::config::FleetConfig;
    use crate::confirm::fake::FixedAnswer;
    use crate::readiness::tests_support::{NoSleep, ReadyAfter, UnreachableFor};
    use crate::remote::fake::FakeRemote;

    fn request(count: u32, policy: FailurePolicy) -> ProvisionRequest {
        let mut cfg = FleetConfig::default();
        cfg.readiness.max_attempts = 3;
        cfg.failure_policy = policy;
        ProvisionRequest::new(count, "demo", &cfg).unwrap()
    }

    const FULL: [MachineState; 4] = [
        MachineState::Pending,
        MachineState::Created,
        MachineState::Ready,
        MachineState::Provisioned,
    ];

    #[test]
    fn three_machines_all_provisioned() {
        let cloud = InMemoryCloud::new();
        let probe = ReadyAfter::new(2);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let report = orch.run(&request(3, FailurePolicy::FailFast)).unwrap();
        assert_eq!(report.overall, Overall::Success);
        assert_eq!(report.exit_code(), 0);

        let names: Vec<&str> = report.per_machine.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["k8s-node-1", "k8s-node-2", "k8s-node-3"]);
        assert!(report.per_machine.iter().all(|m| m.history() == FULL));

        assert_eq!(cloud.create_calls("k8s-node-allow-ssh"), 1);
        assert_eq!(cloud.create_calls("k8s-node-allow-services"), 1);
        assert_eq!(
            cloud.instance_names(),
            vec!["k8s-node-1", "k8s-node-2", "k8s-node-3"]
        );
        assert_eq!(report.shared.len(), 2);
        assert!(report.shared.iter().all(|s| s.outcome == EnsureOutcome::Created));

        // One payload, delivered byte-identical to every machine.
        let delivered = remote.delivered.borrow();
        assert_eq!(delivered.len(), 3);
        assert!(delivered.iter().all(|d| *d == delivered[0]));
    }

    #[test]
    fn fail_fast_stops_after_unreachable_machine() {
        let cloud = InMemoryCloud::new();
        let probe = UnreachableFor(vec!["k8s-node-2"]);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let report = orch.run(&request(2, FailurePolicy::FailFast)).unwrap();
        assert_eq!(report.overall, Overall::Failed);
        assert_eq!(report.per_machine[0].state(), MachineState::Provisioned);
        assert_eq!(report.per_machine[1].state(), MachineState::Failed);
        assert_eq!(report.exit_code(), 6);
        assert!(!cloud.calls().iter().any(|c| c.ends_with("k8s-node-3")));
        assert!(!remote.calls().iter().any(|c| c.ends_with("k8s-node-2")));
    }

    #[test]
    fn fail_fast_leaves_later_machines_pending() {
        let cloud = InMemoryCloud::new();
        let probe = UnreachableFor(vec!["k8s-node-2"]);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let report = orch.run(&request(3, FailurePolicy::FailFast)).unwrap();
        assert_eq!(report.per_machine[2].state(), MachineState::Pending);
        assert_eq!(report.per_machine[2].history(), [MachineState::Pending]);
        assert_eq!(cloud.create_calls("k8s-node-3"), 0);
    }

    #[test]
    fn continue_policy_reports_partial() {
        let cloud = InMemoryCloud::new();
        let probe = UnreachableFor(vec!["k8s-node-2"]);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let report = orch.run(&request(3, FailurePolicy::Continue)).unwrap();
        assert_eq!(report.overall, Overall::Partial);
        assert_eq!(report.per_machine[2].state(), MachineState::Provisioned);
        assert_eq!(report.count_in(MachineState::Failed), 1);
        assert_eq!(report.exit_code(), 6);
    }

    #[test]
    fn continue_policy_with_no_survivors_is_failed() {
        let cloud = InMemoryCloud::new();
        cloud.fail_create("k8s-node-1", "quota exceeded");
        cloud.fail_create("k8s-node-2", "quota exceeded");
        let probe = ReadyAfter::new(1);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let report = orch.run(&request(2, FailurePolicy::Continue)).unwrap();
        assert_eq!(report.overall, Overall::Failed);
        assert_eq!(report.exit_code(), 5);
    }

    #[test]
    fn declined_run_makes_no_cloud_calls() {
        let cloud = InMemoryCloud::new();
        let probe = ReadyAfter::new(1);
        let remote = FakeRemote::default();
        let no = FixedAnswer::no();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &no);

        let report = orch.run(&request(2, FailurePolicy::FailFast)).unwrap();
        assert_eq!(report.overall, Overall::Declined);
        assert_eq!(report.exit_code(), 0);
        assert!(cloud.calls().is_empty());
        assert!(remote.calls().is_empty());
        assert_eq!(probe.calls(), 0);
        assert!(no.shown.borrow()[0].contains("k8s-node-1, k8s-node-2"));
    }

    #[test]
    fn preflight_failure_is_a_precondition_error() {
        let cloud = InMemoryCloud::new();
        cloud.fail_preflight("Compute Engine API has not been used in project demo");
        let probe = ReadyAfter::new(1);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let err = orch.run(&request(1, FailurePolicy::FailFast)).unwrap_err();
        assert!(matches!(err, FleetError::Precondition(_)));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(cloud.mutating_calls(), 0);
    }

    #[test]
    fn shared_rule_failure_touches_no_machine() {
        let cloud = InMemoryCloud::new();
        cloud.fail_create("k8s-node-allow-services", "permission denied");
        let probe = ReadyAfter::new(1);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let err = orch.run(&request(2, FailurePolicy::Continue)).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(!cloud.calls().iter().any(|c| c.contains("instance")));
        assert!(remote.calls().is_empty());
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn existing_shared_rules_are_reused() {
        let cloud = InMemoryCloud::new();
        cloud.seed_rule("k8s-node-allow-ssh", &["fleet-k8s"]);
        cloud.race_on_create("k8s-node-allow-services");
        let probe = ReadyAfter::new(1);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let report = orch.run(&request(1, FailurePolicy::FailFast)).unwrap();
        assert_eq!(report.overall, Overall::Success);
        assert!(report
            .shared
            .iter()
            .all(|s| s.outcome == EnsureOutcome::AlreadyExisted));
    }

    #[test]
    fn invalid_request_rejected_before_confirmation() {
        let cloud = InMemoryCloud::new();
        let probe = ReadyAfter::new(1);
        let remote = FakeRemote::default();
        let yes = FixedAnswer::yes();
        let orch = Orchestrator::new(&cloud, &probe, &NoSleep, &remote, &yes);

        let mut req = request(1, FailurePolicy::FailFast);
        req.count = 11;
        let err = orch.run(&req).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(yes.shown.borrow().is_empty());
        assert!(cloud.calls().is_empty());
    }
}
