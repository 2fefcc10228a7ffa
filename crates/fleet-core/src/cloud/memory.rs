//! In-memory [`CloudApi`] with scripted failures, for tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{CloudApi, CloudResult, FirewallRule, InstanceSpec};
use crate::error::CloudError;
use crate::types::{CloudResource, ResourceKind};

#[derive(Default)]
pub struct InMemoryCloud {
    instances: RefCell<BTreeMap<String, CloudResource>>,
    rules: RefCell<BTreeMap<String, CloudResource>>,
    calls: RefCell<Vec<String>>,
    create_failures: RefCell<HashMap<String, String>>,
    describe_failures: RefCell<HashMap<String, String>>,
    delete_failures: RefCell<HashMap<String, String>>,
    races: RefCell<HashSet<String>>,
    preflight_failure: RefCell<Option<String>>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_instance(&self, name: &str, zone: &str, tags: &[&str]) {
        self.instances.borrow_mut().insert(
            name.to_string(),
            CloudResource::instance(name, zone, tags.iter().map(|t| t.to_string()).collect()),
        );
    }

    pub fn seed_rule(&self, name: &str, tags: &[&str]) {
        self.rules.borrow_mut().insert(
            name.to_string(),
            CloudResource::network_rule(name, tags.iter().map(|t| t.to_string()).collect()),
        );
    }

    /// Simulate another run creating `name` between our check and our create.
    pub fn race_on_create(&self, name: &str) {
        self.races.borrow_mut().insert(name.to_string());
    }

    pub fn fail_create(&self, name: &str, message: &str) {
        self.create_failures
            .borrow_mut()
            .insert(name.to_string(), message.to_string());
    }

    pub fn fail_describe(&self, name: &str, message: &str) {
        self.describe_failures
            .borrow_mut()
            .insert(name.to_string(), message.to_string());
    }

    pub fn fail_delete(&self, name: &str, message: &str) {
        self.delete_failures
            .borrow_mut()
            .insert(name.to_string(), message.to_string());
    }

    pub fn fail_preflight(&self, message: &str) {
        *self.preflight_failure.borrow_mut() = Some(message.to_string());
    }

    /// Every call made, as `op:name`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn create_calls(&self, name: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("create_") && c.ends_with(&format!(":{name}")))
            .count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("create_") || c.starts_with("delete_"))
            .count()
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.instances.borrow().keys().cloned().collect()
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.borrow().keys().cloned().collect()
    }

    fn record(&self, op: &str, name: &str) {
        self.calls.borrow_mut().push(format!("{op}:{name}"));
    }

    fn scripted(map: &RefCell<HashMap<String, String>>, op: &str, name: &str) -> CloudResult<()> {
        match map.borrow().get(name) {
            Some(msg) => Err(CloudError::CommandFailed {
                command: op.to_string(),
                stderr: msg.clone(),
            }),
            None => Ok(()),
        }
    }

    fn create_in(
        &self,
        store: &RefCell<BTreeMap<String, CloudResource>>,
        kind: ResourceKind,
        resource: CloudResource,
        op: &str,
    ) -> CloudResult<()> {
        let name = resource.name.clone();
        self.record(op, &name);
        if self.races.borrow_mut().remove(&name) {
            store.borrow_mut().insert(name.clone(), resource);
            return Err(CloudError::AlreadyExists { kind, name });
        }
        Self::scripted(&self.create_failures, op, &name)?;
        if store.borrow().contains_key(&name) {
            return Err(CloudError::AlreadyExists { kind, name });
        }
        store.borrow_mut().insert(name, resource);
        Ok(())
    }

    fn delete_in(
        &self,
        store: &RefCell<BTreeMap<String, CloudResource>>,
        kind: ResourceKind,
        name: &str,
        op: &str,
    ) -> CloudResult<()> {
        self.record(op, name);
        Self::scripted(&self.delete_failures, op, name)?;
        match store.borrow_mut().remove(name) {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }
}

impl CloudApi for InMemoryCloud {
    fn preflight(&self) -> CloudResult<()> {
        self.record("preflight", "-");
        match self.preflight_failure.borrow().as_ref() {
            Some(msg) => Err(CloudError::CommandFailed {
                command: "compute zones describe".into(),
                stderr: msg.clone(),
            }),
            None => Ok(()),
        }
    }

    fn instance_exists(&self, name: &str) -> CloudResult<bool> {
        self.record("describe_instance", name);
        Self::scripted(&self.describe_failures, "describe_instance", name)?;
        Ok(self.instances.borrow().contains_key(name))
    }

    fn create_instance(&self, spec: &InstanceSpec) -> CloudResult<()> {
        let resource = CloudResource::instance(&spec.name, &spec.zone, spec.tags.clone());
        self.create_in(
            &self.instances,
            ResourceKind::ComputeInstance,
            resource,
            "create_instance",
        )
    }

    fn delete_instance(&self, name: &str, _zone: &str) -> CloudResult<()> {
        self.delete_in(
            &self.instances,
            ResourceKind::ComputeInstance,
            name,
            "delete_instance",
        )
    }

    fn firewall_rule_exists(&self, name: &str) -> CloudResult<bool> {
        self.record("describe_rule", name);
        Self::scripted(&self.describe_failures, "describe_rule", name)?;
        Ok(self.rules.borrow().contains_key(name))
    }

    fn create_firewall_rule(&self, rule: &FirewallRule) -> CloudResult<()> {
        let resource = CloudResource::network_rule(&rule.name, rule.target_tags.clone());
        self.create_in(&self.rules, ResourceKind::NetworkRule, resource, "create_rule")
    }

    fn delete_firewall_rule(&self, name: &str) -> CloudResult<()> {
        self.delete_in(&self.rules, ResourceKind::NetworkRule, name, "delete_rule")
    }

    fn list_instances(&self) -> CloudResult<Vec<CloudResource>> {
        self.record("list_instances", "-");
        Ok(self.instances.borrow().values().cloned().collect())
    }

    fn list_firewall_rules(&self) -> CloudResult<Vec<CloudResource>> {
        self.record("list_rules", "-");
        Ok(self.rules.borrow().values().cloned().collect())
    }
}
