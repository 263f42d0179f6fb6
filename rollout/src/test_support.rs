//! Test-only collaborators: an in-memory fleet and a scripted operator gate.
//!
//! The fleet models one load balancer in front of named groups of nodes. Every
//! collaborator call and filter change is recorded so tests can assert on call
//! order and on filter hygiene.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};

use crate::core::types::{BackendStatus, DeploymentAction, NodeIdentity, NodeReply};
use crate::io::control_plane::{
    AgentStatusProbe, ApplicationDeployer, ControlPlane, DeployTarget, LoadBalancerController,
    NodeLiveness, Scoped, TargetFilter,
};
use crate::io::gate::{Confirmation, ConfirmationGate};

/// One recorded interaction with the fake fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetCall {
    SetFilter(&'static str, TargetFilter),
    ResetFilter(&'static str),
    Ping(Option<String>),
    Disable(String),
    Enable(String),
    BackendStatus,
    Status(Option<String>),
    Upgrade(Option<String>),
    Downgrade(Option<String>),
}

#[derive(Debug, Default)]
struct FleetState {
    load_balancer: String,
    /// Group name to members, in the order replies are produced.
    groups: BTreeMap<String, Vec<String>>,
    disabled: BTreeSet<String>,
    agent_status: BTreeMap<String, String>,
    disable_codes: BTreeMap<String, i32>,
    enable_codes: BTreeMap<String, i32>,
    deploy_codes: BTreeMap<String, i32>,
    deployed: BTreeMap<String, DeploymentAction>,
    unreachable: BTreeSet<&'static str>,
    filters: BTreeMap<&'static str, TargetFilter>,
    calls: Vec<FleetCall>,
}

impl FleetState {
    fn all_nodes(&self) -> Vec<String> {
        let nodes: BTreeSet<&String> = self.groups.values().flatten().collect();
        nodes.into_iter().cloned().collect()
    }

    /// Nodes addressed by the collaborator's current filter. No filter means
    /// the whole fleet, which is exactly what a leaked reset would cause.
    fn scope(&self, collaborator: &'static str) -> Vec<String> {
        match self.filters.get(collaborator) {
            None => self.all_nodes(),
            Some(TargetFilter::Group(group)) => self.groups.get(group).cloned().unwrap_or_default(),
            Some(TargetFilter::Identity(id)) => self
                .all_nodes()
                .into_iter()
                .filter(|node| node == id)
                .collect(),
        }
    }

    fn scoped_group(&self, collaborator: &'static str) -> Option<String> {
        match self.filters.get(collaborator) {
            Some(TargetFilter::Group(group)) => Some(group.clone()),
            _ => None,
        }
    }

    fn ensure_reachable(&self, collaborator: &'static str) -> Result<()> {
        if self.unreachable.contains(collaborator) {
            bail!("{collaborator} unreachable");
        }
        Ok(())
    }

    fn ensure_balancer_addressed(&self) -> Result<()> {
        match self.filters.get(LOAD_BALANCER) {
            Some(TargetFilter::Identity(id)) if *id == self.load_balancer => Ok(()),
            Some(filter) => Err(anyhow!("no load balancer matched filter {filter}")),
            None => Err(anyhow!("no load balancer matched an unfiltered call")),
        }
    }

    fn backend_status(&self) -> BackendStatus {
        let mut status = BackendStatus::default();
        for node in self.all_nodes() {
            if self.disabled.contains(&node) {
                status.disabled.insert(NodeIdentity::from(node));
            } else {
                status.enabled.insert(NodeIdentity::from(node));
            }
        }
        status
    }
}

const LOAD_BALANCER: &str = "load balancer";
const AGENT_STATUS: &str = "agent status";
const DEPLOYER: &str = "deployer";
const LIVENESS: &str = "liveness";

/// In-memory fleet. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeFleet {
    state: Arc<Mutex<FleetState>>,
}

impl FakeFleet {
    /// A fleet whose load balancer answers to `load_balancer`. Every node
    /// starts enabled with configuration management stopped.
    pub fn new(load_balancer: &str) -> Self {
        let state = FleetState {
            load_balancer: load_balancer.to_string(),
            ..FleetState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().expect("fleet state lock")
    }

    pub fn with_group(self, group: &str, nodes: &[&str]) -> Self {
        self.lock().groups.insert(
            group.to_string(),
            nodes.iter().map(|node| node.to_string()).collect(),
        );
        self
    }

    pub fn with_agent_status(self, node: &str, status: &str) -> Self {
        self.lock()
            .agent_status
            .insert(node.to_string(), status.to_string());
        self
    }

    pub fn with_disable_code(self, node: &str, code: i32) -> Self {
        self.lock().disable_codes.insert(node.to_string(), code);
        self
    }

    pub fn with_enable_code(self, node: &str, code: i32) -> Self {
        self.lock().enable_codes.insert(node.to_string(), code);
        self
    }

    /// Status code `node` reports for both upgrade and downgrade.
    pub fn with_deploy_code(self, node: &str, code: i32) -> Self {
        self.lock().deploy_codes.insert(node.to_string(), code);
        self
    }

    /// Make every call on `collaborator` (its `Scoped::label`) fail.
    pub fn with_unreachable(self, collaborator: &'static str) -> Self {
        self.lock().unreachable.insert(collaborator);
        self
    }

    pub fn target(&self) -> DeployTarget {
        DeployTarget {
            load_balancer: self.lock().load_balancer.clone(),
            backend: "app".to_string(),
            service: "puppet".to_string(),
        }
    }

    pub fn control_plane(
        &self,
    ) -> ControlPlane<FakeLoadBalancer, FakeAgentStatus, FakeDeployer, FakeLiveness> {
        ControlPlane {
            load_balancer: FakeLoadBalancer(self.clone()),
            agent_status: FakeAgentStatus(self.clone()),
            deployer: FakeDeployer(self.clone()),
            liveness: FakeLiveness(self.clone()),
        }
    }

    pub fn calls(&self) -> Vec<FleetCall> {
        self.lock().calls.clone()
    }

    /// Only the enable/disable commands, in issue order.
    pub fn lb_commands(&self) -> Vec<FleetCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, FleetCall::Disable(_) | FleetCall::Enable(_)))
            .collect()
    }

    /// Filters still set on any collaborator.
    pub fn active_filters(&self) -> Vec<(&'static str, TargetFilter)> {
        self.lock()
            .filters
            .iter()
            .map(|(name, filter)| (*name, filter.clone()))
            .collect()
    }

    pub fn disabled_nodes(&self) -> Vec<String> {
        self.lock().disabled.iter().cloned().collect()
    }

    pub fn enabled_nodes(&self) -> Vec<String> {
        let state = self.lock();
        state
            .all_nodes()
            .into_iter()
            .filter(|node| !state.disabled.contains(node))
            .collect()
    }

    /// Last action successfully applied to `node`.
    pub fn deployed(&self, node: &str) -> Option<DeploymentAction> {
        self.lock().deployed.get(node).copied()
    }

    fn apply_filter(&self, collaborator: &'static str, filter: TargetFilter) {
        let mut state = self.lock();
        state
            .calls
            .push(FleetCall::SetFilter(collaborator, filter.clone()));
        state.filters.insert(collaborator, filter);
    }

    fn reset_filter(&self, collaborator: &'static str) {
        let mut state = self.lock();
        state.calls.push(FleetCall::ResetFilter(collaborator));
        state.filters.remove(collaborator);
    }

    fn set_membership(&self, node: &NodeIdentity, disable: bool) -> Result<i32> {
        let mut state = self.lock();
        let name = node.as_str().to_string();
        state.calls.push(if disable {
            FleetCall::Disable(name.clone())
        } else {
            FleetCall::Enable(name.clone())
        });
        state.ensure_reachable(LOAD_BALANCER)?;
        state.ensure_balancer_addressed()?;

        let codes = if disable {
            &state.disable_codes
        } else {
            &state.enable_codes
        };
        let code = codes.get(&name).copied().unwrap_or(0);
        if code == 0 {
            if disable {
                state.disabled.insert(name);
            } else {
                state.disabled.remove(&name);
            }
        }
        Ok(code)
    }

    fn deploy(&self, action: DeploymentAction) -> Result<Vec<NodeReply<i32>>> {
        let mut state = self.lock();
        let group = state.scoped_group(DEPLOYER);
        state.calls.push(match action {
            DeploymentAction::Upgrade => FleetCall::Upgrade(group),
            DeploymentAction::Downgrade => FleetCall::Downgrade(group),
        });
        state.ensure_reachable(DEPLOYER)?;

        let mut replies = Vec::new();
        for node in state.scope(DEPLOYER) {
            let code = state.deploy_codes.get(&node).copied().unwrap_or(0);
            if code == 0 {
                state.deployed.insert(node.clone(), action);
            }
            replies.push(NodeReply::new(node, code));
        }
        Ok(replies)
    }
}

pub struct FakeLoadBalancer(FakeFleet);
pub struct FakeAgentStatus(FakeFleet);
pub struct FakeDeployer(FakeFleet);
pub struct FakeLiveness(FakeFleet);

impl Scoped for FakeLoadBalancer {
    fn label(&self) -> &'static str {
        LOAD_BALANCER
    }

    fn apply_filter(&self, filter: TargetFilter) {
        self.0.apply_filter(LOAD_BALANCER, filter);
    }

    fn reset_filter(&self) {
        self.0.reset_filter(LOAD_BALANCER);
    }
}

impl LoadBalancerController for FakeLoadBalancer {
    fn disable(&self, _backend: &str, node: &NodeIdentity) -> Result<i32> {
        self.0.set_membership(node, true)
    }

    fn enable(&self, _backend: &str, node: &NodeIdentity) -> Result<i32> {
        self.0.set_membership(node, false)
    }

    fn backend_status(&self, _backend: &str) -> Result<BackendStatus> {
        let mut state = self.0.lock();
        state.calls.push(FleetCall::BackendStatus);
        state.ensure_reachable(LOAD_BALANCER)?;
        state.ensure_balancer_addressed()?;
        Ok(state.backend_status())
    }
}

impl Scoped for FakeAgentStatus {
    fn label(&self) -> &'static str {
        AGENT_STATUS
    }

    fn apply_filter(&self, filter: TargetFilter) {
        self.0.apply_filter(AGENT_STATUS, filter);
    }

    fn reset_filter(&self) {
        self.0.reset_filter(AGENT_STATUS);
    }
}

impl AgentStatusProbe for FakeAgentStatus {
    fn status(&self, _service: &str) -> Result<Vec<NodeReply<String>>> {
        let mut state = self.0.lock();
        let group = state.scoped_group(AGENT_STATUS);
        state.calls.push(FleetCall::Status(group));
        state.ensure_reachable(AGENT_STATUS)?;
        Ok(state
            .scope(AGENT_STATUS)
            .into_iter()
            .map(|node| {
                let status = state
                    .agent_status
                    .get(&node)
                    .cloned()
                    .unwrap_or_else(|| "stopped".to_string());
                NodeReply::new(node, status)
            })
            .collect())
    }
}

impl Scoped for FakeDeployer {
    fn label(&self) -> &'static str {
        DEPLOYER
    }

    fn apply_filter(&self, filter: TargetFilter) {
        self.0.apply_filter(DEPLOYER, filter);
    }

    fn reset_filter(&self) {
        self.0.reset_filter(DEPLOYER);
    }
}

impl ApplicationDeployer for FakeDeployer {
    fn upgrade(&self) -> Result<Vec<NodeReply<i32>>> {
        self.0.deploy(DeploymentAction::Upgrade)
    }

    fn downgrade(&self) -> Result<Vec<NodeReply<i32>>> {
        self.0.deploy(DeploymentAction::Downgrade)
    }
}

impl Scoped for FakeLiveness {
    fn label(&self) -> &'static str {
        LIVENESS
    }

    fn apply_filter(&self, filter: TargetFilter) {
        self.0.apply_filter(LIVENESS, filter);
    }

    fn reset_filter(&self) {
        self.0.reset_filter(LIVENESS);
    }
}

impl NodeLiveness for FakeLiveness {
    fn ping(&self) -> Result<Vec<NodeIdentity>> {
        let mut state = self.0.lock();
        let group = state.scoped_group(LIVENESS);
        state.calls.push(FleetCall::Ping(group));
        state.ensure_reachable(LIVENESS)?;
        Ok(state
            .scope(LIVENESS)
            .into_iter()
            .map(NodeIdentity::from)
            .collect())
    }
}

/// Gate that replays queued answers and records every prompt.
///
/// Once the queue is empty it keeps answering `Proceed`.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    answers: RefCell<VecDeque<Confirmation>>,
    asked: RefCell<Vec<String>>,
    broken: bool,
    interrupt_pending: bool,
}

impl ScriptedGate {
    pub fn new(answers: Vec<Confirmation>) -> Self {
        Self {
            answers: RefCell::new(answers.into()),
            ..Self::default()
        }
    }

    pub fn always_proceed() -> Self {
        Self::default()
    }

    /// A gate whose input is unreadable.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    /// An operator who pressed Ctrl+C while a group was running.
    pub fn with_pending_interrupt(self) -> Self {
        Self {
            interrupt_pending: true,
            ..self
        }
    }

    /// Groups the gate was asked about, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl ConfirmationGate for ScriptedGate {
    fn confirm(&self, next_group: &str) -> Result<Confirmation> {
        self.asked.borrow_mut().push(next_group.to_string());
        if self.broken {
            bail!("stdin closed");
        }
        Ok(self
            .answers
            .borrow_mut()
            .pop_front()
            .unwrap_or(Confirmation::Proceed))
    }

    fn interrupt_pending(&self) -> bool {
        self.interrupt_pending
    }
}

/// Write `contents` as `rollout.toml` inside a fresh temp dir.
pub fn temp_config(contents: &str) -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("rollout.toml");
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok((dir, path))
}
