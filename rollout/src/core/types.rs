//! Shared deterministic types for the rollout core.
//!
//! These types define stable contracts between the phase executor, the group
//! orchestrator, and the runner. They carry no I/O and serialize to a stable
//! JSON shape for run reports.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identity of one managed node, as reported by a collaborator.
///
/// Ordering is lexicographic and defines the scan order used when reducing
/// per-node replies to a phase outcome.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One node's answer inside a batched collaborator reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReply<T> {
    pub node: NodeIdentity,
    pub value: T,
}

impl<T> NodeReply<T> {
    pub fn new(node: impl Into<NodeIdentity>, value: T) -> Self {
        Self {
            node: node.into(),
            value,
        }
    }
}

/// Which application change the deploy phase applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentAction {
    #[default]
    Upgrade,
    Downgrade,
}

impl DeploymentAction {
    /// Parse an action token. Only the exact lowercase words are recognized.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "upgrade" => Some(Self::Upgrade),
            "downgrade" => Some(Self::Downgrade),
            _ => None,
        }
    }
}

impl fmt::Display for DeploymentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgrade => f.write_str("upgrade"),
            Self::Downgrade => f.write_str("downgrade"),
        }
    }
}

/// The four ordered phases applied to every group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Draining,
    Verifying,
    Deploying,
    Restoring,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draining => f.write_str("draining"),
            Self::Verifying => f.write_str("verifying"),
            Self::Deploying => f.write_str("deploying"),
            Self::Restoring => f.write_str("restoring"),
        }
    }
}

/// Classification of a phase failure, recorded in [`GroupResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AgentEnabled,
    LoadBalancerRemoveFailed,
    UpgradeFailed,
    DowngradeFailed,
    LoadBalancerAddFailed,
    CollaboratorFailed,
}

/// Why a phase stopped. Every variant except `CollaboratorFailed` names the
/// first offending node in scan order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    #[error("configuration management is still active on {node} (status: {status})")]
    AgentEnabled { node: NodeIdentity, status: String },
    #[error("{node} could not be removed from the load balancer: {detail}")]
    LoadBalancerRemoveFailed { node: NodeIdentity, detail: String },
    #[error("application upgrade failed on {node}: {detail}")]
    UpgradeFailed { node: NodeIdentity, detail: String },
    #[error("application downgrade failed on {node}: {detail}")]
    DowngradeFailed { node: NodeIdentity, detail: String },
    #[error("{node} could not be enabled on the load balancer: {detail}")]
    LoadBalancerAddFailed { node: NodeIdentity, detail: String },
    #[error("{collaborator} call failed: {detail}")]
    CollaboratorFailed {
        collaborator: &'static str,
        detail: String,
    },
}

impl PhaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AgentEnabled { .. } => ErrorKind::AgentEnabled,
            Self::LoadBalancerRemoveFailed { .. } => ErrorKind::LoadBalancerRemoveFailed,
            Self::UpgradeFailed { .. } => ErrorKind::UpgradeFailed,
            Self::DowngradeFailed { .. } => ErrorKind::DowngradeFailed,
            Self::LoadBalancerAddFailed { .. } => ErrorKind::LoadBalancerAddFailed,
            Self::CollaboratorFailed { .. } => ErrorKind::CollaboratorFailed,
        }
    }

    pub fn node(&self) -> Option<&NodeIdentity> {
        match self {
            Self::AgentEnabled { node, .. }
            | Self::LoadBalancerRemoveFailed { node, .. }
            | Self::UpgradeFailed { node, .. }
            | Self::DowngradeFailed { node, .. }
            | Self::LoadBalancerAddFailed { node, .. } => Some(node),
            Self::CollaboratorFailed { .. } => None,
        }
    }
}

/// Result of running one phase against one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Success,
    Failed(PhaseError),
}

impl PhaseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Outcome of one group's pass through the phase machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResult {
    pub group: String,
    pub succeeded: bool,
    pub failed_phase: Option<PhaseKind>,
    pub failed_node: Option<NodeIdentity>,
    pub error_kind: Option<ErrorKind>,
    /// Human-readable cause, present when the group failed.
    pub reason: Option<String>,
}

impl GroupResult {
    pub fn succeeded(group: &str) -> Self {
        Self {
            group: group.to_string(),
            succeeded: true,
            failed_phase: None,
            failed_node: None,
            error_kind: None,
            reason: None,
        }
    }

    pub fn failed(group: &str, phase: PhaseKind, error: &PhaseError) -> Self {
        Self {
            group: group.to_string(),
            succeeded: false,
            failed_phase: Some(phase),
            failed_node: error.node().cloned(),
            error_kind: Some(error.kind()),
            reason: Some(error.to_string()),
        }
    }
}

/// Ordered record of every group processed by one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub action: DeploymentAction,
    /// One entry per processed group, in input order.
    pub results: Vec<GroupResult>,
    /// True when the operator cancelled at a confirmation gate.
    pub interrupted: bool,
}

impl RunReport {
    pub fn new(action: DeploymentAction) -> Self {
        Self {
            action,
            results: Vec::new(),
            interrupted: false,
        }
    }

    pub fn failed_groups(&self) -> impl Iterator<Item = &GroupResult> {
        self.results.iter().filter(|result| !result.succeeded)
    }
}

/// Load-balancer backend membership, partitioned by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub enabled: BTreeSet<NodeIdentity>,
    pub disabled: BTreeSet<NodeIdentity>,
}

impl BackendStatus {
    /// Union another responder's view into this one.
    pub fn merge(&mut self, other: BackendStatus) {
        self.enabled.extend(other.enabled);
        self.disabled.extend(other.disabled);
    }
}
