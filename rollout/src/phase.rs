//! Phase execution: drain, verify, deploy, restore.
//!
//! Each phase scopes the collaborators it uses with a [`FilterScope`], asks
//! them for fresh per-node results, and reduces those results to a
//! [`PhaseOutcome`] in ascending node-identity order. Filters are released on
//! every return path because the scopes are dropped there.

use anyhow::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::reduce::{first_offender, ordered_nodes};
use crate::core::types::{DeploymentAction, NodeIdentity, PhaseError, PhaseKind, PhaseOutcome};
use crate::io::control_plane::{
    AgentStatusProbe, ApplicationDeployer, ControlPlane, DeployTarget, FilterScope,
    LoadBalancerController, NodeLiveness, Scoped, TargetFilter,
};

/// Service state that counts as quiesced.
pub const STOPPED: &str = "stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Disable,
    Enable,
}

impl Membership {
    fn error(self, node: NodeIdentity, detail: String) -> PhaseError {
        match self {
            Self::Disable => PhaseError::LoadBalancerRemoveFailed { node, detail },
            Self::Enable => PhaseError::LoadBalancerAddFailed { node, detail },
        }
    }
}

/// Run `phase` for `group` against the injected control plane.
pub fn run_phase<L, P, D, N>(
    plane: &ControlPlane<L, P, D, N>,
    target: &DeployTarget,
    group: &str,
    action: DeploymentAction,
    phase: PhaseKind,
) -> PhaseOutcome
where
    L: LoadBalancerController,
    P: AgentStatusProbe,
    D: ApplicationDeployer,
    N: NodeLiveness,
{
    match phase {
        PhaseKind::Draining => drain(&plane.load_balancer, &plane.liveness, target, group),
        PhaseKind::Verifying => verify(&plane.agent_status, target, group),
        PhaseKind::Deploying => apply_deployment(&plane.deployer, group, action),
        PhaseKind::Restoring => restore(&plane.load_balancer, &plane.liveness, target, group),
    }
}

/// Disable every live member of `group` in the load-balancer backend.
#[instrument(skip(lb, liveness, target), fields(backend = %target.backend))]
pub fn drain<L, N>(lb: &L, liveness: &N, target: &DeployTarget, group: &str) -> PhaseOutcome
where
    L: LoadBalancerController,
    N: NodeLiveness,
{
    update_membership(lb, liveness, target, group, Membership::Disable)
}

/// Enable every live member of `group` in the load-balancer backend.
#[instrument(skip(lb, liveness, target), fields(backend = %target.backend))]
pub fn restore<L, N>(lb: &L, liveness: &N, target: &DeployTarget, group: &str) -> PhaseOutcome
where
    L: LoadBalancerController,
    N: NodeLiveness,
{
    update_membership(lb, liveness, target, group, Membership::Enable)
}

fn update_membership<L, N>(
    lb: &L,
    liveness: &N,
    target: &DeployTarget,
    group: &str,
    membership: Membership,
) -> PhaseOutcome
where
    L: LoadBalancerController,
    N: NodeLiveness,
{
    let _lb_scope = FilterScope::acquire(lb, TargetFilter::Identity(target.load_balancer.clone()));
    let _group_scope = FilterScope::acquire(liveness, TargetFilter::Group(group.to_string()));

    let nodes = match liveness.ping() {
        Ok(nodes) => ordered_nodes(nodes),
        Err(err) => return collaborator_failed(liveness, err),
    };
    if nodes.is_empty() {
        warn!(group, "no live nodes matched group");
    }

    for node in nodes {
        let result = match membership {
            Membership::Disable => lb.disable(&target.backend, &node),
            Membership::Enable => lb.enable(&target.backend, &node),
        };
        let detail = match result {
            Ok(0) => {
                debug!(%node, ?membership, "backend updated");
                continue;
            }
            Ok(code) => format!("status code {code}"),
            Err(err) => format!("{err:#}"),
        };
        warn!(%node, ?membership, %detail, "load balancer rejected node");
        return PhaseOutcome::Failed(membership.error(node, detail));
    }

    info!(?membership, "backend membership updated");
    PhaseOutcome::Success
}

/// Check that configuration management is stopped on every node in `group`.
#[instrument(skip(probe, target), fields(service = %target.service))]
pub fn verify<P: AgentStatusProbe>(probe: &P, target: &DeployTarget, group: &str) -> PhaseOutcome {
    let _scope = FilterScope::acquire(probe, TargetFilter::Group(group.to_string()));

    let replies = match probe.status(&target.service) {
        Ok(replies) => replies,
        Err(err) => return collaborator_failed(probe, err),
    };
    if replies.is_empty() {
        warn!(group, "no nodes reported service status");
    }

    match first_offender(replies, |status| status.as_str() == STOPPED) {
        None => {
            info!("configuration management is stopped");
            PhaseOutcome::Success
        }
        Some(reply) => {
            warn!(node = %reply.node, status = %reply.value, "configuration management still active");
            PhaseOutcome::Failed(PhaseError::AgentEnabled {
                node: reply.node,
                status: reply.value,
            })
        }
    }
}

/// Upgrade or downgrade the application on every node in `group`.
#[instrument(skip(deployer))]
pub fn apply_deployment<D: ApplicationDeployer>(
    deployer: &D,
    group: &str,
    action: DeploymentAction,
) -> PhaseOutcome {
    let _scope = FilterScope::acquire(deployer, TargetFilter::Group(group.to_string()));

    let replies = match action {
        DeploymentAction::Upgrade => deployer.upgrade(),
        DeploymentAction::Downgrade => deployer.downgrade(),
    };
    let replies = match replies {
        Ok(replies) => replies,
        Err(err) => return collaborator_failed(deployer, err),
    };
    if replies.is_empty() {
        warn!(group, "no nodes answered the deployer");
    }

    let Some(reply) = first_offender(replies, |code| *code == 0) else {
        info!(%action, "application deployed");
        return PhaseOutcome::Success;
    };
    warn!(node = %reply.node, code = reply.value, %action, "deployment failed");
    let node = reply.node;
    let detail = format!("status code {}", reply.value);
    PhaseOutcome::Failed(match action {
        DeploymentAction::Upgrade => PhaseError::UpgradeFailed { node, detail },
        DeploymentAction::Downgrade => PhaseError::DowngradeFailed { node, detail },
    })
}

fn collaborator_failed<S: Scoped + ?Sized>(collaborator: &S, err: Error) -> PhaseOutcome {
    let detail = format!("{err:#}");
    warn!(collaborator = collaborator.label(), %detail, "collaborator call failed");
    PhaseOutcome::Failed(PhaseError::CollaboratorFailed {
        collaborator: collaborator.label(),
        detail,
    })
}
