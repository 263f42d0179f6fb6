//! Orchestration of the four phases for a single group.

use tracing::{info, instrument, warn};

use crate::core::machine::GroupState;
use crate::core::types::{DeploymentAction, GroupResult, PhaseOutcome};
use crate::io::control_plane::{
    AgentStatusProbe, ApplicationDeployer, ControlPlane, DeployTarget, LoadBalancerController,
    NodeLiveness,
};
use crate::phase::run_phase;
use crate::rollout::RolloutEvent;

/// Drive `group` through drain, verify, deploy, and restore.
///
/// Stops at the first failing phase. Later phases are not invoked, so a group
/// that fails after draining stays out of the load balancer until someone
/// intervenes.
#[instrument(skip(plane, target, on_event), fields(%action))]
pub fn run_group<L, P, D, N, F>(
    plane: &ControlPlane<L, P, D, N>,
    target: &DeployTarget,
    group: &str,
    action: DeploymentAction,
    on_event: &mut F,
) -> GroupResult
where
    L: LoadBalancerController,
    P: AgentStatusProbe,
    D: ApplicationDeployer,
    N: NodeLiveness,
    F: FnMut(&RolloutEvent<'_>),
{
    on_event(&RolloutEvent::GroupStarted { group });

    let mut state = GroupState::initial();
    let mut failure = None;
    while let Some(phase) = state.phase() {
        on_event(&RolloutEvent::PhaseStarted { group, phase });
        let outcome = run_phase(plane, target, group, action, phase);
        let succeeded = outcome.is_success();
        match outcome {
            PhaseOutcome::Success => on_event(&RolloutEvent::PhaseSucceeded { group, phase }),
            PhaseOutcome::Failed(error) => failure = Some(error),
        }
        state = state.advance(succeeded);
    }

    match (state, failure) {
        (GroupState::Failed(phase), Some(error)) => {
            warn!(%phase, %error, "group failed");
            GroupResult::failed(group, phase, &error)
        }
        _ => {
            info!("group deployed");
            GroupResult::succeeded(group)
        }
    }
}
