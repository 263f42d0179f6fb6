//! Sequencing of groups with an operator gate between them.

use tracing::{info, instrument, warn};

use crate::core::types::{BackendStatus, DeploymentAction, GroupResult, PhaseKind, RunReport};
use crate::group::run_group;
use crate::io::control_plane::{
    AgentStatusProbe, ApplicationDeployer, ControlPlane, DeployTarget, LoadBalancerController,
    NodeLiveness,
};
use crate::io::gate::{Confirmation, ConfirmationGate};
use crate::status::report_status;

/// Progress notification emitted while a rollout runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutEvent<'a> {
    GroupStarted { group: &'a str },
    PhaseStarted { group: &'a str, phase: PhaseKind },
    PhaseSucceeded { group: &'a str, phase: PhaseKind },
    GroupFinished(&'a GroupResult),
    AwaitingConfirmation { next_group: &'a str },
}

/// Reason why `run_rollout` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutStop {
    /// Every group was processed. `backend` is `None` when the final status
    /// query failed.
    Completed { backend: Option<BackendStatus> },
    /// The operator cancelled at the gate following `after_group`, or
    /// interrupted while `after_group`, the final group, was running.
    Interrupted { after_group: String },
}

/// Summary of a rollout invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutOutcome {
    pub report: RunReport,
    pub stop: RolloutStop,
}

impl RolloutOutcome {
    pub fn interrupted(&self) -> bool {
        matches!(self.stop, RolloutStop::Interrupted { .. })
    }
}

/// Deploy `groups` one after another in the given order.
///
/// Phase failures never abort the run; they are recorded in the report and
/// the operator decides at the gate whether to continue. The gate is consulted
/// between groups only, never after the last one. A gate error counts as
/// cancellation. An interrupt still pending once the final group finishes ends
/// the run as interrupted, without a status report.
#[instrument(skip_all, fields(%action, groups = groups.len()))]
pub fn run_rollout<L, P, D, N, G, F>(
    plane: &ControlPlane<L, P, D, N>,
    target: &DeployTarget,
    groups: &[String],
    action: DeploymentAction,
    gate: &G,
    mut on_event: F,
) -> RolloutOutcome
where
    L: LoadBalancerController,
    P: AgentStatusProbe,
    D: ApplicationDeployer,
    N: NodeLiveness,
    G: ConfirmationGate + ?Sized,
    F: FnMut(&RolloutEvent<'_>),
{
    let mut report = RunReport::new(action);

    for (index, group) in groups.iter().enumerate() {
        let result = run_group(plane, target, group, action, &mut on_event);
        on_event(&RolloutEvent::GroupFinished(&result));
        report.results.push(result);

        let Some(next_group) = groups.get(index + 1) else {
            break;
        };
        on_event(&RolloutEvent::AwaitingConfirmation { next_group });
        let answer = gate.confirm(next_group).unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "confirmation failed; treating as cancel");
            Confirmation::Abort
        });
        if answer == Confirmation::Abort {
            info!(after_group = %group, "rollout cancelled by operator");
            return interrupted(report, group);
        }
    }

    if let Some(last) = groups.last().filter(|_| gate.interrupt_pending()) {
        info!(after_group = %last, "interrupted during final group");
        return interrupted(report, last);
    }

    let backend = match report_status(&plane.load_balancer, target) {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "status unavailable");
            None
        }
    };
    RolloutOutcome {
        report,
        stop: RolloutStop::Completed { backend },
    }
}

fn interrupted(mut report: RunReport, after_group: &str) -> RolloutOutcome {
    report.interrupted = true;
    RolloutOutcome {
        report,
        stop: RolloutStop::Interrupted {
            after_group: after_group.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NodeIdentity;
    use crate::test_support::{FakeFleet, FleetCall, ScriptedGate};

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn three_groups() -> FakeFleet {
        FakeFleet::new("lb1")
            .with_group("a", &["a1"])
            .with_group("b", &["b1"])
            .with_group("c", &["c1"])
    }

    fn nodes(set: &std::collections::BTreeSet<NodeIdentity>) -> Vec<&str> {
        set.iter().map(NodeIdentity::as_str).collect()
    }

    #[test]
    fn gate_is_consulted_between_groups_only() {
        let fleet = three_groups();
        let gate = ScriptedGate::always_proceed();
        let outcome = run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["a", "b", "c"]),
            DeploymentAction::Upgrade,
            &gate,
            |_| {},
        );

        assert_eq!(gate.asked(), vec!["b", "c"]);
        let order: Vec<&str> = outcome
            .report
            .results
            .iter()
            .map(|result| result.group.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(!outcome.interrupted());
    }

    #[test]
    fn groups_run_in_input_order_not_sorted() {
        let fleet = three_groups();
        let outcome = run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["c", "a", "b"]),
            DeploymentAction::Upgrade,
            &ScriptedGate::always_proceed(),
            |_| {},
        );

        let upgraded: Vec<Option<String>> = fleet
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                FleetCall::Upgrade(group) => Some(group),
                _ => None,
            })
            .collect();
        assert_eq!(
            upgraded,
            vec![Some("c".into()), Some("a".into()), Some("b".into())]
        );
        assert_eq!(outcome.report.results[0].group, "c");
    }

    #[test]
    fn verify_failure_pauses_then_continues() {
        let fleet = FakeFleet::new("lb1")
            .with_group("web-1", &["n1", "n2"])
            .with_group("web-2", &["n3", "n4"])
            .with_agent_status("n1", "running");
        let gate = ScriptedGate::always_proceed();
        let outcome = run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["web-1", "web-2"]),
            DeploymentAction::Upgrade,
            &gate,
            |_| {},
        );

        let [first, second] = outcome.report.results.as_slice() else {
            panic!("expected two results: {:?}", outcome.report.results);
        };
        assert!(!first.succeeded);
        assert_eq!(first.failed_phase, Some(PhaseKind::Verifying));
        assert_eq!(first.failed_node, Some(NodeIdentity::new("n1")));
        assert!(second.succeeded);
        assert_eq!(gate.asked(), vec!["web-2"]);

        let RolloutStop::Completed {
            backend: Some(status),
        } = outcome.stop
        else {
            panic!("expected status: {:?}", outcome.stop);
        };
        assert_eq!(nodes(&status.enabled), vec!["n3", "n4"]);
        assert_eq!(nodes(&status.disabled), vec!["n1", "n2"]);
    }

    #[test]
    fn cancellation_stops_before_next_group() {
        let fleet = three_groups();
        let gate = ScriptedGate::new(vec![Confirmation::Abort]);
        let outcome = run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["a", "b", "c"]),
            DeploymentAction::Upgrade,
            &gate,
            |_| {},
        );

        assert_eq!(outcome.report.results.len(), 1);
        assert!(outcome.report.interrupted);
        assert_eq!(
            outcome.stop,
            RolloutStop::Interrupted {
                after_group: "a".into()
            }
        );
        let touched_b = fleet.calls().into_iter().any(|call| match call {
            FleetCall::Ping(group) | FleetCall::Upgrade(group) | FleetCall::Status(group) => {
                group.as_deref() == Some("b")
            }
            _ => false,
        });
        assert!(!touched_b);
        // No status report after cancellation.
        assert!(!fleet.calls().contains(&FleetCall::BackendStatus));
    }

    #[test]
    fn broken_gate_counts_as_cancel() {
        let fleet = three_groups();
        let outcome = run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["a", "b"]),
            DeploymentAction::Upgrade,
            &ScriptedGate::broken(),
            |_| {},
        );
        assert!(outcome.interrupted());
        assert_eq!(outcome.report.results.len(), 1);
    }

    #[test]
    fn single_group_never_prompts() {
        let fleet = three_groups();
        let gate = ScriptedGate::new(vec![Confirmation::Abort]);
        let outcome = run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["a"]),
            DeploymentAction::Downgrade,
            &gate,
            |_| {},
        );
        assert!(gate.asked().is_empty());
        assert!(!outcome.interrupted());
        assert_eq!(fleet.deployed("a1"), Some(DeploymentAction::Downgrade));
    }

    #[test]
    fn interrupt_during_final_group_ends_as_interrupted() {
        let fleet = three_groups();
        let gate = ScriptedGate::always_proceed().with_pending_interrupt();
        let outcome = run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["a"]),
            DeploymentAction::Upgrade,
            &gate,
            |_| {},
        );

        // The group still runs to completion.
        assert!(outcome.report.results[0].succeeded);
        assert!(outcome.report.interrupted);
        assert_eq!(
            outcome.stop,
            RolloutStop::Interrupted {
                after_group: "a".into()
            }
        );
        assert!(gate.asked().is_empty());
        assert!(!fleet.calls().contains(&FleetCall::BackendStatus));
    }

    #[test]
    fn unavailable_status_is_not_an_error() {
        let fleet = three_groups().with_unreachable("load balancer");
        let outcome = run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["a"]),
            DeploymentAction::Upgrade,
            &ScriptedGate::always_proceed(),
            |_| {},
        );
        assert_eq!(outcome.stop, RolloutStop::Completed { backend: None });
        assert!(!outcome.report.results[0].succeeded);
    }

    #[test]
    fn events_follow_group_lifecycle() {
        let fleet = three_groups();
        let mut seen = Vec::new();
        run_rollout(
            &fleet.control_plane(),
            &fleet.target(),
            &groups(&["a", "b"]),
            DeploymentAction::Upgrade,
            &ScriptedGate::always_proceed(),
            |event| {
                let label = match event {
                    RolloutEvent::GroupStarted { group } => format!("start {group}"),
                    RolloutEvent::PhaseStarted { .. } | RolloutEvent::PhaseSucceeded { .. } => {
                        return;
                    }
                    RolloutEvent::GroupFinished(result) => format!("finish {}", result.group),
                    RolloutEvent::AwaitingConfirmation { next_group } => {
                        format!("gate {next_group}")
                    }
                };
                seen.push(label);
            },
        );
        assert_eq!(
            seen,
            vec!["start a", "finish a", "gate b", "start b", "finish b"]
        );
    }
}
