//! Operator-facing progress lines.
//!
//! Rendering is kept apart from the runner so the wording can be tested without
//! a terminal. Every function returns lines without trailing newlines.

use crate::core::types::{BackendStatus, DeploymentAction, GroupResult, NodeIdentity, PhaseKind};
use crate::rollout::RolloutEvent;

/// Lines to print for one progress event.
pub fn render_event(event: &RolloutEvent<'_>, action: DeploymentAction) -> Vec<String> {
    match *event {
        RolloutEvent::GroupStarted { group } => vec![format!("Starting deployment of {group}")],
        RolloutEvent::PhaseStarted { phase, .. } => vec![phase_started(phase, action).to_string()],
        RolloutEvent::PhaseSucceeded { phase, .. } => {
            vec![phase_succeeded(phase, action).to_string()]
        }
        RolloutEvent::GroupFinished(result) => group_finished(result),
        // The gate prints its own prompt.
        RolloutEvent::AwaitingConfirmation { .. } => Vec::new(),
    }
}

fn phase_started(phase: PhaseKind, action: DeploymentAction) -> &'static str {
    match (phase, action) {
        (PhaseKind::Draining, _) => "Disabling group in load balancer...",
        (PhaseKind::Verifying, _) => "Checking that configuration management is stopped...",
        (PhaseKind::Deploying, DeploymentAction::Upgrade) => "Upgrading application...",
        (PhaseKind::Deploying, DeploymentAction::Downgrade) => "Downgrading application...",
        (PhaseKind::Restoring, _) => "Enabling group in load balancer...",
    }
}

fn phase_succeeded(phase: PhaseKind, action: DeploymentAction) -> &'static str {
    match (phase, action) {
        (PhaseKind::Draining, _) => "Nodes successfully brought down for maintenance",
        (PhaseKind::Verifying, _) => "Configuration management is stopped",
        (PhaseKind::Deploying, DeploymentAction::Upgrade) => "Successfully upgraded application",
        (PhaseKind::Deploying, DeploymentAction::Downgrade) => {
            "Successfully downgraded application"
        }
        (PhaseKind::Restoring, _) => "Nodes successfully brought back up",
    }
}

fn group_finished(result: &GroupResult) -> Vec<String> {
    if result.succeeded {
        return vec![format!("Finished deploying {}", result.group)];
    }
    let phase = result
        .failed_phase
        .map_or_else(|| "unknown phase".to_string(), |phase| phase.to_string());
    let mut line = format!("Deployment of {} failed while {phase}", result.group);
    if let Some(node) = &result.failed_node {
        line.push_str(&format!(" on {node}"));
    }
    if let Some(reason) = &result.reason {
        line.push_str(&format!(": {reason}"));
    }
    vec![line]
}

/// Final load-balancer membership listing.
pub fn render_status(status: Option<&BackendStatus>) -> Vec<String> {
    let Some(status) = status else {
        return vec!["Load balancer status unavailable".to_string()];
    };
    let mut lines = Vec::new();
    lines.push("Enabled nodes:".to_string());
    lines.extend(node_lines(&status.enabled));
    lines.push("Disabled nodes:".to_string());
    lines.extend(node_lines(&status.disabled));
    lines
}

fn node_lines<'a>(
    nodes: impl IntoIterator<Item = &'a NodeIdentity>,
) -> impl Iterator<Item = String> {
    nodes.into_iter().map(|node| format!("  {node}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PhaseError;

    #[test]
    fn deploy_wording_follows_action() {
        let started = RolloutEvent::PhaseStarted {
            group: "web-1",
            phase: PhaseKind::Deploying,
        };
        assert_eq!(
            render_event(&started, DeploymentAction::Downgrade),
            vec!["Downgrading application..."]
        );
        let done = RolloutEvent::PhaseSucceeded {
            group: "web-1",
            phase: PhaseKind::Deploying,
        };
        assert_eq!(
            render_event(&done, DeploymentAction::Upgrade),
            vec!["Successfully upgraded application"]
        );
    }

    #[test]
    fn failure_names_phase_node_and_cause() {
        let error = PhaseError::AgentEnabled {
            node: NodeIdentity::new("n1"),
            status: "running".into(),
        };
        let result = GroupResult::failed("web-1", PhaseKind::Verifying, &error);
        let lines = render_event(
            &RolloutEvent::GroupFinished(&result),
            DeploymentAction::Upgrade,
        );
        assert_eq!(lines.len(), 1);
        assert!(
            lines[0].starts_with("Deployment of web-1 failed while verifying on n1: "),
            "{}",
            lines[0]
        );
    }

    #[test]
    fn success_line_names_group() {
        let result = GroupResult::succeeded("web-2");
        assert_eq!(
            render_event(
                &RolloutEvent::GroupFinished(&result),
                DeploymentAction::Upgrade
            ),
            vec!["Finished deploying web-2"]
        );
    }

    #[test]
    fn status_lists_both_sets() {
        let status = BackendStatus {
            enabled: ["web3", "web4"].into_iter().map(NodeIdentity::from).collect(),
            disabled: ["web1"].into_iter().map(NodeIdentity::from).collect(),
        };
        assert_eq!(
            render_status(Some(&status)),
            vec![
                "Enabled nodes:",
                "  web3",
                "  web4",
                "Disabled nodes:",
                "  web1"
            ]
        );
        assert_eq!(
            render_status(None),
            vec!["Load balancer status unavailable"]
        );
    }
}
