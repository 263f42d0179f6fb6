//! Collaborator abstractions for the three control planes plus node liveness.
//!
//! The traits decouple phase execution from the transport that reaches the
//! fleet (currently MCollective, see [`crate::io::mco`]). Tests use the
//! in-memory fleet from `test_support`, which records every filter change.
//!
//! Every collaborator carries one piece of mutable state: its target filter.
//! Callers must only set it through [`FilterScope`], which clears it again on
//! every exit path.

use std::fmt;

use anyhow::Result;
use tracing::trace;

use crate::core::types::{BackendStatus, NodeIdentity, NodeReply};

/// Selector that scopes the next collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetFilter {
    /// Address exactly one node by identity (the load balancer).
    Identity(String),
    /// Address every node in a named group.
    Group(String),
}

impl fmt::Display for TargetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(id) => write!(f, "identity={id}"),
            Self::Group(group) => write!(f, "group={group}"),
        }
    }
}

/// A collaborator whose calls can be scoped by a [`TargetFilter`].
pub trait Scoped {
    /// Short label used in logs and `CollaboratorFailed` errors.
    fn label(&self) -> &'static str;
    fn apply_filter(&self, filter: TargetFilter);
    fn reset_filter(&self);
}

/// Guard that holds a filter on a collaborator for its lifetime.
///
/// The filter is applied in [`FilterScope::acquire`] and reset in `Drop`, so
/// an early return or `?` inside the scoped block still clears it.
pub struct FilterScope<'a, S: Scoped + ?Sized> {
    target: &'a S,
}

impl<'a, S: Scoped + ?Sized> FilterScope<'a, S> {
    pub fn acquire(target: &'a S, filter: TargetFilter) -> Self {
        trace!(collaborator = target.label(), %filter, "apply filter");
        target.apply_filter(filter);
        Self { target }
    }
}

impl<S: Scoped + ?Sized> Drop for FilterScope<'_, S> {
    fn drop(&mut self) {
        trace!(collaborator = self.target.label(), "reset filter");
        self.target.reset_filter();
    }
}

/// Load-balancer control plane. Scoped by identity to the balancer itself.
pub trait LoadBalancerController: Scoped {
    /// Disable `node` in `backend`. Returns the balancer's status code (0 = ok).
    fn disable(&self, backend: &str, node: &NodeIdentity) -> Result<i32>;
    /// Enable `node` in `backend`. Returns the balancer's status code (0 = ok).
    fn enable(&self, backend: &str, node: &NodeIdentity) -> Result<i32>;
    fn backend_status(&self, backend: &str) -> Result<BackendStatus>;
}

/// Configuration-management status probe. Scoped by group.
pub trait AgentStatusProbe: Scoped {
    /// Report the service state (e.g. `stopped`, `running`) of every node in scope.
    fn status(&self, service: &str) -> Result<Vec<NodeReply<String>>>;
}

/// Application deployer. Scoped by group.
pub trait ApplicationDeployer: Scoped {
    fn upgrade(&self) -> Result<Vec<NodeReply<i32>>>;
    fn downgrade(&self) -> Result<Vec<NodeReply<i32>>>;
}

/// Node enumeration. Scoped by group.
pub trait NodeLiveness: Scoped {
    fn ping(&self) -> Result<Vec<NodeIdentity>>;
}

/// The injected set of collaborators a rollout talks to.
pub struct ControlPlane<L, P, D, N> {
    pub load_balancer: L,
    pub agent_status: P,
    pub deployer: D,
    pub liveness: N,
}

/// Fixed names the phases address on the control planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    /// Identity of the load-balancer node.
    pub load_balancer: String,
    /// Backend pool on the load balancer.
    pub backend: String,
    /// Configuration-management service that must be stopped before deploying.
    pub service: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingScope {
        events: RefCell<Vec<String>>,
    }

    impl Scoped for RecordingScope {
        fn label(&self) -> &'static str {
            "recording"
        }

        fn apply_filter(&self, filter: TargetFilter) {
            self.events.borrow_mut().push(format!("set {filter}"));
        }

        fn reset_filter(&self) {
            self.events.borrow_mut().push("reset".to_string());
        }
    }

    fn scoped_call(target: &RecordingScope, fail: bool) -> Result<()> {
        let _scope = FilterScope::acquire(target, TargetFilter::Group("web".to_string()));
        if fail {
            anyhow::bail!("boom");
        }
        Ok(())
    }

    #[test]
    fn scope_resets_on_success_and_error() {
        let target = RecordingScope::default();
        scoped_call(&target, false).expect("ok");
        assert!(scoped_call(&target, true).is_err());
        assert_eq!(
            *target.events.borrow(),
            vec!["set group=web", "reset", "set group=web", "reset"]
        );
    }
}
