//! End-of-run load-balancer status report.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::BackendStatus;
use crate::io::control_plane::{DeployTarget, FilterScope, LoadBalancerController, TargetFilter};

/// Query current backend membership on the load balancer.
///
/// Read-only: the only side effect is the identity filter, which is reset
/// before returning.
#[instrument(skip_all, fields(backend = %target.backend))]
pub fn report_status<L: LoadBalancerController>(
    lb: &L,
    target: &DeployTarget,
) -> Result<BackendStatus> {
    let _scope = FilterScope::acquire(lb, TargetFilter::Identity(target.load_balancer.clone()));
    let status = lb
        .backend_status(&target.backend)
        .with_context(|| format!("query backend {} on {}", target.backend, target.load_balancer))?;
    debug!(
        enabled = status.enabled.len(),
        disabled = status.disabled.len(),
        "backend status"
    );
    Ok(status)
}
