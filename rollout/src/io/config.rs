//! Rollout configuration stored in `rollout.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::control_plane::DeployTarget;

/// Rollout configuration (TOML).
///
/// Every field has a default so an absent file or a partial file both load.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RolloutConfig {
    pub target: TargetConfig,
    pub mco: McoConfig,
}

/// Names the phases address on the control planes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    /// Identity of the load-balancer node.
    pub load_balancer: String,
    /// Backend pool whose members are drained and restored.
    pub backend: String,
    /// Configuration-management service that must be stopped before deploying.
    pub service: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            load_balancer: "lb1".to_string(),
            backend: "app".to_string(),
            service: "puppet".to_string(),
        }
    }
}

/// How to reach the fleet through the MCollective CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct McoConfig {
    /// Program plus leading arguments (e.g. `["mco"]` or `["sudo","mco"]`).
    pub command: Vec<String>,
    /// Wall-clock budget for a single rpc call.
    pub timeout_secs: u64,
    /// Cap on captured stdout/stderr per call.
    pub output_limit_bytes: usize,
    pub load_balancer_agent: String,
    pub service_agent: String,
    pub deployer_agent: String,
    pub liveness_agent: String,
}

impl Default for McoConfig {
    fn default() -> Self {
        Self {
            command: vec!["mco".to_string()],
            timeout_secs: 120,
            output_limit_bytes: 1_000_000,
            load_balancer_agent: "haproxy".to_string(),
            service_agent: "service".to_string(),
            deployer_agent: "site".to_string(),
            liveness_agent: "rpcutil".to_string(),
        }
    }
}

impl McoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RolloutConfig {
    pub fn validate(&self) -> Result<()> {
        require_name("target.load_balancer", &self.target.load_balancer)?;
        require_name("target.backend", &self.target.backend)?;
        require_name("target.service", &self.target.service)?;
        if self.mco.command.is_empty() || self.mco.command[0].trim().is_empty() {
            return Err(anyhow!("mco.command must be a non-empty array"));
        }
        if self.mco.timeout_secs == 0 {
            return Err(anyhow!("mco.timeout_secs must be > 0"));
        }
        if self.mco.output_limit_bytes == 0 {
            return Err(anyhow!("mco.output_limit_bytes must be > 0"));
        }
        require_name("mco.load_balancer_agent", &self.mco.load_balancer_agent)?;
        require_name("mco.service_agent", &self.mco.service_agent)?;
        require_name("mco.deployer_agent", &self.mco.deployer_agent)?;
        require_name("mco.liveness_agent", &self.mco.liveness_agent)?;
        Ok(())
    }

    pub fn deploy_target(&self) -> DeployTarget {
        DeployTarget {
            load_balancer: self.target.load_balancer.clone(),
            backend: self.target.backend.clone(),
            service: self.target.service.clone(),
        }
    }
}

fn require_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{field} must not be empty"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RolloutConfig::default()`.
pub fn load_config(path: &Path) -> Result<RolloutConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = RolloutConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RolloutConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
