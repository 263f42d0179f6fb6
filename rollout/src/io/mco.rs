//! MCollective adapter: every collaborator is an `mco rpc` agent.
//!
//! Calls shell out to `mco rpc <agent> <action> key=value... --json` with the
//! active filter translated to `-I <identity>` or `-C <class>`, and parse the
//! JSON reply array. Group names map to MCollective classes.

use std::process::Command;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::{BackendStatus, NodeIdentity, NodeReply};
use crate::io::config::McoConfig;
use crate::io::control_plane::{
    AgentStatusProbe, ApplicationDeployer, ControlPlane, LoadBalancerController, NodeLiveness,
    Scoped, TargetFilter,
};
use crate::io::process::run_with_timeout;

/// One responder's entry in `mco rpc --json` output.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RpcReply {
    pub sender: String,
    /// No default: a reply without a code fails to parse.
    pub statuscode: i32,
    #[serde(default)]
    pub statusmsg: String,
    #[serde(default)]
    pub data: Value,
}

/// Parse the reply array printed by `mco rpc --json`.
pub fn parse_replies(stdout: &[u8]) -> Result<Vec<RpcReply>> {
    serde_json::from_slice(stdout).context("parse mco rpc json output")
}

/// Client for a single MCollective agent with its own filter slot.
pub struct McoClient {
    agent: String,
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    filter: Mutex<Option<TargetFilter>>,
}

impl McoClient {
    pub fn new(agent: &str, cfg: &McoConfig) -> Self {
        Self {
            agent: agent.to_string(),
            command: cfg.command.clone(),
            timeout: cfg.timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
            filter: Mutex::new(None),
        }
    }

    fn set_filter(&self, filter: Option<TargetFilter>) {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = filter;
    }

    pub fn current_filter(&self) -> Option<TargetFilter> {
        self.filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Arguments after the program name for one rpc call.
    pub fn rpc_args(&self, action: &str, params: &[(&str, &str)]) -> Vec<String> {
        let mut args: Vec<String> = self.command.iter().skip(1).cloned().collect();
        args.push("rpc".to_string());
        args.push(self.agent.clone());
        args.push(action.to_string());
        args.extend(params.iter().map(|(key, value)| format!("{key}={value}")));
        args.push("--json".to_string());
        match self.current_filter() {
            Some(TargetFilter::Identity(id)) => {
                args.push("-I".to_string());
                args.push(id);
            }
            Some(TargetFilter::Group(group)) => {
                args.push("-C".to_string());
                args.push(group);
            }
            None => {}
        }
        args
    }

    #[instrument(skip(self, params), fields(agent = %self.agent))]
    pub fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<Vec<RpcReply>> {
        let program = self
            .command
            .first()
            .ok_or_else(|| anyhow!("mco command is empty"))?;
        let args = self.rpc_args(action, params);
        debug!(?args, "mco rpc");

        let mut cmd = Command::new(program);
        cmd.args(&args);
        let output = run_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run mco rpc {} {action}", self.agent))?;
        if !output.success() {
            bail!(
                "mco rpc {} {action} failed: {}",
                self.agent,
                output.failure_summary()
            );
        }
        let replies = parse_replies(&output.stdout)
            .with_context(|| format!("mco rpc {} {action}", self.agent))?;
        debug!(replies = replies.len(), "mco rpc replied");
        Ok(replies)
    }
}

/// Status code for a command addressed to the load balancer: the first
/// non-zero code among responders, 0 when all succeeded.
fn command_status(replies: &[RpcReply]) -> Result<i32> {
    if replies.is_empty() {
        bail!("no reply from load balancer");
    }
    Ok(replies
        .iter()
        .map(|reply| reply.statuscode)
        .find(|code| *code != 0)
        .unwrap_or(0))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackendData {
    enabled: Vec<String>,
    disabled: Vec<String>,
}

fn backend_status_from(replies: &[RpcReply]) -> Result<BackendStatus> {
    if replies.is_empty() {
        bail!("no reply from load balancer");
    }
    let mut status = BackendStatus::default();
    for reply in replies {
        let data: BackendData = serde_json::from_value(reply.data.clone())
            .with_context(|| format!("parse backend_status data from {}", reply.sender))?;
        status.merge(BackendStatus {
            enabled: data.enabled.into_iter().map(NodeIdentity::from).collect(),
            disabled: data.disabled.into_iter().map(NodeIdentity::from).collect(),
        });
    }
    Ok(status)
}

fn service_state(reply: &RpcReply) -> String {
    reply
        .data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// `haproxy` agent on the load-balancer node.
pub struct McoLoadBalancer(pub McoClient);

impl Scoped for McoLoadBalancer {
    fn label(&self) -> &'static str {
        "load balancer"
    }

    fn apply_filter(&self, filter: TargetFilter) {
        self.0.set_filter(Some(filter));
    }

    fn reset_filter(&self) {
        self.0.set_filter(None);
    }
}

impl LoadBalancerController for McoLoadBalancer {
    fn disable(&self, backend: &str, node: &NodeIdentity) -> Result<i32> {
        let replies = self
            .0
            .call("disable", &[("backend", backend), ("server", node.as_str())])?;
        command_status(&replies)
    }

    fn enable(&self, backend: &str, node: &NodeIdentity) -> Result<i32> {
        let replies = self
            .0
            .call("enable", &[("backend", backend), ("server", node.as_str())])?;
        command_status(&replies)
    }

    fn backend_status(&self, backend: &str) -> Result<BackendStatus> {
        let replies = self.0.call("backend_status", &[("backend", backend)])?;
        backend_status_from(&replies)
    }
}

/// `service` agent used to probe configuration management.
pub struct McoServiceProbe(pub McoClient);

impl Scoped for McoServiceProbe {
    fn label(&self) -> &'static str {
        "agent status"
    }

    fn apply_filter(&self, filter: TargetFilter) {
        self.0.set_filter(Some(filter));
    }

    fn reset_filter(&self) {
        self.0.set_filter(None);
    }
}

impl AgentStatusProbe for McoServiceProbe {
    fn status(&self, service: &str) -> Result<Vec<NodeReply<String>>> {
        let replies = self.0.call("status", &[("service", service)])?;
        Ok(replies
            .iter()
            .map(|reply| NodeReply::new(reply.sender.as_str(), service_state(reply)))
            .collect())
    }
}

/// Application `site` agent.
pub struct McoDeployer(pub McoClient);

impl McoDeployer {
    fn codes(&self, action: &str) -> Result<Vec<NodeReply<i32>>> {
        let replies = self.0.call(action, &[])?;
        Ok(replies
            .into_iter()
            .map(|reply| NodeReply::new(reply.sender, reply.statuscode))
            .collect())
    }
}

impl Scoped for McoDeployer {
    fn label(&self) -> &'static str {
        "deployer"
    }

    fn apply_filter(&self, filter: TargetFilter) {
        self.0.set_filter(Some(filter));
    }

    fn reset_filter(&self) {
        self.0.set_filter(None);
    }
}

impl ApplicationDeployer for McoDeployer {
    fn upgrade(&self) -> Result<Vec<NodeReply<i32>>> {
        self.codes("upgrade")
    }

    fn downgrade(&self) -> Result<Vec<NodeReply<i32>>> {
        self.codes("downgrade")
    }
}

/// `rpcutil ping` used to enumerate live group members.
pub struct McoLiveness(pub McoClient);

impl Scoped for McoLiveness {
    fn label(&self) -> &'static str {
        "liveness"
    }

    fn apply_filter(&self, filter: TargetFilter) {
        self.0.set_filter(Some(filter));
    }

    fn reset_filter(&self) {
        self.0.set_filter(None);
    }
}

impl NodeLiveness for McoLiveness {
    fn ping(&self) -> Result<Vec<NodeIdentity>> {
        let replies = self.0.call("ping", &[])?;
        Ok(replies
            .into_iter()
            .map(|reply| NodeIdentity::from(reply.sender))
            .collect())
    }
}

/// The MCollective-backed control plane.
pub type McoControlPlane = ControlPlane<McoLoadBalancer, McoServiceProbe, McoDeployer, McoLiveness>;

pub fn control_plane(cfg: &McoConfig) -> McoControlPlane {
    ControlPlane {
        load_balancer: McoLoadBalancer(McoClient::new(&cfg.load_balancer_agent, cfg)),
        agent_status: McoServiceProbe(McoClient::new(&cfg.service_agent, cfg)),
        deployer: McoDeployer(McoClient::new(&cfg.deployer_agent, cfg)),
        liveness: McoLiveness(McoClient::new(&cfg.liveness_agent, cfg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::control_plane::FilterScope;

    fn config_with_command(command: &[&str]) -> McoConfig {
        McoConfig {
            command: command.iter().map(|part| part.to_string()).collect(),
            timeout_secs: 5,
            ..McoConfig::default()
        }
    }

    #[test]
    fn rpc_args_include_params_and_active_filter() {
        let cfg = config_with_command(&["sudo", "mco"]);
        let lb = McoLoadBalancer(McoClient::new("haproxy", &cfg));

        {
            let _scope = FilterScope::acquire(&lb, TargetFilter::Identity("lb1".to_string()));
            let args = lb
                .0
                .rpc_args("disable", &[("backend", "app"), ("server", "web1")]);
            assert_eq!(
                args,
                vec![
                    "mco",
                    "rpc",
                    "haproxy",
                    "disable",
                    "backend=app",
                    "server=web1",
                    "--json",
                    "-I",
                    "lb1"
                ]
            );
        }

        assert_eq!(lb.0.current_filter(), None);
        assert_eq!(
            lb.0.rpc_args("backend_status", &[]),
            vec!["mco", "rpc", "haproxy", "backend_status", "--json"]
        );
    }

    #[test]
    fn group_filter_maps_to_class_filter() {
        let liveness = McoLiveness(McoClient::new("rpcutil", &McoConfig::default()));
        liveness.apply_filter(TargetFilter::Group("web-1".to_string()));
        assert_eq!(
            liveness.0.rpc_args("ping", &[]),
            vec!["rpc", "rpcutil", "ping", "--json", "-C", "web-1"]
        );
    }

    #[test]
    fn parses_reply_array_with_optional_fields_missing() {
        let raw = br#"[
            {"sender":"web1","statuscode":0,"statusmsg":"OK","data":{"status":"stopped"}},
            {"sender":"web2","statuscode":0}
        ]"#;
        let replies = parse_replies(raw).expect("parse");
        assert_eq!(replies.len(), 2);
        assert_eq!(service_state(&replies[0]), "stopped");
        assert_eq!(service_state(&replies[1]), "unknown");
        assert_eq!(replies[1].statusmsg, "");
    }

    #[test]
    fn reply_without_status_code_is_rejected() {
        let raw = br#"[{"sender":"web1","statuscode":0},{"sender":"web2","data":{}}]"#;
        assert!(parse_replies(raw).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn upgrade_without_status_codes_fails() {
        let cfg = config_with_command(&[
            "sh",
            "-c",
            r#"printf '%s' '[{"sender":"web1","data":{}}]'"#,
            "mco",
        ]);
        let deployer = McoDeployer(McoClient::new("site", &cfg));
        let err = deployer.upgrade().unwrap_err();
        assert!(format!("{err:#}").contains("parse mco rpc json output"), "{err:#}");
    }

    #[test]
    fn command_status_reports_first_nonzero_code() {
        let replies = parse_replies(
            br#"[{"sender":"lb1","statuscode":0},{"sender":"lb2","statuscode":4}]"#,
        )
        .expect("parse");
        assert_eq!(command_status(&replies).expect("status"), 4);
        assert!(command_status(&[]).is_err());
    }

    #[test]
    fn backend_status_merges_responders() {
        let replies = parse_replies(
            br#"[
                {"sender":"lb1","statuscode":0,"data":{"enabled":["web1"],"disabled":["web3"]}},
                {"sender":"lb2","statuscode":0,"data":{"enabled":["web2"]}}
            ]"#,
        )
        .expect("parse");
        let status = backend_status_from(&replies).expect("status");
        let enabled: Vec<&str> = status.enabled.iter().map(NodeIdentity::as_str).collect();
        let disabled: Vec<&str> = status.disabled.iter().map(NodeIdentity::as_str).collect();
        assert_eq!(enabled, vec!["web1", "web2"]);
        assert_eq!(disabled, vec!["web3"]);
    }

    #[cfg(unix)]
    #[test]
    fn call_runs_command_and_parses_stdout() {
        let cfg = config_with_command(&[
            "sh",
            "-c",
            r#"printf '%s' '[{"sender":"web2","statuscode":1},{"sender":"web1","statuscode":0}]'"#,
            "mco",
        ]);
        let deployer = McoDeployer(McoClient::new("site", &cfg));
        let codes = deployer.upgrade().expect("upgrade");
        assert_eq!(
            codes,
            vec![NodeReply::new("web2", 1), NodeReply::new("web1", 0)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn call_surfaces_command_failure() {
        let cfg = config_with_command(&["sh", "-c", "echo 'unknown agent' >&2; exit 1", "mco"]);
        let probe = McoServiceProbe(McoClient::new("service", &cfg));
        let err = probe.status("puppet").unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("mco rpc service status failed"), "{message}");
        assert!(message.contains("unknown agent"), "{message}");
    }
}
