//! Rolling group deployment CLI.
//!
//! `rollout [upgrade|downgrade] <group>...` drains each group from the load
//! balancer, checks that configuration management is stopped, deploys, and
//! puts the group back, pausing for confirmation between groups.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use rollout::core::types::DeploymentAction;
use rollout::exit_codes;
use rollout::io::config::load_config;
use rollout::io::gate::TerminalGate;
use rollout::io::mco;
use rollout::io::report_store::write_report;
use rollout::logging;
use rollout::render::{render_event, render_status};
use rollout::rollout::{RolloutStop, run_rollout};

#[derive(Parser)]
#[command(
    name = "rollout",
    version,
    about = "Rolling group deployment behind a load balancer"
)]
struct Cli {
    /// Configuration file. Defaults apply when it does not exist.
    #[arg(long, default_value = "rollout.toml")]
    config: PathBuf,
    /// Also write the run report as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,
    /// Optional action (`upgrade` or `downgrade`, default `upgrade`) followed by
    /// the groups to deploy, in order.
    #[arg(required = true, value_name = "ACTION|GROUP")]
    args: Vec<String>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

/// Split positional arguments into the action and the ordered group list.
///
/// An unrecognized first token is the first group, not an error.
fn parse_invocation(args: &[String]) -> Result<(DeploymentAction, Vec<String>)> {
    let (action, groups) = match args.split_first() {
        Some((first, rest)) => match DeploymentAction::from_token(first) {
            Some(action) => (action, rest.to_vec()),
            None => (DeploymentAction::default(), args.to_vec()),
        },
        None => (DeploymentAction::default(), Vec::new()),
    };
    if groups.is_empty() {
        bail!("no groups given (usage: rollout [upgrade|downgrade] <group>...)");
    }
    Ok((action, groups))
}

fn run(cli: &Cli) -> Result<i32> {
    let (action, groups) = parse_invocation(&cli.args)?;
    let cfg = load_config(&cli.config)?;
    let gate = TerminalGate::install()?;
    let plane = mco::control_plane(&cfg.mco);
    let target = cfg.deploy_target();

    let outcome = run_rollout(&plane, &target, &groups, action, &gate, |event| {
        for line in render_event(event, action) {
            println!("{line}");
        }
    });

    let failed: Vec<&str> = outcome
        .report
        .failed_groups()
        .map(|result| result.group.as_str())
        .collect();
    if !failed.is_empty() {
        println!();
        println!("Failed groups: {}", failed.join(", "));
    }

    let code = match &outcome.stop {
        RolloutStop::Completed { backend } => {
            println!();
            for line in render_status(backend.as_ref()) {
                println!("{line}");
            }
            exit_codes::OK
        }
        RolloutStop::Interrupted { after_group } => {
            println!("Deployment interrupted after {after_group}");
            exit_codes::INTERRUPTED
        }
    };

    if let Some(path) = &cli.report {
        write_report(path, &outcome.report)?;
    }
    Ok(code)
}
