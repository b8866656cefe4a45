//! `gcloud compute` backend for a zonal managed instance group.
//!
//! Every operation shells out to the gcloud CLI. Each invocation runs under
//! `command_timeout`; the child is killed if the deadline passes.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use burstgrid_core::{ControllerConfig, NodeId, NodeStatus};

use crate::backend::FleetBackend;
use crate::error::{FleetError, FleetResult};

/// Shell one-liner started on a node to make it carry load.
pub const DEFAULT_WORKLOAD_COMMAND: &str =
    "nohup sh -c 'while :; do :; done' > /dev/null 2>&1 &";

#[derive(Debug, Clone)]
pub struct GcloudConfig {
    /// Path or name of the gcloud binary.
    pub program: String,
    pub group: String,
    pub zone: String,
    pub project: Option<String>,
    pub command_timeout: Duration,
    /// Command run over `gcloud compute ssh` by `start_workload`.
    pub workload_command: String,
}

impl GcloudConfig {
    pub fn from_controller_config(config: &ControllerConfig) -> Self {
        Self {
            program: "gcloud".to_string(),
            group: config.group.name.clone(),
            zone: config.group.zone.clone(),
            project: config.group.project.clone(),
            command_timeout: config.command_timeout(),
            workload_command: DEFAULT_WORKLOAD_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GcloudBackend {
    config: GcloudConfig,
}

impl GcloudBackend {
    pub fn new(config: GcloudConfig) -> Self {
        Self { config }
    }

    fn scoped(&self, mut args: Vec<String>) -> Vec<String> {
        args.push(format!("--zone={}", self.config.zone));
        if let Some(project) = &self.config.project {
            args.push(format!("--project={project}"));
        }
        args
    }

    fn list_args(&self) -> Vec<String> {
        self.scoped(vec![
            "compute".into(),
            "instance-groups".into(),
            "managed".into(),
            "list-instances".into(),
            self.config.group.clone(),
            "--format=value(instance)".into(),
        ])
    }

    fn resize_args(&self, desired: u32) -> Vec<String> {
        self.scoped(vec![
            "compute".into(),
            "instance-groups".into(),
            "managed".into(),
            "resize".into(),
            self.config.group.clone(),
            format!("--size={desired}"),
        ])
    }

    fn describe_args(&self, node: &str) -> Vec<String> {
        self.scoped(vec![
            "compute".into(),
            "instances".into(),
            "describe".into(),
            node.to_string(),
            "--format=value(status)".into(),
        ])
    }

    fn ssh_args(&self, node: &str) -> Vec<String> {
        let mut args = self.scoped(vec![
            "compute".into(),
            "ssh".into(),
            node.to_string(),
        ]);
        args.push("--command".into());
        args.push(self.config.workload_command.clone());
        args
    }

    /// Run gcloud with `args`, returning stdout on a zero exit.
    async fn run(&self, args: &[String]) -> FleetResult<String> {
        let command = format!("{} {}", self.config.program, args.join(" "));
        debug!(%command, "running gcloud");

        let child = Command::new(&self.config.program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.config.command_timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(FleetError::Spawn {
                    program: self.config.program.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(FleetError::CallTimeout {
                    command,
                    timeout: self.config.command_timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(FleetError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl FleetBackend for GcloudBackend {
    fn name(&self) -> &str {
        "gcloud"
    }

    async fn list_nodes(&self) -> FleetResult<BTreeSet<NodeId>> {
        let stdout = self.run(&self.list_args()).await?;
        Ok(parse_instance_list(&stdout))
    }

    async fn resize(&self, desired: u32) -> FleetResult<()> {
        info!(
            group = %self.config.group,
            zone = %self.config.zone,
            size = desired,
            "resizing instance group"
        );
        self.run(&self.resize_args(desired)).await?;
        Ok(())
    }

    async fn describe_status(&self, node: &str) -> FleetResult<NodeStatus> {
        let stdout = self.run(&self.describe_args(node)).await?;
        parse_status(&stdout)
    }

    async fn start_workload(&self, node: &str) -> FleetResult<()> {
        self.run(&self.ssh_args(node)).await?;
        info!(node = %node, "workload started");
        Ok(())
    }
}

/// One instance name per line; blank lines are ignored.
fn parse_instance_list(stdout: &str) -> BTreeSet<NodeId> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Map a Compute Engine instance status onto the node lifecycle.
///
/// Empty output carries no status at all and is a parse error; an
/// unrecognised status is `Unreachable`.
fn parse_status(stdout: &str) -> FleetResult<NodeStatus> {
    let status = match stdout.trim() {
        "" => return Err(FleetError::Parse("empty instance status".to_string())),
        "RUNNING" => NodeStatus::Running,
        "PROVISIONING" | "STAGING" | "REPAIRING" => NodeStatus::Provisioning,
        "STOPPING" | "SUSPENDING" | "SUSPENDED" | "TERMINATED" => NodeStatus::Terminated,
        _ => NodeStatus::Unreachable,
    };
    Ok(status)
}
