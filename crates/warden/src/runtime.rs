//! Container runtime and reverse proxy collaborator contracts.
//!
//! The orchestrator never talks to Docker or nginx directly; it goes
//! through these traits. [`ComposeRuntime`] is the production
//! implementation, shelling out to `docker compose`, and
//! [`ComposeProxyHandle`] drives nginx inside the proxy service with
//! `exec` (config test and reload signal).

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Collaborator command errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// Captured output of a successful command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Per-service health as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealth {
    /// Running and (if a healthcheck exists) passing it
    Healthy,
    /// Running but failing its healthcheck
    Unhealthy,
    /// Healthcheck still in its start period
    Starting,
    /// Not running, or health cannot be determined
    Unknown,
}

/// Container runtime collaborator: start/stop/restart named services,
/// report their health, and exec commands inside them.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, service: &str) -> Result<(), RuntimeError>;
    async fn stop(&self, service: &str) -> Result<(), RuntimeError>;
    async fn restart(&self, service: &str) -> Result<(), RuntimeError>;
    async fn service_health(&self, service: &str) -> Result<ServiceHealth, RuntimeError>;
    async fn exec(&self, service: &str, command: &[&str]) -> Result<CommandOutput, RuntimeError>;
}

/// Reverse proxy collaborator: validate the placed configuration and
/// reload without dropping connections.
#[async_trait]
pub trait ProxyHandle: Send + Sync {
    async fn validate_config(&self) -> Result<(), RuntimeError>;
    async fn reload(&self) -> Result<(), RuntimeError>;
}

/// `docker compose` implementation of [`ContainerRuntime`].
pub struct ComposeRuntime {
    /// Compose project directory
    project_dir: PathBuf,
    /// Compose file within the project directory
    compose_file: String,
    /// Runtime binary ("docker"); overridable for tests
    program: String,
}

impl ComposeRuntime {
    pub fn new(project_dir: impl Into<PathBuf>, compose_file: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            compose_file: compose_file.into(),
            program: "docker".to_string(),
        }
    }

    /// Override the runtime binary (tests).
    #[cfg(test)]
    fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Run `docker <args>` in the project directory.
    async fn run(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        let command_line = format!("{} {}", self.program, args.join(" "));
        trace!(command = %command_line, "Running runtime command");

        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .current_dir(&self.project_dir)
            .output()
            .await
            .map_err(|e| RuntimeError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: command_line,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }

    /// Run `docker compose -f <file> <args>`.
    async fn compose(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        let mut full = vec!["compose", "-f", self.compose_file.as_str()];
        full.extend_from_slice(args);
        self.run(&full).await
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn start(&self, service: &str) -> Result<(), RuntimeError> {
        debug!(service = %service, "Starting service");
        self.compose(&["up", "-d", service]).await?;
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), RuntimeError> {
        debug!(service = %service, "Stopping service");
        self.compose(&["stop", service]).await?;
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<(), RuntimeError> {
        info!(service = %service, "Restarting service");
        self.compose(&["restart", service]).await?;
        Ok(())
    }

    async fn service_health(&self, service: &str) -> Result<ServiceHealth, RuntimeError> {
        // Resolve the container, then ask the engine for its health.
        let output = self.compose(&["ps", "-q", service]).await?;
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Ok(ServiceHealth::Unknown);
        }

        let output = self
            .run(&[
                "inspect",
                "-f",
                "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}",
                &container_id,
            ])
            .await?;
        let status = String::from_utf8_lossy(&output.stdout).trim().to_string();

        Ok(parse_health(&status))
    }

    async fn exec(&self, service: &str, command: &[&str]) -> Result<CommandOutput, RuntimeError> {
        let mut args = vec!["exec", "-T", service];
        args.extend_from_slice(command);
        let output = self.compose(&args).await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Map an engine status string to [`ServiceHealth`].
///
/// Containers without a healthcheck report their run state instead, so
/// "running" counts as healthy.
fn parse_health(status: &str) -> ServiceHealth {
    match status {
        "healthy" | "running" => ServiceHealth::Healthy,
        "unhealthy" | "exited" | "dead" => ServiceHealth::Unhealthy,
        "starting" | "restarting" | "created" => ServiceHealth::Starting,
        _ => ServiceHealth::Unknown,
    }
}

/// Reverse proxy handle over `docker compose exec` into the proxy service.
pub struct ComposeProxyHandle {
    runtime: std::sync::Arc<ComposeRuntime>,
    service: String,
}

impl ComposeProxyHandle {
    pub fn new(runtime: std::sync::Arc<ComposeRuntime>, service: impl Into<String>) -> Self {
        Self {
            runtime,
            service: service.into(),
        }
    }
}

#[async_trait]
impl ProxyHandle for ComposeProxyHandle {
    async fn validate_config(&self) -> Result<(), RuntimeError> {
        debug!(service = %self.service, "Validating proxy configuration");
        self.runtime.exec(&self.service, &["nginx", "-t"]).await?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), RuntimeError> {
        info!(service = %self.service, "Reloading proxy");
        self.runtime
            .exec(&self.service, &["nginx", "-s", "reload"])
            .await?;
        Ok(())
    }
}
