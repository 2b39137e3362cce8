//! `docker inspect` and `docker restart` for the containers running the nodes.

use std::fmt;
use std::process::Output;

use tokio::process::Command;

const INSPECT_IP_FORMAT: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}";

#[derive(Debug)]
pub enum DockerError {
    Spawn { command: String, error: std::io::Error, },
    Failed { command: String, code: Option<i32>, stderr: String, },
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DockerError::Spawn { command, .. } => write!(f, "failed to run '{}'", command),
            DockerError::Failed { command, code: Some(code), stderr } => write!(f, "command '{}' returned with error (code {}): {}", command, code, stderr.trim_end()),
            DockerError::Failed { command, code: None, .. } => write!(f, "command '{}' was killed by a signal", command),
        }
    }
}

impl std::error::Error for DockerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockerError::Spawn { error, .. } => Some(error),
            DockerError::Failed { .. } => None,
        }
    }
}

/// Runs `docker` with `args`; exit code 1 (unknown container) yields `Ok(None)`.
async fn docker(args: &[&str]) -> Result<Option<String>, DockerError> {
    let command = format!("docker {}", args.join(" "));
    let output = Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|error| DockerError::Spawn { command: command.clone(), error, })?;
    interpret(command, output)
}

fn interpret(command: String, output: Output) -> Result<Option<String>, DockerError> {
    match output.status.code() {
        Some(0) => Ok(first_line(&output.stdout)),
        Some(1) => Ok(None),
        code => Err(DockerError::Failed { command, code, stderr: String::from_utf8_lossy(&output.stderr).into_owned(), }),
    }
}

fn first_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
}

/// Returns the IP address of `container` on its docker network(s).
pub async fn container_ip(container: &str) -> Result<Option<String>, DockerError> {
    docker(&["inspect", "-f", INSPECT_IP_FORMAT, container]).await
}

/// Restarts `container`, returning its name as echoed by docker.
pub async fn restart(container: &str) -> Result<Option<String>, DockerError> {
    let restarted = docker(&["restart", container]).await?;
    if let Some(name) = &restarted {
        tracing::info!("RESTARTED: {}", name);
    }
    Ok(restarted)
}
