use serde::Serialize;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeghError {
    #[error("config error: {0}")]
    Config(String),
    #[error("{0}")]
    Precondition(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),
    #[error("process error: {0}")]
    Process(String),
    #[error("process error: {message}")]
    ProcessDetailed {
        message: String,
        details: ProcessErrorDetails,
    },
}

impl MeghError {
    pub fn details(&self) -> Option<&ProcessErrorDetails> {
        match self {
            MeghError::ProcessDetailed { details, .. } => Some(details),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessErrorDetails {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

pub fn spawn_error_details(err: &io::Error, command: &str) -> ProcessErrorDetails {
    if err.kind() == io::ErrorKind::NotFound {
        let program = command.split_whitespace().next().unwrap_or(command);
        return ProcessErrorDetails {
            error_code: "command_not_found".to_string(),
            hint: Some(format!("Install `{program}` and ensure it is on your PATH.")),
            command: Some(command.to_string()),
            raw_output: None,
        };
    }
    ProcessErrorDetails {
        error_code: "process_command_failed".to_string(),
        hint: None,
        command: Some(command.to_string()),
        raw_output: None,
    }
}

/// Maps captured output of a failed docker/compose/wp-cli call to an error code and hint.
pub fn classify_command_failure(output: &str) -> (String, Option<String>) {
    let lower = output.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("error during connect")
        || lower.starts_with("error response from daemon: dial")
    {
        return (
            "docker_daemon_unreachable".to_string(),
            Some("Docker daemon is unreachable. Start Docker Desktop (or dockerd) and retry.".to_string()),
        );
    }

    if lower.contains("unknown command: docker compose")
        || lower.contains("is not a docker command")
        || lower.contains("docker-compose: command not found")
    {
        return (
            "docker_compose_unavailable".to_string(),
            Some(
                "Docker Compose is unavailable. Install it or set docker.compose_command in config.yaml."
                    .to_string(),
            ),
        );
    }

    if lower.contains("port is already allocated")
        || lower.contains("address already in use")
    {
        return (
            "docker_port_conflict".to_string(),
            Some(
                "Ports 80/443/3306 must be free for the global services. Stop the conflicting process and retry."
                    .to_string(),
            ),
        );
    }

    if lower.contains("network") && lower.contains("not found") {
        return (
            "docker_network_missing".to_string(),
            Some("Shared networks are missing. Run `megh start` first.".to_string()),
        );
    }

    if lower.contains("pull access denied")
        || lower.contains("unauthorized")
        || lower.contains("authentication required")
    {
        return (
            "docker_registry_auth".to_string(),
            Some("Image pull was denied. Check the image names in config.yaml or `docker login`.".to_string()),
        );
    }

    if lower.contains("access denied for user") || lower.contains("error 1396") {
        return (
            "database_access_denied".to_string(),
            Some("The database rejected the statement. Check MYSQL_ROOT_PASSWORD in the global .env.".to_string()),
        );
    }

    ("process_command_failed".to_string(), None)
}
