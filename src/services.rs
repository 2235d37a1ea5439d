use crate::compose::{global_stack, DB_CONTAINER, DB_NETWORK, PROXY_CONTAINER, PROXY_NETWORK};
use crate::docker::Docker;
use crate::env_file::{generate_secret, parse_env, read_env_file, render_env};
use crate::error::MeghError;
use crate::files::{ensure_dir, write_file};
use crate::settings::{Config, Settings, STACK_FILE};
use crate::shell::CommandRunner;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub const ROOT_PASSWORD_KEY: &str = "MYSQL_ROOT_PASSWORD";

const NGINX_PROXY_DIRS: [&str; 5] = ["certs", "conf.d", "dhparam", "htpasswd", "vhost.d"];

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub home: PathBuf,
    pub sites_root: PathBuf,
    pub config_created: bool,
    pub root_password_generated: bool,
}

/// Lays out the home directory, the global stack and the sites root. Safe to
/// re-run: the config file and the database root password are only written once.
pub fn install(settings: &Settings) -> Result<InstallReport, MeghError> {
    let owner = &settings.identity;

    info!(home = %settings.home.display(), "creating configuration directory");
    ensure_dir(&settings.home, owner)?;

    info!(sites_root = %settings.sites_root.display(), "creating sites directory");
    ensure_dir(&settings.sites_root, owner)?;

    info!("creating nginx proxy directories");
    for dir in NGINX_PROXY_DIRS {
        ensure_dir(&settings.home.join("nginx").join(dir), owner)?;
    }
    ensure_dir(&settings.home.join("data").join("mysql"), owner)?;

    info!("writing global docker-compose.yml");
    let stack = global_stack(&settings.images);
    write_file(&settings.global_stack_file(), &stack.to_yaml()?, owner)?;

    let env_path = settings.global_env_file();
    let mut envs = if env_path.exists() {
        read_env_file(&env_path)?
    } else {
        Default::default()
    };
    let root_password_generated = match envs.get(ROOT_PASSWORD_KEY) {
        Some(value) if !value.is_empty() => false,
        _ => {
            envs.insert(ROOT_PASSWORD_KEY.to_string(), generate_secret());
            write_file(&env_path, &render_env(&envs), owner)?;
            true
        }
    };

    let config_path = settings.config_path();
    let config_created = !config_path.exists();
    if config_created {
        write_file(&config_path, &serde_yaml::to_string(&Config::default())?, owner)?;
    }

    Ok(InstallReport {
        home: settings.home.clone(),
        sites_root: settings.sites_root.clone(),
        config_created,
        root_password_generated,
    })
}

pub fn root_password(settings: &Settings) -> Result<String, MeghError> {
    let path = settings.global_env_file();
    let content = fs::read_to_string(&path).map_err(|err| {
        MeghError::Precondition(format!(
            "cannot read {}: {err}; run `megh install` first",
            path.display()
        ))
    })?;
    parse_env(&content)
        .remove(ROOT_PASSWORD_KEY)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            MeghError::Precondition(format!(
                "{ROOT_PASSWORD_KEY} missing from {}; run `megh install` again",
                path.display()
            ))
        })
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComponentState {
    pub kind: String,
    pub name: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServicesStatus {
    pub docker_installed: bool,
    pub daemon_reachable: bool,
    pub components: Vec<ComponentState>,
}

pub struct Services<'a, R: CommandRunner> {
    docker: &'a Docker<'a, R>,
    settings: &'a Settings,
}

impl<'a, R: CommandRunner> Services<'a, R> {
    pub fn new(docker: &'a Docker<'a, R>, settings: &'a Settings) -> Self {
        Services { docker, settings }
    }

    pub fn start(&self) -> Result<(), MeghError> {
        let stack_file = self.settings.global_stack_file();
        if !stack_file.exists() {
            return Err(MeghError::Precondition(format!(
                "global stack {} not found; run `megh install` first",
                stack_file.display()
            )));
        }
        info!("starting the global services");
        self.docker.compose_up(&self.settings.home)
    }

    pub fn stop(&self) -> Result<(), MeghError> {
        info!("stopping the global services");
        self.docker.compose_down(&self.settings.home)
    }

    /// Creates whichever shared network is missing; existing ones are left alone.
    pub fn start_networks(&self) -> Result<(), MeghError> {
        for network in [PROXY_NETWORK, DB_NETWORK] {
            if self.docker.network_exists(network)? {
                info!(network, "network already exists");
                continue;
            }
            info!(network, "creating network");
            self.docker.create_network(network)?;
        }
        Ok(())
    }

    pub fn stop_networks(&self) -> Result<(), MeghError> {
        for network in [PROXY_NETWORK, DB_NETWORK] {
            info!(network, "removing network");
            self.docker.remove_network(network)?;
        }
        Ok(())
    }

    /// Readiness of the shared services for sites that need a database.
    pub fn database_ready(&self) -> Result<bool, MeghError> {
        Ok(self.docker.network_exists(DB_NETWORK)? && self.docker.container_running(DB_CONTAINER)?)
    }

    pub fn proxy_ready(&self) -> Result<bool, MeghError> {
        self.docker.network_exists(PROXY_NETWORK)
    }

    /// Names of site directories under the sites root that carry a stack file.
    pub fn sites(&self) -> Result<Vec<String>, MeghError> {
        let root = &self.settings.sites_root;
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.path().join(STACK_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn status(&self, docker_installed: bool) -> Result<ServicesStatus, MeghError> {
        let daemon_reachable = docker_installed && self.docker.daemon_reachable()?;
        let mut components = Vec::new();
        for name in [PROXY_CONTAINER, DB_CONTAINER] {
            components.push(ComponentState {
                kind: "container".to_string(),
                name: name.to_string(),
                ok: daemon_reachable && self.docker.container_running(name)?,
            });
        }
        for name in [PROXY_NETWORK, DB_NETWORK] {
            components.push(ComponentState {
                kind: "network".to_string(),
                name: name.to_string(),
                ok: daemon_reachable && self.docker.network_exists(name)?,
            });
        }
        Ok(ServicesStatus {
            docker_installed,
            daemon_reachable,
            components,
        })
    }
}
