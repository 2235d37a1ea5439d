use crate::error::MeghError;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";
pub const STACK_FILE: &str = "docker-compose.yml";
pub const ENV_FILE: &str = ".env";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub paths: PathsConfig,
    pub docker: DockerConfig,
    pub images: Images,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub sites_root: String,
    pub hosts_file: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DockerConfig {
    pub compose_command: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Images {
    pub proxy: String,
    pub database: String,
    pub nginx: String,
    pub php: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: 1,
            paths: PathsConfig::default(),
            docker: DockerConfig::default(),
            images: Images::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            sites_root: String::new(),
            hosts_file: "/etc/hosts".to_string(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            compose_command: "docker compose".to_string(),
        }
    }
}

impl Default for Images {
    fn default() -> Self {
        Images {
            proxy: "jwilder/nginx-proxy:alpine".to_string(),
            database: "mariadb:10.3".to_string(),
            nginx: "nginx:alpine".to_string(),
            php: "tareq1988/php-wp".to_string(),
        }
    }
}

/// Who the tool acts on behalf of. Under `sudo` this is the original user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub elevated: bool,
}

impl Identity {
    pub fn from_env() -> Self {
        let sudo_user = env::var("SUDO_USER").ok().filter(|u| !u.trim().is_empty());
        let elevated = sudo_user.is_some();
        let user = sudo_user
            .or_else(|| env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string());
        let parse_id = |key: &str| env::var(key).ok().and_then(|v| v.trim().parse::<u32>().ok());
        Identity {
            user,
            uid: if elevated { parse_id("SUDO_UID") } else { None },
            gid: if elevated { parse_id("SUDO_GID") } else { None },
            elevated,
        }
    }

    /// The user to drop back to for child processes, if the process is elevated.
    pub fn drop_to(&self) -> Option<&str> {
        if self.elevated {
            Some(self.user.as_str())
        } else {
            None
        }
    }
}

/// Process-wide settings, resolved once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub home: PathBuf,
    pub sites_root: PathBuf,
    pub hosts_file: PathBuf,
    pub compose_command: Vec<String>,
    pub images: Images,
    pub identity: Identity,
}

impl Settings {
    pub fn resolve(home_override: Option<&Path>) -> Result<Settings, MeghError> {
        let home = resolve_home(home_override)?;
        let config = read_config(&home.join(CONFIG_FILE))?;
        let user_home = required_home_dir()?;
        Settings::from_config(home, &config, &user_home, Identity::from_env())
    }

    pub fn from_config(
        home: PathBuf,
        config: &Config,
        user_home: &Path,
        identity: Identity,
    ) -> Result<Settings, MeghError> {
        let sites_root = match env::var("MEGH_SITES_DIR") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ if !config.paths.sites_root.trim().is_empty() => {
                expand_home_path(&config.paths.sites_root, user_home)
            }
            _ => default_sites_root_for_os(env::consts::OS, user_home)?,
        };
        let hosts_file = match env::var("MEGH_HOSTS_FILE") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => expand_home_path(&config.paths.hosts_file, user_home),
        };
        let compose_command: Vec<String> = config
            .docker
            .compose_command
            .split_whitespace()
            .map(ToString::to_string)
            .collect();
        if compose_command.is_empty() {
            return Err(MeghError::Config(
                "docker.compose_command must be non-empty".to_string(),
            ));
        }
        Ok(Settings {
            home,
            sites_root,
            hosts_file,
            compose_command,
            images: config.images.clone(),
            identity,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILE)
    }

    pub fn global_stack_file(&self) -> PathBuf {
        self.home.join(STACK_FILE)
    }

    pub fn global_env_file(&self) -> PathBuf {
        self.home.join(ENV_FILE)
    }

    pub fn site_dir(&self, name: &str) -> PathBuf {
        self.sites_root.join(name)
    }
}

fn resolve_home(override_path: Option<&Path>) -> Result<PathBuf, MeghError> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = env::var("MEGH_HOME") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(required_home_dir()?.join(".megh"))
}

pub fn required_home_dir() -> Result<PathBuf, MeghError> {
    let home = home_dir().ok_or_else(|| {
        MeghError::Config("unable to resolve $HOME; set HOME to an existing directory".to_string())
    })?;
    if !home.is_absolute() {
        return Err(MeghError::Config(format!(
            "resolved HOME path is not absolute: {}",
            home.display()
        )));
    }
    Ok(home)
}

pub fn default_sites_root_for_os(os: &str, home: &Path) -> Result<PathBuf, MeghError> {
    match os {
        "linux" => Ok(home.join("megh-sites")),
        "macos" => Ok(home.join("Sites").join("megh")),
        other => Err(MeghError::Config(format!(
            "unsupported host operating system '{other}' for the default sites root; set paths.sites_root in config.yaml"
        ))),
    }
}

pub fn expand_home_path(input: &str, home: &Path) -> PathBuf {
    let trimmed = input.trim();
    if trimmed == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(trimmed)
}

pub fn read_config_from_str(content: &str) -> Result<Config, MeghError> {
    let config: Config = serde_yaml::from_str(content)?;
    if config.version != 1 {
        return Err(MeghError::Config(format!(
            "unsupported config version {}; expected 1",
            config.version
        )));
    }
    Ok(config)
}

pub fn read_config(path: &Path) -> Result<Config, MeghError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content)
        .map_err(|err| MeghError::Config(format!("{}: {}", path.display(), err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn identity() -> Identity {
        Identity {
            user: "dev".to_string(),
            uid: None,
            gid: None,
            elevated: false,
        }
    }

    #[test]
    fn config_defaults_apply() {
        let cfg = read_config_from_str("version: 1").expect("config");
        assert_eq!(cfg.images.database, "mariadb:10.3");
        assert_eq!(cfg.paths.hosts_file, "/etc/hosts");
        assert_eq!(cfg.docker.compose_command, "docker compose");
    }

    #[test]
    fn config_unknown_field_errors() {
        let result = read_config_from_str("version: 1\nsurprise: true\n");
        assert!(result.is_err());
    }

    #[test]
    fn config_rejects_other_versions() {
        let err = read_config_from_str("version: 7").expect_err("version");
        assert!(err.to_string().contains("unsupported config version 7"));
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let dir = tempdir().unwrap();
        let cfg = read_config(&dir.path().join("config.yaml")).expect("defaults");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn sites_root_follows_os_convention() {
        let home = PathBuf::from("/home/dev");
        assert_eq!(
            default_sites_root_for_os("linux", &home).unwrap(),
            PathBuf::from("/home/dev/megh-sites")
        );
        assert_eq!(
            default_sites_root_for_os("macos", &home).unwrap(),
            PathBuf::from("/home/dev/Sites/megh")
        );
        assert!(default_sites_root_for_os("windows", &home).is_err());
    }

    #[test]
    fn configured_paths_expand_tilde() {
        let mut cfg = Config::default();
        cfg.paths.sites_root = "~/code/sites".to_string();
        cfg.paths.hosts_file = "~/hosts".to_string();
        cfg.docker.compose_command = "docker-compose".to_string();
        let settings = Settings::from_config(
            PathBuf::from("/tmp/megh-home"),
            &cfg,
            Path::new("/home/dev"),
            identity(),
        )
        .expect("settings");
        if env::var("MEGH_SITES_DIR").is_err() {
            assert_eq!(settings.sites_root, PathBuf::from("/home/dev/code/sites"));
        }
        if env::var("MEGH_HOSTS_FILE").is_err() {
            assert_eq!(settings.hosts_file, PathBuf::from("/home/dev/hosts"));
        }
        assert_eq!(settings.compose_command, vec!["docker-compose".to_string()]);
        assert_eq!(
            settings.site_dir("demo.test"),
            settings.sites_root.join("demo.test")
        );
    }

    #[test]
    fn empty_compose_command_is_rejected() {
        let mut cfg = Config::default();
        cfg.docker.compose_command = "  ".to_string();
        let err = Settings::from_config(
            PathBuf::from("/tmp/megh-home"),
            &cfg,
            Path::new("/home/dev"),
            identity(),
        )
        .expect_err("empty compose command");
        assert!(err.to_string().contains("compose_command"));
    }

    #[test]
    fn only_elevated_identity_drops_privileges() {
        let plain = identity();
        assert_eq!(plain.drop_to(), None);
        let elevated = Identity {
            elevated: true,
            ..identity()
        };
        assert_eq!(elevated.drop_to(), Some("dev"));
    }
}
