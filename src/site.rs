use crate::cms::{AdminCredentials, DatabaseCredentials, Laravel, WordPress, WEB_ROOT};
use crate::compose::{site_stack, DB_CONTAINER, PROXY_NETWORK};
use crate::docker::Docker;
use crate::env_file::{generate_secret, read_env_file, render_env, EnvMap};
use crate::error::MeghError;
use crate::files::{
    ensure_dir, remove_dir, render, write_file, DEFAULT_INDEX, NGINX_COMMON_LOCATIONS,
    NGINX_COMMON_PHP, NGINX_CONF, NGINX_SITE_PHP, NGINX_SITE_STATIC,
};
use crate::hosts::HostsFile;
use crate::services::{root_password, Services};
use crate::settings::{Settings, ENV_FILE, STACK_FILE};
use crate::shell::CommandRunner;
use chrono::{SecondsFormat, Utc};
use clap::ValueEnum;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DB_HOST: &str = "mariadb";
const DB_SERVICE: &str = "mariadb";
const DEFAULT_ADMIN_USER: &str = "admin";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    #[default]
    Php,
    Wp,
    Laravel,
    Static,
}

impl SiteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteType::Php => "php",
            SiteType::Wp => "wp",
            SiteType::Laravel => "laravel",
            SiteType::Static => "static",
        }
    }

    pub fn needs_php(&self) -> bool {
        !matches!(self, SiteType::Static)
    }

    fn document_root(&self) -> String {
        match self {
            SiteType::Laravel => format!("{WEB_ROOT}/public"),
            _ => WEB_ROOT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PhpVersion {
    #[value(name = "7.2")]
    V7_2,
    #[value(name = "7.3")]
    V7_3,
    #[default]
    #[value(name = "7.4")]
    V7_4,
}

impl PhpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhpVersion::V7_2 => "7.2",
            PhpVersion::V7_3 => "7.3",
            PhpVersion::V7_4 => "7.4",
        }
    }
}

/// Result of a lifecycle step that may finish with recoverable problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Degraded(Vec<String>),
}

impl Outcome {
    fn from_warnings(warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            Outcome::Completed
        } else {
            Outcome::Degraded(warnings)
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Outcome::Completed => &[],
            Outcome::Degraded(warnings) => warnings,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub site_type: SiteType,
    pub php: PhpVersion,
    pub add_host: bool,
    pub admin_username: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateReport {
    pub name: String,
    pub site_type: SiteType,
    pub php_version: Option<String>,
    pub site_dir: PathBuf,
    pub url: String,
    pub database: Option<String>,
    pub host_added: bool,
    pub admin: Option<AdminCredentials>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SiteSummary {
    pub name: String,
    pub site_type: Option<String>,
    pub php_version: Option<String>,
    pub has_stack: bool,
    pub path: PathBuf,
}

/// Inverse of a completed create step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Undo {
    RemoveDir(PathBuf),
    ComposeDown(PathBuf),
    DropDatabase { database: String, user: String },
    RemoveHostEntry(String),
}

pub fn validate_name(name: &str) -> Result<(), MeghError> {
    let pattern = Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?$")?;
    if !pattern.is_match(name) || name.contains("..") {
        return Err(MeghError::Precondition(format!(
            "invalid site name '{name}': use letters, digits, '.' and '-', starting and ending with a letter or digit"
        )));
    }
    Ok(())
}

/// `demo.test` -> `demo_test`; used for both the database and its user.
pub fn database_identifier(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

/// Compose project for a site. Distinct for every valid name up to case.
pub fn project_name(name: &str) -> String {
    name.to_ascii_lowercase().replace('.', "_")
}

/// Refuses only names that would leave the sites root.
fn validate_existing_name(name: &str) -> Result<(), MeghError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(MeghError::Precondition(format!("invalid site name '{name}'")));
    }
    Ok(())
}

pub fn vhost_config(name: &str, site_type: SiteType) -> String {
    let template = if site_type.needs_php() {
        NGINX_SITE_PHP
    } else {
        NGINX_SITE_STATIC
    };
    let root = site_type.document_root();
    render(template, &[("SERVER_NAME", name), ("DOCUMENT_ROOT", &root)])
}

pub struct SiteManager<'a, R: CommandRunner> {
    runner: &'a R,
    settings: &'a Settings,
    docker: Docker<'a, R>,
}

impl<'a, R: CommandRunner> SiteManager<'a, R> {
    pub fn new(runner: &'a R, settings: &'a Settings) -> Self {
        SiteManager {
            runner,
            settings,
            docker: Docker::new(runner, settings),
        }
    }

    fn services(&self) -> Services<'_, R> {
        Services::new(&self.docker, self.settings)
    }

    fn hosts(&self) -> HostsFile<'a, R> {
        HostsFile::new(&self.settings.hosts_file, self.runner)
    }

    fn existing_site_dir(&self, name: &str) -> Result<PathBuf, MeghError> {
        validate_existing_name(name)?;
        let dir = self.settings.site_dir(name);
        if !dir.is_dir() {
            return Err(MeghError::Precondition(format!(
                "site {name} does not exist at {}",
                dir.display()
            )));
        }
        Ok(dir)
    }

    /// Provisions a new site. Every precondition is checked before the first
    /// mutation; a failing step unwinds the steps already taken.
    pub fn create(&self, name: &str, options: &CreateOptions) -> Result<CreateReport, MeghError> {
        validate_name(name)?;
        let site_type = options.site_type;
        let site_dir = self.settings.site_dir(name);
        if site_dir.exists() {
            return Err(MeghError::Precondition(format!(
                "site {name} already exists at {}",
                site_dir.display()
            )));
        }
        if let Some(other) = self.project_owner(name)? {
            return Err(MeghError::Precondition(format!(
                "site {other} already uses compose project {}",
                project_name(name)
            )));
        }

        self.docker.ensure_daemon()?;
        let services = self.services();
        if !services.proxy_ready()? {
            return Err(MeghError::Precondition(format!(
                "network {PROXY_NETWORK} does not exist; run `megh start` first"
            )));
        }
        let root = if site_type.needs_php() {
            if !services.database_ready()? {
                return Err(MeghError::Precondition(format!(
                    "database container {DB_CONTAINER} is not running; run `megh start` first"
                )));
            }
            Some(root_password(self.settings)?)
        } else {
            None
        };

        let mut undo = Vec::new();
        match self.provision(name, site_type, options, &site_dir, root.as_deref(), &mut undo) {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!(site = name, "create failed, rolling back {} step(s)", undo.len());
                self.rollback(undo, root.as_deref());
                Err(err)
            }
        }
    }

    fn project_owner(&self, name: &str) -> Result<Option<String>, MeghError> {
        let project = project_name(name);
        Ok(self
            .list()?
            .into_iter()
            .map(|site| site.name)
            .find(|other| other != name && project_name(other) == project))
    }

    fn provision(
        &self,
        name: &str,
        site_type: SiteType,
        options: &CreateOptions,
        site_dir: &Path,
        root: Option<&str>,
        undo: &mut Vec<Undo>,
    ) -> Result<CreateReport, MeghError> {
        let owner = &self.settings.identity;
        let php = site_type.needs_php().then(|| options.php.as_str());

        info!(site = name, "creating site directories");
        ensure_dir(site_dir, owner)?;
        undo.push(Undo::RemoveDir(site_dir.to_path_buf()));
        for sub in [
            "app",
            "conf/nginx/common",
            "data/logs/nginx",
            "data/backups",
            "data/nginx-cache",
        ] {
            ensure_dir(&site_dir.join(sub), owner)?;
        }

        info!(site = name, "writing site environment");
        let mut envs = EnvMap::new();
        envs.insert("VHOST_NAME".to_string(), name.to_string());
        envs.insert("SITE_TYPE".to_string(), site_type.as_str().to_string());
        envs.insert(
            "MEGH_CREATED_AT".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        let db = php.map(|version| {
            envs.insert("PHP_VERSION".to_string(), version.to_string());
            let identifier = database_identifier(name);
            DatabaseCredentials {
                name: identifier.clone(),
                user: identifier,
                password: generate_secret(),
                host: DB_HOST.to_string(),
            }
        });
        if let Some(db) = &db {
            envs.insert("MYSQL_HOST".to_string(), db.host.clone());
            envs.insert("MYSQL_DATABASE".to_string(), db.name.clone());
            envs.insert("MYSQL_USER".to_string(), db.user.clone());
            envs.insert("MYSQL_PASSWORD".to_string(), db.password.clone());
        }
        write_file(&site_dir.join(ENV_FILE), &render_env(&envs), owner)?;

        info!(site = name, "writing nginx configuration");
        let nginx_dir = site_dir.join("conf").join("nginx");
        write_file(&nginx_dir.join("nginx.conf"), NGINX_CONF, owner)?;
        write_file(&nginx_dir.join("common").join("locations.conf"), NGINX_COMMON_LOCATIONS, owner)?;
        if php.is_some() {
            write_file(&nginx_dir.join("common").join("php.conf"), NGINX_COMMON_PHP, owner)?;
        }
        write_file(&nginx_dir.join("default.conf"), &vhost_config(name, site_type), owner)?;

        match site_type {
            SiteType::Php => {
                let index = render(DEFAULT_INDEX, &[("SERVER_NAME", name)]);
                write_file(&site_dir.join("app").join("index.php"), &index, owner)?;
            }
            SiteType::Static => {
                write_file(
                    &site_dir.join("app").join("index.html"),
                    &format!("<h1>{name}</h1>\n"),
                    owner,
                )?;
            }
            SiteType::Wp | SiteType::Laravel => {}
        }

        info!(site = name, "writing docker-compose.yml");
        let stack = site_stack(&self.settings.images, &project_name(name), php);
        write_file(&site_dir.join(STACK_FILE), &stack.to_yaml()?, owner)?;

        info!(site = name, "starting the site stack");
        undo.push(Undo::ComposeDown(site_dir.to_path_buf()));
        self.docker.compose_up(site_dir)?;

        if let (Some(db), Some(root)) = (&db, root) {
            info!(site = name, database = %db.name, "creating database");
            undo.push(Undo::DropDatabase {
                database: db.name.clone(),
                user: db.user.clone(),
            });
            self.run_sql(root, &create_database_sql(db))?;
        }

        let mut warnings = Vec::new();
        let mut host_added = false;
        if options.add_host {
            let hosts = self.hosts();
            if hosts.add(name)? {
                undo.push(Undo::RemoveHostEntry(name.to_string()));
                host_added = true;
            } else {
                let message = format!(
                    "hosts entry for {name} already exists in {}",
                    self.settings.hosts_file.display()
                );
                warn!("{message}");
                warnings.push(message);
            }
        }

        let url = format!("http://{name}");
        let mut admin = None;
        match (site_type, &db) {
            (SiteType::Wp, Some(db)) => {
                let credentials = AdminCredentials {
                    url: url.clone(),
                    username: options
                        .admin_username
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string()),
                    password: options.admin_password.clone().unwrap_or_else(generate_secret),
                    email: options
                        .admin_email
                        .clone()
                        .unwrap_or_else(|| format!("admin@{name}")),
                };
                let wp = WordPress::new(&self.docker, site_dir);
                wp.download()?;
                wp.generate_config(db)?;
                wp.install(name, &credentials)?;
                admin = Some(credentials);
            }
            (SiteType::Laravel, Some(db)) => {
                let laravel = Laravel::new(&self.docker, site_dir);
                laravel.download()?;
                laravel.configure_env(db, owner)?;
            }
            _ => {}
        }

        info!(site = name, "site created");
        Ok(CreateReport {
            name: name.to_string(),
            site_type,
            php_version: php.map(ToString::to_string),
            site_dir: site_dir.to_path_buf(),
            url,
            database: db.map(|db| db.name),
            host_added,
            admin,
            warnings,
        })
    }

    fn rollback(&self, undo: Vec<Undo>, root: Option<&str>) {
        for step in undo.into_iter().rev() {
            let result = match &step {
                Undo::RemoveHostEntry(name) => self.hosts().remove(name).map(|_| ()),
                Undo::DropDatabase { database, user } => match root {
                    Some(root) => self.run_sql(root, &drop_database_sql(database, user)),
                    None => Ok(()),
                },
                Undo::ComposeDown(dir) => self.docker.compose_down(dir),
                Undo::RemoveDir(dir) => remove_dir(dir),
            };
            match result {
                Ok(()) => info!(step = ?step, "rolled back"),
                Err(err) => warn!(step = ?step, "rollback step failed: {err}"),
            }
        }
    }

    fn run_sql(&self, root_password: &str, sql: &str) -> Result<(), MeghError> {
        self.docker.exec_in_container(
            &self.settings.home,
            DB_SERVICE,
            "root",
            [
                "mysql".to_string(),
                "-h".to_string(),
                DB_HOST.to_string(),
                "-u".to_string(),
                "root".to_string(),
                format!("-p{root_password}"),
                "-e".to_string(),
                sql.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Brings the site stack up. Compose failures are reported, not raised.
    pub fn enable(&self, name: &str) -> Result<Outcome, MeghError> {
        let dir = self.existing_site_dir(name)?;
        info!(site = name, "enabling site");
        Ok(match self.docker.compose_up(&dir) {
            Ok(()) => Outcome::Completed,
            Err(err) => {
                warn!(site = name, "enable failed: {err}");
                Outcome::Degraded(vec![format!("{name}: {err}")])
            }
        })
    }

    pub fn disable(&self, name: &str) -> Result<Outcome, MeghError> {
        let dir = self.existing_site_dir(name)?;
        info!(site = name, "disabling site");
        Ok(match self.docker.compose_down(&dir) {
            Ok(()) => Outcome::Completed,
            Err(err) => {
                warn!(site = name, "disable failed: {err}");
                Outcome::Degraded(vec![format!("{name}: {err}")])
            }
        })
    }

    /// Drops the site database, removes the stack and the directory, then
    /// the hosts entry. Only the hosts step is allowed to fail softly.
    pub fn delete(&self, name: &str) -> Result<Outcome, MeghError> {
        let dir = self.existing_site_dir(name)?;
        let env_path = dir.join(ENV_FILE);
        let envs = if env_path.is_file() {
            read_env_file(&env_path)?
        } else {
            EnvMap::new()
        };
        let mut warnings = Vec::new();

        match envs.get("MYSQL_DATABASE").filter(|db| !db.is_empty()) {
            Some(database) => {
                let user = envs
                    .get("MYSQL_USER")
                    .filter(|user| !user.is_empty())
                    .cloned()
                    .unwrap_or_else(|| database.clone());
                info!(site = name, database = %database, "dropping database");
                let root = root_password(self.settings)?;
                self.run_sql(&root, &drop_database_sql(database, &user))?;
            }
            None => info!(site = name, "no database recorded, skipping drop"),
        }

        if dir.join(STACK_FILE).is_file() {
            info!(site = name, "removing the site stack");
            self.docker.compose_down(&dir)?;
        } else {
            let message = format!("{name}: no {STACK_FILE}, skipped compose down");
            warn!("{message}");
            warnings.push(message);
        }

        info!(site = name, dir = %dir.display(), "removing site directory");
        remove_dir(&dir)?;

        if let Err(err) = self.hosts().remove(name) {
            let message = format!("{name}: could not remove hosts entry: {err}");
            warn!("{message}");
            warnings.push(message);
        }

        info!(site = name, "site deleted");
        Ok(Outcome::from_warnings(warnings))
    }

    /// Every directory under the sites root, with what its `.env` records.
    pub fn list(&self) -> Result<Vec<SiteSummary>, MeghError> {
        let root = &self.settings.sites_root;
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut sites = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(ToString::to_string) else {
                continue;
            };
            let env_path = path.join(ENV_FILE);
            let envs = if env_path.is_file() {
                read_env_file(&env_path)?
            } else {
                EnvMap::new()
            };
            sites.push(SiteSummary {
                name,
                site_type: envs.get("SITE_TYPE").cloned(),
                php_version: envs.get("PHP_VERSION").cloned(),
                has_stack: path.join(STACK_FILE).is_file(),
                path,
            });
        }
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }
}

fn create_database_sql(db: &DatabaseCredentials) -> String {
    format!(
        "CREATE DATABASE `{name}`; CREATE USER '{user}'@'%' IDENTIFIED BY '{password}'; GRANT ALL PRIVILEGES ON `{name}`.* TO '{user}'@'%'; FLUSH PRIVILEGES;",
        name = db.name,
        user = db.user,
        password = db.password.replace('\'', "''"),
    )
}

fn drop_database_sql(database: &str, user: &str) -> String {
    format!("DROP DATABASE IF EXISTS `{database}`; DROP USER IF EXISTS '{user}'@'%'; FLUSH PRIVILEGES;")
}
