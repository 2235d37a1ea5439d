use crate::docker::Docker;
use crate::env_file::set_values;
use crate::error::MeghError;
use crate::files::{write_file, WORDPRESS_EXTRA_PHP};
use crate::settings::Identity;
use crate::shell::{shell_single_quote, CommandRunner};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const PHP_SERVICE: &str = "php";
pub const WEB_USER: &str = "www-data";
pub const WEB_ROOT: &str = "/var/www/html";

#[derive(Debug, Clone)]
pub struct DatabaseCredentials {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdminCredentials {
    pub url: String,
    pub username: String,
    pub password: String,
    pub email: String,
}

/// WordPress bootstrap through wp-cli inside the site's php container.
pub struct WordPress<'a, R: CommandRunner> {
    docker: &'a Docker<'a, R>,
    site_dir: PathBuf,
}

impl<'a, R: CommandRunner> WordPress<'a, R> {
    pub fn new(docker: &'a Docker<'a, R>, site_dir: &Path) -> Self {
        WordPress {
            docker,
            site_dir: site_dir.to_path_buf(),
        }
    }

    fn wp(&self, script: String) -> Result<(), MeghError> {
        self.docker
            .exec_in_container(&self.site_dir, PHP_SERVICE, WEB_USER, ["sh".to_string(), "-c".to_string(), script])?;
        Ok(())
    }

    pub fn download(&self) -> Result<(), MeghError> {
        info!("downloading WordPress");
        self.wp(format!("wp core download --path={WEB_ROOT}"))
    }

    pub fn generate_config(&self, db: &DatabaseCredentials) -> Result<(), MeghError> {
        info!("generating WordPress configuration");
        self.wp(config_script(db))
    }

    pub fn install(&self, title: &str, admin: &AdminCredentials) -> Result<(), MeghError> {
        info!(url = %admin.url, "installing WordPress");
        self.wp(install_script(title, admin))
    }
}

fn config_script(db: &DatabaseCredentials) -> String {
    format!(
        "wp config create --path={WEB_ROOT} --dbname={} --dbuser={} --dbpass={} --dbhost={} --extra-php <<'PHP'\n{}\nPHP",
        shell_single_quote(&db.name),
        shell_single_quote(&db.user),
        shell_single_quote(&db.password),
        shell_single_quote(&db.host),
        WORDPRESS_EXTRA_PHP.trim_end()
    )
}

fn install_script(title: &str, admin: &AdminCredentials) -> String {
    [
        format!(
            "wp core install --path={WEB_ROOT} --url={} --title={} --admin_user={} --admin_password={} --admin_email={} --skip-email",
            shell_single_quote(&admin.url),
            shell_single_quote(title),
            shell_single_quote(&admin.username),
            shell_single_quote(&admin.password),
            shell_single_quote(&admin.email),
        ),
        format!("wp rewrite structure --path={WEB_ROOT} '/%postname%/' --hard"),
        format!("wp plugin delete --path={WEB_ROOT} akismet hello"),
    ]
    .join(" && ")
}

/// Laravel skeleton fetched with composer inside the php container.
pub struct Laravel<'a, R: CommandRunner> {
    docker: &'a Docker<'a, R>,
    site_dir: PathBuf,
}

impl<'a, R: CommandRunner> Laravel<'a, R> {
    pub fn new(docker: &'a Docker<'a, R>, site_dir: &Path) -> Self {
        Laravel {
            docker,
            site_dir: site_dir.to_path_buf(),
        }
    }

    pub fn download(&self) -> Result<(), MeghError> {
        info!("downloading Laravel");
        self.docker.exec_in_container(
            &self.site_dir,
            PHP_SERVICE,
            WEB_USER,
            ["composer", "create-project", "--prefer-dist", "--no-dev", "laravel/laravel", "."],
        )?;
        Ok(())
    }

    /// Points the application's `.env` at the shared database.
    pub fn configure_env(&self, db: &DatabaseCredentials, owner: &Identity) -> Result<(), MeghError> {
        info!("updating Laravel .env with database credentials");
        let path = self.site_dir.join("app").join(".env");
        let content = fs::read_to_string(&path).map_err(|err| {
            MeghError::Process(format!(
                "Laravel .env not found at {} after composer create-project: {err}",
                path.display()
            ))
        })?;
        let updated = set_values(
            &content,
            &[
                ("DB_CONNECTION", "mysql"),
                ("DB_HOST", &db.host),
                ("DB_DATABASE", &db.name),
                ("DB_USERNAME", &db.user),
                ("DB_PASSWORD", &db.password),
            ],
        );
        write_file(&path, &updated, owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Images, Settings};
    use crate::shell::testing::MockRunner;
    use tempfile::tempdir;

    fn settings(root: &Path) -> Settings {
        Settings {
            home: root.join(".megh"),
            sites_root: root.join("sites"),
            hosts_file: root.join("hosts"),
            compose_command: vec!["docker".to_string(), "compose".to_string()],
            images: Images::default(),
            identity: owner(),
        }
    }

    fn owner() -> Identity {
        Identity {
            user: "dev".to_string(),
            uid: None,
            gid: None,
            elevated: false,
        }
    }

    fn db() -> DatabaseCredentials {
        DatabaseCredentials {
            name: "demo_test".to_string(),
            user: "demo_test".to_string(),
            password: "0123456789abcdef".to_string(),
            host: "mariadb".to_string(),
        }
    }

    #[test]
    fn config_script_feeds_extra_php_through_heredoc() {
        let script = config_script(&db());
        assert!(script.starts_with("wp config create --path=/var/www/html --dbname='demo_test'"));
        assert!(script.contains("--dbhost='mariadb' --extra-php <<'PHP'\n"));
        assert!(script.contains("HTTP_X_FORWARDED_PROTO"));
        assert!(script.ends_with("\nPHP"));
    }

    #[test]
    fn install_script_quotes_user_supplied_values() {
        let admin = AdminCredentials {
            url: "http://demo.test".to_string(),
            username: "admin".to_string(),
            password: "it's secret".to_string(),
            email: "admin@demo.test".to_string(),
        };
        let script = install_script("demo.test", &admin);
        assert!(script.contains("--admin_password='it'\\''s secret'"));
        assert!(script.contains("&& wp rewrite structure --path=/var/www/html '/%postname%/' --hard"));
        assert!(script.ends_with("wp plugin delete --path=/var/www/html akismet hello"));
    }

    #[test]
    fn wordpress_steps_run_in_php_service_as_web_user() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let runner = MockRunner::default();
        let docker = Docker::new(&runner, &settings);
        let site_dir = settings.site_dir("demo.test");
        let wp = WordPress::new(&docker, &site_dir);
        wp.download().unwrap();
        let call = &runner.calls()[0];
        assert_eq!(
            call.args,
            vec![
                "compose",
                "run",
                "--rm",
                "-T",
                "--user",
                "www-data",
                "php",
                "sh",
                "-c",
                "wp core download --path=/var/www/html",
            ]
        );
        assert_eq!(call.cwd.as_deref(), Some(site_dir.as_path()));
    }

    #[test]
    fn laravel_env_points_at_shared_database() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let runner = MockRunner::default();
        let docker = Docker::new(&runner, &settings);
        let site_dir = settings.site_dir("demo.test");
        fs::create_dir_all(site_dir.join("app")).unwrap();
        fs::write(
            site_dir.join("app/.env"),
            "APP_NAME=Laravel\nDB_CONNECTION=mysql\nDB_HOST=127.0.0.1\nDB_PORT=3306\nDB_DATABASE=laravel\nDB_USERNAME=root\nDB_PASSWORD=\n",
        )
        .unwrap();
        Laravel::new(&docker, &site_dir)
            .configure_env(&db(), &owner())
            .unwrap();
        let env = fs::read_to_string(site_dir.join("app/.env")).unwrap();
        assert!(env.contains("DB_HOST=mariadb\n"));
        assert!(env.contains("DB_DATABASE=demo_test\n"));
        assert!(env.contains("DB_USERNAME=demo_test\n"));
        assert!(env.contains("DB_PASSWORD=0123456789abcdef\n"));
        assert!(env.contains("DB_PORT=3306\n"));
    }

    #[test]
    fn laravel_env_missing_is_an_error() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let runner = MockRunner::default();
        let docker = Docker::new(&runner, &settings);
        let err = Laravel::new(&docker, &settings.site_dir("demo.test"))
            .configure_env(&db(), &owner())
            .expect_err("missing .env");
        assert!(err.to_string().contains("composer create-project"));
    }
}
