use crate::error::MeghError;
use crate::settings::Identity;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const NGINX_CONF: &str = include_str!("../templates/nginx/nginx.conf");
pub const NGINX_COMMON_PHP: &str = include_str!("../templates/nginx/common/php.conf");
pub const NGINX_COMMON_LOCATIONS: &str = include_str!("../templates/nginx/common/locations.conf");
pub const NGINX_SITE_PHP: &str = include_str!("../templates/nginx/site-php.conf");
pub const NGINX_SITE_STATIC: &str = include_str!("../templates/nginx/site-static.conf");
pub const DEFAULT_INDEX: &str = include_str!("../templates/index.php");
pub const WORDPRESS_EXTRA_PHP: &str = include_str!("../templates/wordpress/extra.php");

/// Creates `path` and any missing parents. When elevated, newly created
/// directories are handed back to the original user.
pub fn ensure_dir(path: &Path, owner: &Identity) -> Result<(), MeghError> {
    if path.is_dir() {
        return Ok(());
    }
    let mut missing: Vec<PathBuf> = Vec::new();
    let mut cursor = Some(path);
    while let Some(dir) = cursor {
        if dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        cursor = dir.parent();
    }
    fs::create_dir_all(path)?;
    for dir in missing.iter().rev() {
        fix_owner(dir, owner)?;
    }
    Ok(())
}

pub fn write_file(path: &Path, contents: &str, owner: &Identity) -> Result<(), MeghError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent, owner)?;
    }
    fs::write(path, contents)?;
    fix_owner(path, owner)
}

pub fn append_file(path: &Path, contents: &str) -> Result<(), MeghError> {
    let mut file = fs::OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

pub fn remove_dir(path: &Path) -> Result<(), MeghError> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Substitutes `{{KEY}}` placeholders.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

#[cfg(unix)]
fn fix_owner(path: &Path, owner: &Identity) -> Result<(), MeghError> {
    if !owner.elevated || (owner.uid.is_none() && owner.gid.is_none()) {
        return Ok(());
    }
    std::os::unix::fs::chown(path, owner.uid, owner.gid)?;
    Ok(())
}

#[cfg(not(unix))]
fn fix_owner(_path: &Path, _owner: &Identity) -> Result<(), MeghError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn plain() -> Identity {
        Identity {
            user: "dev".to_string(),
            uid: None,
            gid: None,
            elevated: false,
        }
    }

    #[test]
    fn ensure_dir_creates_nested_paths() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir(&nested, &plain()).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested, &plain()).unwrap();
    }

    #[test]
    fn write_file_creates_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf/nginx/default.conf");
        write_file(&path, "server {}", &plain()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "server {}");
    }

    #[test]
    fn render_replaces_every_placeholder() {
        let out = render(
            "server_name {{SERVER_NAME}}; # {{SERVER_NAME}}\nroot {{DOCUMENT_ROOT}};",
            &[("SERVER_NAME", "demo.test"), ("DOCUMENT_ROOT", "/var/www/html")],
        );
        assert_eq!(out, "server_name demo.test; # demo.test\nroot /var/www/html;");
    }

    #[test]
    fn site_templates_carry_placeholders() {
        for template in [NGINX_SITE_PHP, NGINX_SITE_STATIC] {
            assert!(template.contains("{{SERVER_NAME}}"));
            assert!(template.contains("{{DOCUMENT_ROOT}}"));
        }
        assert!(NGINX_SITE_PHP.contains("fastcgi_pass php:9000"));
        assert!(!NGINX_SITE_STATIC.contains("fastcgi_pass"));
    }
}
