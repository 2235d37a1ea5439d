use crate::error::MeghError;
use rand::RngCore;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub type EnvMap = BTreeMap<String, String>;

pub fn parse_env(content: &str) -> EnvMap {
    let mut envs = EnvMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        envs.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    envs
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

pub fn read_env_file(path: &Path) -> Result<EnvMap, MeghError> {
    let content = fs::read_to_string(path)?;
    Ok(parse_env(&content))
}

pub fn render_env(envs: &EnvMap) -> String {
    let mut content = String::new();
    for (key, value) in envs {
        content.push_str(&format!("{key}={value}\n"));
    }
    content
}

/// Rewrites `KEY=...` assignments in place, reviving `# KEY=...` lines, and
/// appends keys that are not present at all.
pub fn set_values(content: &str, pairs: &[(&str, &str)]) -> String {
    let mut remaining: Vec<(&str, &str)> = pairs.to_vec();
    let mut lines: Vec<String> = Vec::new();
    for line in content.lines() {
        let candidate = line.trim_start().trim_start_matches('#').trim_start();
        let key = candidate.split_once('=').map(|(key, _)| key.trim());
        match key.and_then(|key| remaining.iter().position(|(k, _)| *k == key)) {
            Some(index) => {
                let (key, value) = remaining.remove(index);
                lines.push(format!("{key}={value}"));
            }
            None => lines.push(line.to_string()),
        }
    }
    for (key, value) in remaining {
        lines.push(format!("{key}={value}"));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// 8 random bytes, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_unquotes() {
        let envs = parse_env(
            "# generated\nVHOST_NAME=demo.test\n\nMYSQL_PASSWORD=\"s3cret\"\nexport MYSQL_USER='demo_test'\nnot a pair\n",
        );
        assert_eq!(envs.get("VHOST_NAME").map(String::as_str), Some("demo.test"));
        assert_eq!(envs.get("MYSQL_PASSWORD").map(String::as_str), Some("s3cret"));
        assert_eq!(envs.get("MYSQL_USER").map(String::as_str), Some("demo_test"));
        assert_eq!(envs.len(), 3);
    }

    #[test]
    fn render_then_parse_keeps_values() {
        let mut envs = EnvMap::new();
        envs.insert("MYSQL_DATABASE".to_string(), "demo_test".to_string());
        envs.insert("VHOST_NAME".to_string(), "demo.test".to_string());
        let text = render_env(&envs);
        assert_eq!(text, "MYSQL_DATABASE=demo_test\nVHOST_NAME=demo.test\n");
        assert_eq!(parse_env(&text), envs);
    }

    #[test]
    fn set_values_rewrites_uncomments_and_appends() {
        let laravel = "APP_NAME=Laravel\nDB_CONNECTION=sqlite\n# DB_HOST=127.0.0.1\n# DB_DATABASE=laravel\nDB_USERNAME=root\n";
        let updated = set_values(
            laravel,
            &[
                ("DB_CONNECTION", "mysql"),
                ("DB_HOST", "mariadb"),
                ("DB_DATABASE", "demo_test"),
                ("DB_USERNAME", "demo_test"),
                ("DB_PASSWORD", "abc"),
            ],
        );
        assert_eq!(
            updated,
            "APP_NAME=Laravel\nDB_CONNECTION=mysql\nDB_HOST=mariadb\nDB_DATABASE=demo_test\nDB_USERNAME=demo_test\nDB_PASSWORD=abc\n"
        );
    }

    #[test]
    fn secrets_are_sixteen_hex_chars() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 16);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_secret());
    }
}
