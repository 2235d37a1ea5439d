use crate::error::MeghError;
use crate::files::append_file;
use crate::shell::{CommandRunner, Invocation, OnFailure, Shell};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

pub const LOOPBACK: &str = "127.0.0.1";

/// Loopback entries for site names in the system hosts file. Writes fall back
/// to `sudo tee` when the file is not writable by the current process.
pub struct HostsFile<'a, R: CommandRunner> {
    path: PathBuf,
    shell: Shell<'a, R>,
}

impl<'a, R: CommandRunner> HostsFile<'a, R> {
    pub fn new(path: &Path, runner: &'a R) -> Self {
        HostsFile {
            path: path.to_path_buf(),
            shell: Shell::new(runner),
        }
    }

    fn read(&self) -> Result<String, MeghError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn contains(&self, name: &str) -> Result<bool, MeghError> {
        Ok(entry_pattern(name)?.is_match(&self.read()?))
    }

    /// Returns false when an entry for `name` already exists.
    pub fn add(&self, name: &str) -> Result<bool, MeghError> {
        if self.contains(name)? {
            return Ok(false);
        }
        let content = self.read()?;
        let mut line = String::new();
        if !content.is_empty() && !content.ends_with('\n') {
            line.push('\n');
        }
        line.push_str(&format!("{LOOPBACK}\t{name}\n"));

        match append_file(&self.path, &line) {
            Ok(()) => {}
            Err(MeghError::Io(err)) if err.kind() == io::ErrorKind::PermissionDenied => {
                self.shell.run(
                    &Invocation::new("sudo")
                        .args(["tee", "-a"])
                        .arg(self.path.to_string_lossy())
                        .stdin(line),
                    OnFailure::Fail("error in adding the hosts entry"),
                )?;
            }
            Err(err) => return Err(err),
        }
        info!(site = name, hosts = %self.path.display(), "hosts entry added");
        Ok(true)
    }

    /// Returns false when there was no entry to remove.
    pub fn remove(&self, name: &str) -> Result<bool, MeghError> {
        let content = self.read()?;
        let updated = without_entry(&content, name)?;
        if updated == content {
            return Ok(false);
        }
        match fs::write(&self.path, &updated) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                self.shell.run(
                    &Invocation::new("sudo")
                        .arg("tee")
                        .arg(self.path.to_string_lossy())
                        .stdin(updated),
                    OnFailure::Fail("error in removing the hosts entry"),
                )?;
            }
            Err(err) => return Err(err.into()),
        }
        info!(site = name, hosts = %self.path.display(), "hosts entry removed");
        Ok(true)
    }
}

fn entry_pattern(name: &str) -> Result<Regex, MeghError> {
    Ok(Regex::new(&format!(
        r"(?m)^[ \t]*[^#\s][^#\n]*[ \t]{}[ \t]*$",
        regex::escape(name)
    ))?)
}

fn without_entry(content: &str, name: &str) -> Result<String, MeghError> {
    let line_pattern = Regex::new(&format!(
        r"^{}\s+{}\s*$",
        regex::escape(LOOPBACK),
        regex::escape(name)
    ))?;
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| !line_pattern.is_match(line))
        .collect();
    let mut out = kept.join("\n");
    if !out.is_empty() && content.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::MockRunner;
    use tempfile::tempdir;

    const BASE: &str = "127.0.0.1\tlocalhost\n::1\tlocalhost\n";

    #[test]
    fn add_appends_tab_separated_loopback_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, BASE).unwrap();
        let runner = MockRunner::default();
        let hosts = HostsFile::new(&path, &runner);

        assert!(hosts.add("demo.test").unwrap());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("127.0.0.1\tdemo.test\n"));
        assert!(hosts.contains("demo.test").unwrap());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn add_skips_existing_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, format!("{BASE}127.0.0.1   demo.test\n")).unwrap();
        let runner = MockRunner::default();
        let hosts = HostsFile::new(&path, &runner);
        assert!(!hosts.add("demo.test").unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap().matches("demo.test").count(),
            1
        );
    }

    #[test]
    fn similar_names_do_not_count_as_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "127.0.0.1\tmydemo.test\n127.0.0.1\tdemoxtest\n").unwrap();
        let runner = MockRunner::default();
        let hosts = HostsFile::new(&path, &runner);
        assert!(!hosts.contains("demo.test").unwrap());
    }

    #[test]
    fn commented_entries_are_not_present() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, format!("{BASE}# 127.0.0.1\tdemo.test\n")).unwrap();
        let runner = MockRunner::default();
        let hosts = HostsFile::new(&path, &runner);

        assert!(!hosts.contains("demo.test").unwrap());
        assert!(hosts.add("demo.test").unwrap());
        assert!(hosts.remove("demo.test").unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{BASE}# 127.0.0.1\tdemo.test\n")
        );
    }

    #[test]
    fn remove_drops_only_matching_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, format!("{BASE}127.0.0.1\tdemo.test\n127.0.0.1\tother.test\n")).unwrap();
        let runner = MockRunner::default();
        let hosts = HostsFile::new(&path, &runner);

        assert!(hosts.remove("demo.test").unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{BASE}127.0.0.1\tother.test\n")
        );
        assert!(!hosts.remove("demo.test").unwrap());
    }

    #[test]
    fn missing_hosts_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let runner = MockRunner::default();
        let hosts = HostsFile::new(&dir.path().join("absent"), &runner);
        assert!(!hosts.contains("demo.test").unwrap());
        assert!(!hosts.remove("demo.test").unwrap());
    }
}
