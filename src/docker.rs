use crate::error::MeghError;
use crate::settings::Settings;
use crate::shell::{CommandOutput, CommandRunner, Invocation, OnFailure, Shell};
use std::path::Path;

/// Stateless facade over the docker and compose CLIs. State queries use
/// filtered, formatted output and compare whole lines.
pub struct Docker<'a, R: CommandRunner> {
    shell: Shell<'a, R>,
    settings: &'a Settings,
}

impl<'a, R: CommandRunner> Docker<'a, R> {
    pub fn new(runner: &'a R, settings: &'a Settings) -> Self {
        Docker {
            shell: Shell::new(runner),
            settings,
        }
    }

    fn docker(&self) -> Invocation {
        Invocation::new("docker").as_user(self.settings.identity.drop_to())
    }

    fn compose(&self, dir: &Path) -> Invocation {
        let (program, prefix) = self
            .settings
            .compose_command
            .split_first()
            .map(|(program, rest)| (program.clone(), rest.to_vec()))
            .unwrap_or_else(|| ("docker".to_string(), vec!["compose".to_string()]));
        Invocation::new(program)
            .args(prefix)
            .current_dir(dir)
            .as_user(self.settings.identity.drop_to())
    }

    pub fn daemon_reachable(&self) -> Result<bool, MeghError> {
        let output = self.shell.run(
            &self.docker().args(["info", "--format", "{{.ServerVersion}}"]),
            OnFailure::Ignore,
        )?;
        Ok(output.success())
    }

    pub fn ensure_daemon(&self) -> Result<(), MeghError> {
        if self.daemon_reachable()? {
            return Ok(());
        }
        Err(MeghError::Precondition(
            "Docker is not running; start Docker Desktop (or dockerd) and retry".to_string(),
        ))
    }

    pub fn container_running(&self, name: &str) -> Result<bool, MeghError> {
        let output = self.shell.run(
            &self.docker().args([
                "ps".to_string(),
                "--filter".to_string(),
                format!("name=^{name}$"),
                "--format".to_string(),
                "{{.Names}}".to_string(),
            ]),
            OnFailure::Ignore,
        )?;
        Ok(output.success() && output.lines().iter().any(|line| line == name))
    }

    pub fn network_exists(&self, name: &str) -> Result<bool, MeghError> {
        let output = self.shell.run(
            &self.docker().args([
                "network".to_string(),
                "ls".to_string(),
                "--filter".to_string(),
                format!("name=^{name}$"),
                "--format".to_string(),
                "{{.Name}}".to_string(),
            ]),
            OnFailure::Ignore,
        )?;
        Ok(output.success() && output.lines().iter().any(|line| line == name))
    }

    pub fn create_network(&self, name: &str) -> Result<(), MeghError> {
        self.shell.run(
            &self.docker().args(["network", "create", name]),
            OnFailure::Fail("error in starting the network"),
        )?;
        Ok(())
    }

    /// Docker reports removal of a missing network; that is tolerated.
    pub fn remove_network(&self, name: &str) -> Result<CommandOutput, MeghError> {
        self.shell
            .run(&self.docker().args(["network", "rm", name]), OnFailure::Warn)
    }

    pub fn compose_up(&self, dir: &Path) -> Result<(), MeghError> {
        self.shell.run(
            &self.compose(dir).args(["up", "-d"]),
            OnFailure::Fail("error in starting the stack"),
        )?;
        Ok(())
    }

    pub fn compose_down(&self, dir: &Path) -> Result<(), MeghError> {
        self.shell.run(
            &self.compose(dir).arg("down"),
            OnFailure::Fail("error in removing the stack"),
        )?;
        Ok(())
    }

    /// One-shot `compose run` of `command` in `service` of the stack at `dir`.
    pub fn exec_in_container<I, S>(
        &self,
        dir: &Path,
        service: &str,
        user: &str,
        command: I,
    ) -> Result<CommandOutput, MeghError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell.run(
            &self
                .compose(dir)
                .args(["run", "--rm", "-T", "--user", user, service])
                .args(command),
            OnFailure::Fail("error in running a command inside the container"),
        )
    }
}
