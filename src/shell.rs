use crate::error::{classify_command_failure, spawn_error_details, MeghError, ProcessErrorDetails};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// A single external command, described as argv rather than a shell string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Run through `sudo -u <user>` to drop back to the invoking user.
    pub as_user: Option<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Invocation {
            program: program.into(),
            ..Invocation::default()
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn as_user(mut self, user: Option<&str>) -> Self {
        self.as_user = user.map(ToString::to_string);
        self
    }

    pub fn stdin<S: Into<String>>(mut self, input: S) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 3);
        if let Some(user) = &self.as_user {
            parts.push(format!("sudo -u {user}"));
        }
        parts.push(render_part(&self.program));
        parts.extend(self.args.iter().map(|arg| render_part(arg)));
        parts.join(" ")
    }
}

fn render_part(part: &str) -> String {
    if part.is_empty() {
        return "\"\"".to_string();
    }
    if part.chars().any(|c| c.is_whitespace()) {
        return format!("\"{}\"", part.replace('"', "\\\""));
    }
    part.to_string()
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    /// Stdout followed by stderr, as one buffer.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).to_string();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        text
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, io::Error>;
}

pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, io::Error> {
        let mut cmd = match &invocation.as_user {
            Some(user) => {
                let mut cmd = Command::new("sudo");
                cmd.arg("-u").arg(user).arg(&invocation.program);
                cmd
            }
            None => Command::new(&invocation.program),
        };
        cmd.args(&invocation.args);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        if let Some(input) = &invocation.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes())?;
            }
        }
        let output = child.wait_with_output()?;
        let status_code = output
            .status
            .code()
            .unwrap_or(if output.status.success() { 0 } else { 1 });
        Ok(CommandOutput {
            status_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// What to do when a command exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Ignore,
    Warn,
    Fail(&'static str),
}

pub struct Shell<'a, R: CommandRunner> {
    runner: &'a R,
}

impl<'a, R: CommandRunner> Shell<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Shell { runner }
    }

    pub fn run(&self, invocation: &Invocation, on_failure: OnFailure) -> Result<CommandOutput, MeghError> {
        let command = invocation.render();
        debug!(command = %command, "running");
        let output = self.runner.run(invocation).map_err(|err| MeghError::ProcessDetailed {
            message: format!("failed to run command `{command}`: {err}"),
            details: spawn_error_details(&err, &command),
        })?;
        if output.success() {
            return Ok(output);
        }

        let captured = output.combined().trim().to_string();
        match on_failure {
            OnFailure::Ignore => {
                debug!(command = %command, status = output.status_code, "ignored failure");
                Ok(output)
            }
            OnFailure::Warn => {
                warn!(command = %command, status = output.status_code, "{captured}");
                Ok(output)
            }
            OnFailure::Fail(context) => Err(failure_error(context, &command, output.status_code, captured)),
        }
    }
}

fn failure_error(context: &str, command: &str, status_code: i32, captured: String) -> MeghError {
    let (error_code, hint) = classify_command_failure(&captured);
    let mut message = format!("{context}: command failed with status {status_code} while running `{command}`");
    if !captured.is_empty() {
        message = format!("{message}: {captured}");
    }
    if let Some(ref hint_message) = hint {
        message = format!("{message}\nHint: {hint_message}");
    }
    MeghError::ProcessDetailed {
        message,
        details: ProcessErrorDetails {
            error_code,
            hint,
            command: Some(command.to_string()),
            raw_output: if captured.is_empty() { None } else { Some(captured) },
        },
    }
}

/// Bash-safe single quoting: foo'bar -> 'foo'\''bar'
pub fn shell_single_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::RefCell;

    /// Records every invocation and replays queued outputs in order; an empty
    /// queue answers with a successful, silent command.
    #[derive(Default)]
    pub struct MockRunner {
        calls: RefCell<Vec<Invocation>>,
        outputs: RefCell<Vec<Result<CommandOutput, io::ErrorKind>>>,
    }

    impl MockRunner {
        pub fn push_output(&self, output: CommandOutput) {
            self.outputs.borrow_mut().push(Ok(output));
        }

        pub fn push_stdout(&self, stdout: &str) {
            self.push_output(ok_output(stdout));
        }

        pub fn push_failure(&self, status_code: i32, stderr: &str) {
            self.push_output(CommandOutput {
                status_code,
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
            });
        }

        pub fn push_spawn_error(&self, kind: io::ErrorKind) {
            self.outputs.borrow_mut().push(Err(kind));
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.borrow().clone()
        }

        pub fn rendered(&self) -> Vec<String> {
            self.calls.borrow().iter().map(Invocation::render).collect()
        }
    }

    impl CommandRunner for MockRunner {
        fn run(&self, invocation: &Invocation) -> Result<CommandOutput, io::Error> {
            self.calls.borrow_mut().push(invocation.clone());
            let mut queued = self.outputs.borrow_mut();
            if queued.is_empty() {
                return Ok(CommandOutput::default());
            }
            queued.remove(0).map_err(|kind| io::Error::new(kind, "mock spawn failure"))
        }
    }

    pub fn ok_output(stdout: &str) -> CommandOutput {
        CommandOutput {
            status_code: 0,
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockRunner;
    use super::*;

    #[test]
    fn render_quotes_arguments_with_spaces() {
        let invocation = Invocation::new("docker")
            .args(["compose", "run"])
            .arg("sh -c 'echo hi'")
            .as_user(Some("dev"));
        assert_eq!(
            invocation.render(),
            "sudo -u dev docker compose run \"sh -c 'echo hi'\""
        );
    }

    #[test]
    fn ignore_returns_output_of_failed_command() {
        let runner = MockRunner::default();
        runner.push_failure(1, "Error: No such network: db-network");
        let shell = Shell::new(&runner);
        let output = shell
            .run(&Invocation::new("docker").arg("network"), OnFailure::Ignore)
            .expect("ignored failure");
        assert_eq!(output.status_code, 1);
        assert!(output.combined().contains("No such network"));
    }

    #[test]
    fn warn_does_not_fail() {
        let runner = MockRunner::default();
        runner.push_failure(1, "network nginx-proxy not found");
        let shell = Shell::new(&runner);
        assert!(shell
            .run(&Invocation::new("docker"), OnFailure::Warn)
            .is_ok());
    }

    #[test]
    fn fail_carries_captured_output_and_context() {
        let runner = MockRunner::default();
        runner.push_failure(
            17,
            "Cannot connect to the Docker daemon. Is the docker daemon running?",
        );
        let shell = Shell::new(&runner);
        let err = shell
            .run(
                &Invocation::new("docker").args(["compose", "up", "-d"]),
                OnFailure::Fail("error in starting the site"),
            )
            .expect_err("should fail");
        let text = err.to_string();
        assert!(text.contains("error in starting the site"));
        assert!(text.contains("status 17"));
        assert!(text.contains("docker compose up -d"));
        let details = err.details().expect("details");
        assert_eq!(details.error_code, "docker_daemon_unreachable");
        assert!(details.raw_output.as_deref().unwrap().contains("Cannot connect"));
    }

    #[test]
    fn spawn_errors_always_fail() {
        let runner = MockRunner::default();
        runner.push_spawn_error(io::ErrorKind::NotFound);
        let shell = Shell::new(&runner);
        let err = shell
            .run(&Invocation::new("docker").arg("ps"), OnFailure::Ignore)
            .expect_err("spawn error");
        assert_eq!(err.details().unwrap().error_code, "command_not_found");
    }

    #[test]
    fn combined_joins_stdout_then_stderr() {
        let output = CommandOutput {
            status_code: 0,
            stdout: b"one".to_vec(),
            stderr: b"two\n".to_vec(),
        };
        assert_eq!(output.combined(), "one\ntwo\n");
    }

    #[test]
    fn single_quote_escapes_embedded_quotes() {
        assert_eq!(shell_single_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_single_quote("plain"), "'plain'");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_pipes_stdin_and_captures_output() {
        let output = SystemRunner
            .run(&Invocation::new("cat").stdin("hello"))
            .expect("cat runs");
        assert!(output.success());
        assert_eq!(output.combined(), "hello");
    }
}
