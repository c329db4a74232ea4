//! Synchronous external command execution.
//!
//! Every tool the engine drives (self-checks, installers, `perl Configure`,
//! `nmake`, packagers) runs through [`CommandRunner`]: stdin is empty,
//! stdout is captured and returned, stderr goes to a log file. Exit codes are
//! not interpreted; callers check for the artifacts a step should produce.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::environment::EnvironmentProfile;
use crate::error::{Error, Result};

/// A command line plus the context it runs in.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec<'a> {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<&'a Path>,
    /// Replaces the inherited environment entirely when set.
    pub env: Option<&'a EnvironmentProfile>,
}

impl<'a> CommandSpec<'a> {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
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

    pub fn current_dir(mut self, dir: &'a Path) -> Self {
        self.cwd = Some(dir);
        self
    }

    pub fn env(mut self, env: &'a EnvironmentProfile) -> Self {
        self.env = Some(env);
        self
    }

    /// Shell-like rendering for messages and logs.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| {
                if s.is_empty() || s.contains(char::is_whitespace) {
                    format!("\"{s}\"")
                } else {
                    s.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion, returning stdout. Stderr is written to `stderr_log`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessStart`] if the process cannot be spawned.
    fn run(&self, cmd: &CommandSpec<'_>, stderr_log: &Path) -> Result<String>;
}

/// `std::process` implementation of [`CommandRunner`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec<'_>, stderr_log: &Path) -> Result<String> {
        if let Some(parent) = stderr_log.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        let stderr = File::create(stderr_log).map_err(|e| Error::io_at(stderr_log, e))?;

        let program = resolve_program(&cmd.program, cmd.env, cmd.cwd);
        let mut command = Command::new(&program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr));
        if let Some(env) = cmd.env {
            command.env_clear().envs(env.iter());
        }
        if let Some(dir) = cmd.cwd {
            command.current_dir(dir);
        }

        tracing::debug!("Running {}", cmd.display());
        let child = command
            .spawn()
            .map_err(|e| Error::process_start(cmd.display(), e))?;
        let output = child.wait_with_output()?;
        tracing::debug!("{} exited with {}", cmd.program, output.status);

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Resolve a bare program name against the PATH of the environment it will
/// run in, not the PATH of this process.
fn resolve_program(program: &str, env: Option<&EnvironmentProfile>, cwd: Option<&Path>) -> PathBuf {
    let path = Path::new(program);
    if path.is_absolute() || path.components().count() > 1 {
        return path.to_path_buf();
    }
    let Some(search) = env.and_then(EnvironmentProfile::path) else {
        return path.to_path_buf();
    };
    let cwd = cwd
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();
    which::which_in(program, Some(search), cwd).unwrap_or_else(|_| path.to_path_buf())
}

/// Split an argument string on whitespace, keeping double-quoted runs together.
///
/// Backslashes are literal so Windows paths survive unchanged.
pub fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending = false;

    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                pending = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending {
                    args.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        args.push(current);
    }
    args
}

/// Read the last N lines from a file efficiently.
///
/// Seeks to near the end and reads a fixed-size tail, so large build logs
/// are never loaded whole.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn read_last_lines(path: &Path, n: usize) -> std::io::Result<String> {
    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    let buffer = String::from_utf8_lossy(&buffer);

    // If we seeked mid-file, skip the first (partial) line
    let content = if seek_pos > 0 {
        buffer.find('\n').map_or(&buffer[..], |idx| &buffer[idx + 1..])
    } else {
        &buffer[..]
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}

/// `message` followed by the last lines of `error_log`, when it has any.
pub fn with_log_tail(message: String, error_log: &Path) -> String {
    const TAIL_LINES: usize = 20;

    match read_last_lines(error_log, TAIL_LINES) {
        Ok(tail) if !tail.trim().is_empty() => {
            format!("{message}\nLast lines of '{}':\n{tail}", error_log.display())
        }
        _ => message,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted runner: records every call and answers through a closure.
    pub(crate) struct FakeRunner<F> {
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
        respond: F,
    }

    impl<F> FakeRunner<F>
    where
        F: Fn(&CommandSpec<'_>, &Path) -> Result<String> + Send + Sync,
    {
        pub(crate) fn new(respond: F) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond,
            }
        }

        pub(crate) fn programs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(p, _)| p.clone())
                .collect()
        }
    }

    impl<F> CommandRunner for FakeRunner<F>
    where
        F: Fn(&CommandSpec<'_>, &Path) -> Result<String> + Send + Sync,
    {
        fn run(&self, cmd: &CommandSpec<'_>, stderr_log: &Path) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((cmd.program.clone(), cmd.args.clone()));
            (self.respond)(cmd, stderr_log)
        }
    }

    #[test]
    fn splits_quoted_arguments() {
        assert_eq!(split_args("-v"), ["-v"]);
        assert_eq!(
            split_args(r#"/VERYSILENT /DIR="C:\Program Files\NASM"  /NORESTART"#),
            ["/VERYSILENT", r"/DIR=C:\Program Files\NASM", "/NORESTART"]
        );
        assert_eq!(split_args(r#"a "" b"#), ["a", "", "b"]);
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn display_quotes_spaces() {
        let cmd = CommandSpec::new("perl").args(["Configure", "VC-WIN64A", "--prefix=C:/a b"]);
        assert_eq!(cmd.display(), r#"perl Configure VC-WIN64A "--prefix=C:/a b""#);
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_logs_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs/err.log");
        let cmd = CommandSpec::new("/bin/sh").args(["-c", "echo out; echo err 1>&2"]);

        let stdout = SystemRunner.run(&cmd, &log).unwrap();
        assert_eq!(stdout, "out\n");
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "err\n");
    }

    #[cfg(unix)]
    #[test]
    fn runs_with_replaced_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = EnvironmentProfile::default();
        env.set("SSLPACK_PROBE", "42");
        env.set("PATH", "/usr/bin:/bin");
        let cmd = CommandSpec::new("sh")
            .args(["-c", "echo $SSLPACK_PROBE; pwd"])
            .env(&env)
            .current_dir(dir.path());

        let stdout = SystemRunner.run(&cmd, &dir.path().join("err.log")).unwrap();
        let mut lines = stdout.lines();
        assert_eq!(lines.next(), Some("42"));
        let cwd = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(lines.next().map(PathBuf::from), Some(cwd));
    }

    #[test]
    fn missing_program_is_a_process_start_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("/nonexistent/sslpack-no-such-tool");
        let err = SystemRunner.run(&cmd, &dir.path().join("err.log")).unwrap_err();
        assert!(matches!(err, Error::ProcessStart { .. }));
        assert!(err.to_string().contains("sslpack-no-such-tool"));
    }

    #[test]
    fn tail_of_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");
        let body: String = (1..=50).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();
        assert_eq!(read_last_lines(&path, 2).unwrap(), "line 49\nline 50");

        let message = with_log_tail("nmake failed".into(), &path);
        assert!(message.starts_with("nmake failed\n"));
        assert!(message.ends_with("line 50"));
        assert!(!message.contains("line 30\n"));

        let missing = dir.path().join("absent.log");
        assert_eq!(with_log_tail("nmake failed".into(), &missing), "nmake failed");
    }
}
