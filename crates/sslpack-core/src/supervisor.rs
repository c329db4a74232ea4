//! Concurrent supervision of external build processes.
//!
//! One OS process per job. Every stdout/stderr pipe of every live child sits
//! in a single [`StreamMap`]; the control loop waits on that map with a
//! liveness timeout, forwards each line to the console as it arrives, and
//! reaps a child once both of its pipes have closed. Lines within one pipe
//! keep their order; lines of different jobs interleave freely.
//!
//! There is no per-job timeout: a child that never closes its pipes keeps the
//! loop alive until it is terminated externally.
//!
//! A line longer than [`MAX_LINE`] bytes is forwarded in pieces of at most
//! that size, each written as a line of its own.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::{Stream, StreamExt, StreamMap};

use crate::environment::EnvironmentProfile;
use crate::error::{Error, Result};

/// One process to launch.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Name used in log messages and outcomes, e.g. `3.1.4 x64`.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Replaces the inherited environment when set.
    pub env: Option<EnvironmentProfile>,
    pub cwd: Option<PathBuf>,
}

impl JobSpec {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            env: None,
            cwd: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: EnvironmentProfile) -> Self {
        self.env = Some(env);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a job ended.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub label: String,
    pub status: ExitStatus,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Stdout,
    Stderr,
}

enum StreamEvent {
    Line(Vec<u8>),
    Closed,
}

type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Longest piece of output buffered before it is forwarded.
pub const MAX_LINE: usize = 64 * 1024;

/// Line-framed events from one pipe, terminated by a single `Closed`.
fn pipe_events<R>(pipe: R) -> EventStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let lines = futures::stream::unfold(BufReader::new(pipe), |mut reader| async move {
        let mut line = Vec::new();
        match (&mut reader).take(MAX_LINE as u64).read_until(b'\n', &mut line).await {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Some((StreamEvent::Line(line), reader))
            }
            Err(e) => {
                tracing::warn!("Dropping unreadable pipe: {e}");
                None
            }
        }
    });
    Box::pin(lines.chain(tokio_stream::once(StreamEvent::Closed)))
}

struct LiveJob {
    label: String,
    child: Child,
    open_pipes: usize,
}

/// Launches jobs and multiplexes their output.
#[derive(Debug)]
pub struct Supervisor {
    jobs: Vec<JobSpec>,
    poll_interval: Duration,
}

impl Supervisor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            poll_interval,
        }
    }

    pub fn push(&mut self, job: JobSpec) {
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Start every job, forward output to `console` until all have exited.
    ///
    /// Outcomes are returned in the order jobs were pushed.
    ///
    /// # Errors
    ///
    /// [`Error::ProcessStart`] if a job cannot be spawned, after killing the
    /// jobs already started, or an I/O error writing to `console`.
    pub async fn run<W: Write>(self, console: &mut W) -> Result<Vec<JobOutcome>> {
        let mut streams: StreamMap<(usize, Channel), EventStream> = StreamMap::new();
        let mut live: HashMap<usize, LiveJob> = HashMap::new();
        let mut outcomes: Vec<Option<JobOutcome>> = vec![None; self.jobs.len()];

        for (id, job) in self.jobs.into_iter().enumerate() {
            let mut child = match spawn(&job) {
                Ok(child) => child,
                Err(e) => {
                    kill_all(&mut live).await;
                    return Err(e);
                }
            };
            let mut open_pipes = 0;
            if let Some(stdout) = child.stdout.take() {
                streams.insert((id, Channel::Stdout), pipe_events(stdout));
                open_pipes += 1;
            }
            if let Some(stderr) = child.stderr.take() {
                streams.insert((id, Channel::Stderr), pipe_events(stderr));
                open_pipes += 1;
            }
            tracing::info!("Started '{}' (pid {:?})", job.label, child.id());
            live.insert(
                id,
                LiveJob {
                    label: job.label,
                    child,
                    open_pipes,
                },
            );
        }

        while !live.is_empty() {
            match tokio::time::timeout(self.poll_interval, streams.next()).await {
                Ok(Some(((id, _), StreamEvent::Line(line)))) => {
                    console.write_all(&line)?;
                    console.write_all(b"\n")?;
                    console.flush()?;
                    tracing::trace!("job {id}: {} bytes", line.len());
                }
                Ok(Some(((id, channel), StreamEvent::Closed))) => {
                    let Some(job) = live.get_mut(&id) else {
                        continue;
                    };
                    job.open_pipes -= 1;
                    tracing::debug!("'{}' closed {channel:?}", job.label);
                    if job.open_pipes == 0 {
                        if let Some(job) = live.remove(&id) {
                            outcomes[id] = Some(reap(job).await?);
                        }
                    }
                }
                Ok(None) => {
                    // Every pipe is gone; whatever is left only needs reaping.
                    for (id, job) in live.drain() {
                        outcomes[id] = Some(reap(job).await?);
                    }
                }
                Err(_) => log_liveness(&mut live),
            }
        }

        Ok(outcomes.into_iter().flatten().collect())
    }
}

fn spawn(job: &JobSpec) -> Result<Child> {
    let mut command = Command::new(&job.program);
    command
        .args(&job.args)
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(env) = &job.env {
        command.env_clear().envs(env.iter());
    }
    if let Some(dir) = &job.cwd {
        command.current_dir(dir);
    }

    tracing::debug!("Spawning {}", job.display());
    command
        .spawn()
        .map_err(|e| Error::process_start(job.display(), e))
}

async fn reap(mut job: LiveJob) -> Result<JobOutcome> {
    let status = job.child.wait().await?;
    if status.success() {
        tracing::info!("'{}' finished", job.label);
    } else {
        tracing::warn!("'{}' exited with {status}", job.label);
    }
    Ok(JobOutcome {
        label: job.label,
        status,
    })
}

async fn kill_all(live: &mut HashMap<usize, LiveJob>) {
    for (_, mut job) in live.drain() {
        tracing::warn!("Killing '{}'", job.label);
        if let Err(e) = job.child.kill().await {
            tracing::warn!("Cannot kill '{}': {e}", job.label);
        }
    }
}

fn log_liveness(live: &mut HashMap<usize, LiveJob>) {
    for job in live.values_mut() {
        match job.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("'{}' exited ({status}), draining output", job.label);
            }
            Ok(None) => tracing::debug!("'{}' still running", job.label),
            Err(e) => tracing::warn!("Cannot poll '{}': {e}", job.label),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn emitter(job: usize, lines: usize) -> JobSpec {
        let script = format!(
            "i=1; while [ $i -le {lines} ]; do echo \"job{job} line $i\"; i=$((i+1)); done; echo \"job{job} done\" 1>&2"
        );
        JobSpec::new(format!("job{job}"), "/bin/sh").args(["-c", script.as_str()])
    }

    #[tokio::test]
    async fn forwards_every_line_in_per_job_order() {
        const JOBS: usize = 4;
        const LINES: usize = 25;

        let mut supervisor = Supervisor::new(Duration::from_millis(50));
        for job in 0..JOBS {
            supervisor.push(emitter(job, LINES));
        }
        assert_eq!(supervisor.len(), JOBS);

        let mut console = Vec::new();
        let outcomes = supervisor.run(&mut console).await.unwrap();

        assert_eq!(outcomes.len(), JOBS);
        assert!(outcomes.iter().all(JobOutcome::succeeded));
        assert_eq!(outcomes[2].label, "job2");

        let text = String::from_utf8(console).unwrap();
        for job in 0..JOBS {
            let prefix = format!("job{job} line ");
            let seen: Vec<usize> = text
                .lines()
                .filter_map(|l| l.strip_prefix(prefix.as_str()))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seen, (1..=LINES).collect::<Vec<_>>());
            assert!(text.lines().any(|l| l == format!("job{job} done")));
        }
        assert_eq!(text.lines().count(), JOBS * (LINES + 1));
    }

    #[tokio::test]
    async fn reports_failing_jobs() {
        let mut supervisor = Supervisor::new(Duration::from_millis(50));
        supervisor.push(JobSpec::new("ok", "/bin/sh").args(["-c", "exit 0"]));
        supervisor.push(JobSpec::new("bad", "/bin/sh").args(["-c", "echo boom; exit 3"]));

        let mut console = Vec::new();
        let outcomes = supervisor.run(&mut console).await.unwrap();
        assert!(outcomes[0].succeeded());
        assert!(!outcomes[1].succeeded());
        assert_eq!(outcomes[1].status.code(), Some(3));
        assert_eq!(console, b"boom\n");
    }

    #[tokio::test]
    async fn quiet_job_survives_liveness_timeouts() {
        let mut supervisor = Supervisor::new(Duration::from_millis(10));
        supervisor.push(JobSpec::new("slow", "/bin/sh").args(["-c", "sleep 0.2; echo late"]));

        let mut console = Vec::new();
        let outcomes = supervisor.run(&mut console).await.unwrap();
        assert!(outcomes[0].succeeded());
        assert_eq!(console, b"late\n");
    }

    #[tokio::test]
    async fn passes_environment_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = EnvironmentProfile::default();
        env.set("PATH", "/usr/bin:/bin");
        env.set("SSLPACK_JOB", "x64");

        let mut supervisor = Supervisor::new(Duration::from_millis(50));
        supervisor.push(
            JobSpec::new("env", "/bin/sh")
                .args(["-c", "echo $SSLPACK_JOB; pwd"])
                .env(env)
                .current_dir(dir.path()),
        );

        let mut console = Vec::new();
        supervisor.run(&mut console).await.unwrap();
        let text = String::from_utf8(console).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("x64"));
        let cwd = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(lines.next().map(PathBuf::from), Some(cwd));
    }

    #[tokio::test]
    async fn spawn_failure_is_a_process_start_error() {
        let mut supervisor = Supervisor::new(Duration::from_millis(50));
        supervisor.push(JobSpec::new("missing", "/nonexistent/sslpack-build"));

        let err = supervisor.run(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::ProcessStart { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_kills_started_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());

        let mut supervisor = Supervisor::new(Duration::from_millis(50));
        supervisor.push(JobSpec::new("sleeper", "/bin/sh").args(["-c", script.as_str()]));
        supervisor.push(JobSpec::new("missing", "/nonexistent/sslpack-build"));

        let mut sink = Vec::new();
        let run = supervisor.run(&mut sink);
        let err = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::ProcessStart { .. }));

        if let Ok(pid) = std::fs::read_to_string(&pid_file) {
            let alive = std::process::Command::new("kill")
                .args(["-0", pid.trim()])
                .stderr(Stdio::null())
                .status()
                .unwrap();
            assert!(!alive.success(), "pid {} still running", pid.trim());
        }
    }

    #[tokio::test]
    async fn overlong_lines_are_forwarded_in_pieces() {
        let mut data = vec![b'a'; MAX_LINE * 2 + 10];
        data.extend_from_slice(b"\ntail\n");
        let events: Vec<StreamEvent> = pipe_events(std::io::Cursor::new(data)).collect().await;

        let lengths: Vec<Option<usize>> = events
            .iter()
            .map(|e| match e {
                StreamEvent::Line(line) => Some(line.len()),
                StreamEvent::Closed => None,
            })
            .collect();
        assert_eq!(lengths, [Some(MAX_LINE), Some(MAX_LINE), Some(10), Some(4), None]);
    }
}
