//! Run configuration.
//!
//! The workspace root comes from `--root`, then `SSLPACK_ROOT`, then the
//! current directory. `SSLPACK_POLL_SECS` tunes how often the supervisor
//! re-checks process liveness while no output arrives.

use std::path::PathBuf;
use std::time::Duration;

use crate::environment::PreferredPolicy;
use crate::workspace::{ROOT_ENV, Workspace};

/// Environment variable overriding the supervisor liveness interval.
pub const POLL_ENV: &str = "SSLPACK_POLL_SECS";

/// Default supervisor liveness interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub root: PathBuf,
    /// Treat a missing preferred self-check output as fatal.
    pub strict: bool,
    /// Suppress progress output.
    pub quiet: bool,
    pub poll_interval: Duration,
}

impl Config {
    /// Resolve from the process environment.
    ///
    /// # Errors
    ///
    /// Fails only when no root is given and the current directory is unreadable.
    pub fn resolve(root: Option<PathBuf>) -> std::io::Result<Self> {
        let cwd = match root {
            Some(_) => PathBuf::new(),
            None => std::env::current_dir()?,
        };
        Ok(Self::from_sources(
            root,
            std::env::var_os(ROOT_ENV).map(PathBuf::from),
            std::env::var(POLL_ENV).ok(),
            cwd,
        ))
    }

    /// Resolve from explicit sources, highest precedence first.
    pub fn from_sources(
        flag: Option<PathBuf>,
        env_root: Option<PathBuf>,
        env_poll: Option<String>,
        cwd: PathBuf,
    ) -> Self {
        let root = flag
            .or(env_root.filter(|p| !p.as_os_str().is_empty()))
            .unwrap_or(cwd);
        Self {
            root,
            strict: false,
            quiet: false,
            poll_interval: parse_poll_interval(env_poll.as_deref()),
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.root)
    }

    pub fn preferred_policy(&self) -> PreferredPolicy {
        PreferredPolicy::from_strict(self.strict)
    }
}

fn parse_poll_interval(value: Option<&str>) -> Duration {
    let Some(raw) = value else {
        return DEFAULT_POLL_INTERVAL;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            tracing::warn!("Ignoring invalid {POLL_ENV}='{raw}', using {DEFAULT_POLL_INTERVAL:?}");
            DEFAULT_POLL_INTERVAL
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_precedence() {
        let cwd = PathBuf::from("/cwd");
        let flag = Some(PathBuf::from("/flag"));
        let env = Some(PathBuf::from("/env"));

        let cfg = Config::from_sources(flag, env.clone(), None, cwd.clone());
        assert_eq!(cfg.root, PathBuf::from("/flag"));

        let cfg = Config::from_sources(None, env, None, cwd.clone());
        assert_eq!(cfg.root, PathBuf::from("/env"));

        let cfg = Config::from_sources(None, Some(PathBuf::new()), None, cwd);
        assert_eq!(cfg.root, PathBuf::from("/cwd"));
    }

    #[test]
    fn poll_interval() {
        assert_eq!(parse_poll_interval(None), DEFAULT_POLL_INTERVAL);
        assert_eq!(parse_poll_interval(Some("10")), Duration::from_secs(10));
        assert_eq!(parse_poll_interval(Some("0")), DEFAULT_POLL_INTERVAL);
        assert_eq!(parse_poll_interval(Some("soon")), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn strict_selects_fatal_policy() {
        let cfg = Config::from_sources(None, None, None, PathBuf::from("/")).with_strict(true);
        assert_eq!(cfg.preferred_policy(), PreferredPolicy::Fatal);
        assert_eq!(cfg.with_strict(false).preferred_policy(), PreferredPolicy::Warn);
    }
}
