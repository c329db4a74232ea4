//! Environment profiles and dependency self-checks.
//!
//! A profile is the environment a build runs in. `save-profile` captures the
//! ambient environment once per architecture; builds replay it and apply
//! each dependency's recipe on top (PATH additions and extra variables).
//!
//! ## Apply order, per dependency
//!
//! 1. Drop PATH entries that already hold the dependency's verify tool, so a
//!    stale or foreign install of the same tool cannot shadow ours.
//! 2. Append the dependency's `env_paths`.
//! 3. Set `env_extras`, replacing case variants of the same name.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sslpack_schema::{DependencyDescriptor, DirectDependency, SelfCheck};

use crate::error::{Error, Result};
use crate::reporter::Reporter;
use crate::runner::{CommandRunner, CommandSpec, split_args};
use crate::template::PathMap;
use crate::workspace::timestamped_log;

/// Process-identity variables that mean nothing when a profile is replayed.
pub const CAPTURE_DENYLIST: &[&str] = &[
    "_",
    "PWD",
    "OLDPWD",
    "SHLVL",
    "PROMPT",
    "SESSIONNAME",
    "CLIENTNAME",
    "TERM_SESSION_ID",
];

/// PATH spelling used when a profile has no PATH variable yet.
#[cfg(windows)]
pub const DEFAULT_PATH_KEY: &str = "Path";
#[cfg(not(windows))]
pub const DEFAULT_PATH_KEY: &str = "PATH";

/// Separator between PATH entries.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// Variable name → value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentProfile {
    vars: BTreeMap<String, String>,
}

impl EnvironmentProfile {
    /// Snapshot the current process environment minus [`CAPTURE_DENYLIST`].
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars_os().filter_map(|(k, v)| {
            let key = k.into_string().ok()?;
            let value = v.into_string().ok()?;
            Some((key, value))
        }))
    }

    /// Build from explicit pairs, applying the capture denylist.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut profile = Self::default();
        for (key, value) in vars {
            let key = key.into();
            if CAPTURE_DENYLIST
                .iter()
                .any(|denied| denied.eq_ignore_ascii_case(&key))
            {
                continue;
            }
            profile.vars.insert(key, value.into());
        }
        profile
    }

    /// Actual spelling of `name` in this profile, matched case-insensitively.
    pub fn key_for(&self, name: &str) -> Option<&str> {
        self.vars
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Value of `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = self.key_for(name)?;
        self.vars.get(key).map(String::as_str)
    }

    /// Set `name`, removing any case variant first.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.vars.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.vars.insert(name, value.into());
    }

    /// The PATH value, however it is spelled.
    pub fn path(&self) -> Option<&str> {
        self.get("PATH")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Return a copy with one dependency's recipe applied.
    ///
    /// Unexpanded inheritance references carry no recipe and leave the
    /// profile unchanged.
    pub fn apply(&self, dep: &DependencyDescriptor, paths: &PathMap) -> Self {
        match dep.as_direct() {
            Some(direct) => self.apply_direct(direct, paths),
            None => self.clone(),
        }
    }

    /// Apply every dependency in order.
    pub fn apply_all<'a>(
        &self,
        deps: impl IntoIterator<Item = &'a DependencyDescriptor>,
        paths: &PathMap,
    ) -> Self {
        deps.into_iter()
            .fold(self.clone(), |env, dep| env.apply(dep, paths))
    }

    fn apply_direct(&self, dep: &DirectDependency, paths: &PathMap) -> Self {
        let mut next = self.clone();

        let path_key = self
            .key_for("PATH")
            .unwrap_or(DEFAULT_PATH_KEY)
            .to_string();
        let current = self.vars.get(&path_key).map_or("", String::as_str);

        let tool = dep.verify.as_ref().map(|check| paths.substitute(&check.command));
        let mut entries: Vec<String> = current
            .split(PATH_LIST_SEPARATOR)
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter(|entry| !tool.as_deref().is_some_and(|t| dir_holds_tool(entry, t)))
            .map(str::to_string)
            .collect();
        entries.extend(dep.env_paths.iter().map(|p| paths.substitute_path(p)));
        next.vars
            .insert(path_key, entries.join(&PATH_LIST_SEPARATOR.to_string()));

        for (name, value) in &dep.env_extras {
            let value = if value.contains("[[") && value.contains("]]") {
                paths.substitute_path(value)
            } else {
                value.clone()
            };
            next.set(name.clone(), value);
        }

        next
    }

    /// Load a saved profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON object of strings.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            Error::descriptor(format!(
                "Saved environment profile '{}' is not valid: {e}",
                path.display()
            ))
        })
    }

    /// Replace the profile at `path` wholesale (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(self)?)
            .map_err(|e| Error::io_at(&tmp_path, e))?;
        std::fs::rename(&tmp_path, path).map_err(|e| Error::io_at(path, e))?;
        Ok(())
    }
}

/// True when `dir` contains the relative tool path `tool`.
///
/// Absolute tools never match: they do not depend on PATH.
fn dir_holds_tool(dir: &str, tool: &str) -> bool {
    let tool_path = Path::new(tool);
    if tool_path.is_absolute() {
        return false;
    }
    let candidate = Path::new(dir).join(tool_path);
    if candidate.is_file() {
        return true;
    }
    let suffix = std::env::consts::EXE_SUFFIX;
    !suffix.is_empty()
        && tool_path.extension().is_none()
        && Path::new(dir).join(format!("{tool}{suffix}")).is_file()
}

/// What to do when a self-check misses its preferred output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreferredPolicy {
    /// Fail the operation.
    Fatal,
    /// Report a warning and continue.
    #[default]
    Warn,
}

impl PreferredPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Fatal } else { Self::Warn }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Satisfied,
    MissingRequired,
    MissingPreferred,
}

impl VerifyOutcome {
    /// Whether this outcome lets work proceed under `policy`.
    pub fn passes(self, policy: PreferredPolicy) -> bool {
        match self {
            Self::Satisfied => true,
            Self::MissingRequired => false,
            Self::MissingPreferred => policy == PreferredPolicy::Warn,
        }
    }
}

/// Result of running one self-check.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub name: String,
    pub outcome: VerifyOutcome,
    pub command: String,
    /// Stdout, a newline, then stderr.
    pub output: String,
    pub errors: String,
    alert: String,
}

impl VerifyReport {
    fn satisfied(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: VerifyOutcome::Satisfied,
            command: String::new(),
            output: String::new(),
            errors: String::new(),
            alert: String::new(),
        }
    }

    /// Turn the outcome into a result under `policy`, warning where lenient.
    ///
    /// # Errors
    ///
    /// [`Error::MissingRequired`] always; [`Error::MissingPreferred`] under
    /// [`PreferredPolicy::Fatal`].
    pub fn enforce(self, policy: PreferredPolicy, reporter: &dyn Reporter) -> Result<()> {
        match (self.outcome, policy) {
            (VerifyOutcome::Satisfied, _) => Ok(()),
            (VerifyOutcome::MissingRequired, _) => Err(Error::MissingRequired {
                command: self.command,
                alert: self.alert,
                errors: self.errors,
            }),
            (VerifyOutcome::MissingPreferred, PreferredPolicy::Fatal) => {
                Err(Error::MissingPreferred {
                    command: self.command,
                    alert: self.alert,
                    errors: self.errors,
                })
            }
            (VerifyOutcome::MissingPreferred, PreferredPolicy::Warn) => {
                let message = format!(
                    "Preferred output was not returned by '{}'. {}",
                    self.command, self.alert
                );
                tracing::warn!("{message}");
                reporter.warning(&message);
                Ok(())
            }
        }
    }
}

/// Classify self-check output against its patterns, line by line.
///
/// # Errors
///
/// Returns [`Error::Descriptor`] for an empty or invalid pattern.
pub fn classify(output: &str, check: &SelfCheck) -> Result<VerifyOutcome> {
    let required = compile(check.required_output.as_deref(), &check.command)?;
    let preferred = compile(check.preferred_output.as_deref(), &check.command)?;

    let found = |pattern: &Option<Regex>| {
        pattern
            .as_ref()
            .is_none_or(|re| output.lines().any(|line| re.is_match(line)))
    };

    Ok(if !found(&required) {
        VerifyOutcome::MissingRequired
    } else if !found(&preferred) {
        VerifyOutcome::MissingPreferred
    } else {
        VerifyOutcome::Satisfied
    })
}

fn compile(pattern: Option<&str>, command: &str) -> Result<Option<Regex>> {
    match pattern {
        None => Ok(None),
        Some("") => Err(Error::descriptor(format!(
            "Empty output pattern for self-check '{command}'"
        ))),
        // A bare pattern can look delimited, e.g. `(a)|(b)`.
        Some(p) => Regex::new(&pcre_to_regex(p))
            .or_else(|_| Regex::new(p))
            .map(Some)
            .map_err(|e| {
                Error::descriptor(format!("Invalid output pattern for '{command}': {e}"))
            }),
    }
}

/// Rewrite a delimited PCRE pattern (`/This is perl/`, `#nasm#i`) into
/// `regex` syntax, turning trailing modifiers into an inline flag group.
/// Anything that is not a well-formed delimited pattern is returned as is.
pub fn pcre_to_regex(pattern: &str) -> String {
    let mut chars = pattern.chars();
    let Some(open) = chars.next() else {
        return pattern.to_string();
    };
    if open.is_alphanumeric() || open.is_whitespace() || open == '\\' {
        return pattern.to_string();
    }
    let close = match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        other => other,
    };
    let body_and_flags = &pattern[open.len_utf8()..];
    let Some(end) = body_and_flags.rfind(close) else {
        return pattern.to_string();
    };
    let body = &body_and_flags[..end];
    let modifiers = &body_and_flags[end + close.len_utf8()..];

    let mut flags = String::new();
    for m in modifiers.chars() {
        match m {
            'i' | 'm' | 's' | 'x' => {
                if !flags.contains(m) {
                    flags.push(m);
                }
            }
            // Unicode and dollar-end-only are the regex crate's defaults.
            'u' | 'D' => {}
            _ => return pattern.to_string(),
        }
    }

    if flags.is_empty() {
        body.to_string()
    } else {
        format!("(?{flags}){body}")
    }
}

/// Runs dependency self-checks inside a reconstructed environment.
pub struct Verifier<'a> {
    base: &'a EnvironmentProfile,
    runner: &'a dyn CommandRunner,
    logs_dir: &'a Path,
}

impl<'a> Verifier<'a> {
    pub fn new(
        base: &'a EnvironmentProfile,
        runner: &'a dyn CommandRunner,
        logs_dir: &'a Path,
    ) -> Self {
        Self {
            base,
            runner,
            logs_dir,
        }
    }

    /// Run a dependency's self-check in `base` + that dependency's recipe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Descriptor`] for bad patterns or an unexpanded
    /// dependency, and [`Error::ProcessStart`] if the command cannot run.
    pub fn check(&self, dep: &DependencyDescriptor, paths: &PathMap) -> Result<VerifyReport> {
        let direct = dep.as_direct().ok_or_else(|| {
            Error::descriptor(format!("Dependency '{}' has not been expanded", dep.name))
        })?;
        let Some(check) = &direct.verify else {
            return Ok(VerifyReport::satisfied(&dep.name));
        };

        let env = self.base.apply_direct(direct, paths);
        let program = paths.substitute(&check.command);
        let args = check
            .args
            .as_deref()
            .map(|a| split_args(&paths.substitute_native(a)))
            .unwrap_or_default();
        let cmd = CommandSpec::new(program).args(args).env(&env);

        let log = timestamped_log(self.logs_dir, "verify_dependency", "error");
        let stdout = self.runner.run(&cmd, &log)?;
        let errors = std::fs::read_to_string(&log).unwrap_or_default();
        std::fs::remove_file(&log).ok();

        let output = format!("{stdout}\n{errors}");
        let outcome = classify(&output, check)?;
        tracing::debug!("Self-check for '{}': {outcome:?}", dep.name);

        let alert = match outcome {
            VerifyOutcome::MissingRequired => check.required_alert.clone(),
            VerifyOutcome::MissingPreferred => check.preferred_alert.clone(),
            VerifyOutcome::Satisfied => None,
        };

        Ok(VerifyReport {
            name: dep.name.clone(),
            outcome,
            command: cmd.display(),
            output,
            errors,
            alert: alert.unwrap_or_default(),
        })
    }

    /// [`check`](Self::check), then [`VerifyReport::enforce`].
    ///
    /// # Errors
    ///
    /// See both.
    pub fn verify(
        &self,
        dep: &DependencyDescriptor,
        paths: &PathMap,
        policy: PreferredPolicy,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        self.check(dep, paths)?.enforce(policy, reporter)
    }
}

impl std::fmt::Debug for Verifier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("logs_dir", &self.logs_dir)
            .finish_non_exhaustive()
    }
}
