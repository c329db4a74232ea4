//! Plain line-oriented console reporter
//!
//! Build output is often forwarded through `build-all`, which frames child
//! output by line, so nothing here redraws or moves the cursor. Download
//! progress is a row of dots, one per [`DOT_BYTES`].

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crossterm::style::Stylize;
use sslpack_core::Reporter;

/// Bytes per progress dot.
pub const DOT_BYTES: u64 = 1024 * 1024;

/// Stdout reporter. `quiet` hides progress chatter and success banners but
/// keeps informational lines, warnings and errors.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    quiet: bool,
    dots: AtomicU64,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            dots: AtomicU64::new(0),
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    fn end_dots(&self) {
        if self.dots.swap(0, Ordering::Relaxed) > 0 {
            println!();
        }
    }
}

/// Dots still owed after `printed` for a download at `current` bytes.
pub fn dots_due(printed: u64, current: u64) -> u64 {
    (current / DOT_BYTES).saturating_sub(printed)
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        if self.quiet {
            return;
        }
        self.end_dots();
        println!("{}", title.bold());
    }

    fn downloading(&self, _name: &str, current: u64, _total: Option<u64>) {
        if self.quiet {
            return;
        }
        let printed = self.dots.load(Ordering::Relaxed);
        let due = dots_due(printed, current);
        if due == 0 {
            return;
        }
        self.dots.fetch_add(due, Ordering::Relaxed);
        let mut stdout = std::io::stdout().lock();
        // Progress is best-effort.
        let _ = write!(stdout, "{}", ".".repeat(due as usize));
        let _ = stdout.flush();
    }

    fn verified(&self, name: &str, path: &Path) {
        if self.quiet {
            return;
        }
        self.end_dots();
        println!("  {} {name} {}", "✓".green(), path.display().to_string().dark_grey());
    }

    fn extracting(&self, name: &str, dest: &Path) {
        if self.quiet {
            return;
        }
        self.end_dots();
        println!("  Extracting {name} to '{}'...", dest.display());
    }

    fn done(&self, name: &str, detail: &str) {
        if self.quiet {
            return;
        }
        self.end_dots();
        println!("  {} {name} {}", "✓".green(), detail.dark_grey());
    }

    fn info(&self, msg: &str) {
        self.end_dots();
        println!("{msg}");
    }

    fn success(&self, msg: &str) {
        if self.quiet {
            return;
        }
        self.end_dots();
        println!("{}", msg.green());
    }

    fn warning(&self, msg: &str) {
        self.end_dots();
        eprintln!("{} {msg}", "warning:".yellow().bold());
    }

    fn error(&self, msg: &str) {
        self.end_dots();
        eprintln!("{} {msg}", "error:".red().bold());
    }
}
