//! End-to-end tests invoking the built `sslpack` binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const DESCRIPTOR: &str = r#"{
    "name": "OpenSSL 3.1",
    "architectures": [
        {
            "architecture": "x64",
            "name": "Win64",
            "dependencies": [
                {
                    "name": "nasm",
                    "download": "https://example.invalid/nasm.zip",
                    "download_type": "zip",
                    "download_extract_path": "[[DEPS_DIR]]/nasm",
                    "env_paths": ["[[DEPS_DIR]]/nasm"]
                }
            ],
            "build": {"configure_target": "VC-WIN64A"}
        },
        {
            "architecture": "x86",
            "name": "Win32",
            "dependencies": [
                {"name": "nasm", "expand_from": "x64"}
            ]
        }
    ]
}"#;

/// Test context with a temporary workspace root holding one base version
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        Self { temp_dir }
    }

    fn with_base_version() -> Self {
        let ctx = Self::new();
        let template = ctx.root().join("templates").join("3.1");
        std::fs::create_dir_all(&template).expect("failed to create template dir");
        std::fs::write(template.join("info.json"), DESCRIPTOR).expect("failed to write descriptor");
        ctx
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn sslpack_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_sslpack");
        let mut cmd = Command::new(bin_path);
        cmd.arg("--root").arg(self.root());
        cmd.env_remove("SSLPACK_ROOT");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.sslpack_cmd().args(args).output().expect("failed to run sslpack")
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("build-all"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("sslpack"));
}

#[test]
fn test_completions_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("sslpack"));
}

#[test]
fn test_empty_workspace_has_no_base_versions() {
    let ctx = TestContext::new();
    let output = ctx.run(&["-s", "init", "3.1"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No base versions found"));
}

#[test]
fn test_unknown_base_version_lists_available() {
    let ctx = TestContext::with_base_version();
    let output = ctx.run(&["-s", "init", "9.9"]);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("error:"), "{err}");
    assert!(err.contains("Unknown base version '9.9'"));
    assert!(err.contains("3.1 (OpenSSL 3.1)"));
}

#[test]
fn test_prepare_without_source_download_fails() {
    let ctx = TestContext::with_base_version();
    let output = ctx.run(&["-s", "prepare", "3.1.4"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("does not declare a source download"));
}

#[test]
fn test_version_without_base_fails() {
    let ctx = TestContext::with_base_version();
    let output = ctx.run(&["-s", "build", "1.0.2u", "x64"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("A supported base version was not found for '1.0.2u'"));
}

#[test]
fn test_build_requires_prepare() {
    let ctx = TestContext::with_base_version();
    let output = ctx.run(&["-s", "build", "3.1.4", "x64"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("not prepared correctly"));
}

#[test]
fn test_build_requires_a_profile() {
    let ctx = TestContext::with_base_version();
    let installers: PathBuf = ctx.root().join("versions/3.1/3.1.4/installers");
    std::fs::create_dir_all(&installers).unwrap();

    let output = ctx.run(&["-s", "build", "3.1.4", "x64"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No environment profiles have been defined"));

    let output = ctx.run(&["-s", "build-all", "3.1.4"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No environment profiles have been defined"));
}

#[test]
fn test_save_profile_writes_environment() {
    let ctx = TestContext::with_base_version();
    let output = ctx
        .sslpack_cmd()
        .args(["-s", "save-profile", "3.1", "x64"])
        .env("SSLPACK_TEST_MARKER", "profiled")
        .output()
        .expect("failed to run sslpack");
    assert!(output.status.success(), "{}", stderr(&output));

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], true);
    assert!(result["profile"].as_str().unwrap().ends_with("versions/3.1/profiles/x64.json"));

    let saved = std::fs::read_to_string(ctx.root().join("versions/3.1/profiles/x64.json")).unwrap();
    let profile: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(profile["SSLPACK_TEST_MARKER"], "profiled");
}

#[test]
fn test_save_profile_rejects_unbuildable_architecture() {
    let ctx = TestContext::with_base_version();
    let output = ctx.run(&["-s", "save-profile", "3.1", "x86"]);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("Unknown architecture 'x86'"));
    assert!(err.contains("Available architectures: x64"));
}
