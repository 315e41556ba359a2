//! Integration tests for the CLI
//!
//! Drives apply, patch, status, and list through the binary against a
//! temporary dashboard project.

use std::fs;
use std::process::Command;
use tempfile::TempDir;

/// Helper to create a test project with a manifest in patches/
fn setup_test_project() -> TempDir {
    let dir = TempDir::new().unwrap();

    fs::write(
        dir.path().join("server.js"),
        r#"const mockPrices = {};

function serve() {
    return mockPrices;
}
"#,
    )
    .unwrap();

    fs::write(dir.path().join("package.json"), "{ \"name\": \"dashboard\" }\n").unwrap();

    let patches_dir = dir.path().join("patches");
    fs::create_dir(&patches_dir).unwrap();

    fs::write(
        patches_dir.join("server-fixes.toml"),
        r#"[meta]
name = "server-fixes"
description = "Swap the mock price table for live fetches"
project_relative = true

[[patches]]
id = "live-prices"
file = "server.js"

[patches.query]
type = "literal"
search = "const mockPrices = {};"

[patches.operation]
type = "replace"
text = "const prices = await fetchPrices();"
"#,
    )
    .unwrap();

    dir
}

fn run(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--quiet", "--"])
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn apply_help_mentions_manifests() {
    let output = run(&["apply", "--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Apply patch manifests to a project"));
}

#[test]
fn apply_patches_a_project() {
    let project = setup_test_project();

    let output = run(&["apply", "--project", project.path().to_str().unwrap()]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Project:"));
    assert!(stdout.contains("Loading patches"));
    assert!(stdout.contains("live-prices"));
    assert!(stdout.contains("Summary:"));

    let content = fs::read_to_string(project.path().join("server.js")).unwrap();
    assert!(content.contains("const prices = await fetchPrices();"));
    assert!(!content.contains("mockPrices = {}"));
}

#[test]
fn apply_twice_reports_already_applied() {
    let project = setup_test_project();
    let project_arg = project.path().to_str().unwrap();

    let first = run(&["apply", "--project", project_arg]);
    assert!(first.status.success());

    let second = run(&["apply", "--project", project_arg]);
    assert!(second.status.success());
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(stdout.contains("Already applied"));
}

#[test]
fn dry_run_does_not_modify_the_project() {
    let project = setup_test_project();
    let original = fs::read_to_string(project.path().join("server.js")).unwrap();

    let output = run(&[
        "apply",
        "--project",
        project.path().to_str().unwrap(),
        "--dry-run",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("DRY RUN"));
    assert!(stdout.contains("Would apply"));

    let after = fs::read_to_string(project.path().join("server.js")).unwrap();
    assert_eq!(original, after);
}

#[test]
fn apply_with_diff_shows_changes() {
    let project = setup_test_project();

    let output = run(&[
        "apply",
        "--project",
        project.path().to_str().unwrap(),
        "--diff",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(original)"));
    assert!(stdout.contains("(patched)"));
    assert!(stdout.contains("fetchPrices"));
}

#[test]
fn json_report_lists_outcomes() {
    let project = setup_test_project();

    let output = run(&[
        "apply",
        "--project",
        project.path().to_str().unwrap(),
        "--report",
        "json",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"status\": \"applied\""));
    assert!(stdout.contains("\"bytes_before\""));
}

#[test]
fn strict_mode_fails_on_missing_match() {
    let project = setup_test_project();
    let project_arg = project.path().to_str().unwrap();

    let ghost_manifest = project.path().join("ghost.toml");
    fs::write(
        &ghost_manifest,
        r#"[meta]
project_relative = true

[[patches]]
id = "ghost"
file = "server.js"

[patches.query]
type = "literal"
search = "nothing in this file looks like this"

[patches.operation]
type = "replace"
text = "and the replacement is absent too"
"#,
    )
    .unwrap();

    // Soft by default: reported but exit 0
    let soft = run(&[
        "apply",
        "--project",
        project_arg,
        "--manifest",
        ghost_manifest.to_str().unwrap(),
    ]);
    assert!(soft.status.success());
    assert!(String::from_utf8_lossy(&soft.stdout).contains("No match"));

    // Strict: same patch becomes a hard failure
    let strict = run(&[
        "apply",
        "--project",
        project_arg,
        "--manifest",
        ghost_manifest.to_str().unwrap(),
        "--strict",
    ]);
    assert!(!strict.status.success());
}

#[test]
fn one_off_patch_command() {
    let project = setup_test_project();
    let file = project.path().join("server.js");

    let output = run(&[
        "patch",
        "--file",
        file.to_str().unwrap(),
        "--match",
        "const mockPrices = {};",
        "--replace",
        "const prices = await fetchPrices();",
    ]);

    assert!(output.status.success());
    let content = fs::read_to_string(&file).unwrap();
    assert!(content.contains("fetchPrices"));
}

#[test]
fn one_off_patch_dry_run_prints_diff_without_writing() {
    let project = setup_test_project();
    let file = project.path().join("server.js");
    let before = fs::read_to_string(&file).unwrap();

    let output = run(&[
        "patch",
        "--file",
        file.to_str().unwrap(),
        "--match",
        "const mockPrices = {};",
        "--replace",
        "const prices = await fetchPrices();",
        "--dry-run",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Would apply"));
    assert!(stdout.contains("(original)"));
    assert!(stdout.contains("(patched)"));
    assert!(stdout.contains("+const prices = await fetchPrices();"));

    assert_eq!(fs::read_to_string(&file).unwrap(), before);
}

#[test]
fn one_off_patch_no_match_is_an_error() {
    let project = setup_test_project();
    let file = project.path().join("server.js");

    let output = run(&[
        "patch",
        "--file",
        file.to_str().unwrap(),
        "--match",
        "this text does not exist",
        "--replace",
        "anything",
    ]);

    assert!(!output.status.success());
}

#[test]
fn status_command_reports_patch_state() {
    let project = setup_test_project();
    let project_arg = project.path().to_str().unwrap();

    let output = run(&["status", "--project", project_arg]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Patch Status Report"));
    assert!(stdout.contains("PENDING"));

    run(&["apply", "--project", project_arg]);

    let output = run(&["status", "--project", project_arg]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("APPLIED"));
}

#[test]
fn list_command_enumerates_patches() {
    let project = setup_test_project();

    let output = run(&["list", "--project", project.path().to_str().unwrap()]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("server-fixes"));
    assert!(stdout.contains("live-prices"));
}

#[test]
fn missing_project_is_an_error() {
    let output = run(&["apply", "--project", "/nonexistent/project"]);
    assert!(!output.status.success());
}
