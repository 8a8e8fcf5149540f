use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn write_file(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

fn run(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lexgraph"))
        .current_dir(cwd)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .unwrap()
}

fn run_ok(cwd: &Path, args: &[&str]) -> String {
    let output = run(cwd, args);
    if !output.status.success() {
        panic!(
            "lexgraph command failed\nargs: {:?}\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
            args,
            output.status,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
    String::from_utf8(output.stdout).unwrap()
}

const PROJECT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<languageproject version="7000000">
  <rt class="LangProject" guid="00000000-0000-0000-0000-000000000001">
    <WordformInventory><objsur guid="00000000-0000-0000-0000-000000000002" t="o"/></WordformInventory>
  </rt>
  <rt class="WordformInventory" guid="00000000-0000-0000-0000-000000000002" ownerguid="00000000-0000-0000-0000-000000000001" owningflid="6001005">
    <Wordforms><objsur guid="00000000-0000-0000-0000-000000000003" t="o"/></Wordforms>
  </rt>
  <rt class="WfiWordform" guid="00000000-0000-0000-0000-000000000003" ownerguid="00000000-0000-0000-0000-000000000002" owningflid="5063001">
    <Form><AUni ws="x-kal">kala</AUni></Form>
  </rt>
</languageproject>
"#;

#[test]
fn migrate_writes_new_version() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.lgp");
    write_file(&path, PROJECT);

    let out = run_ok(dir.path(), &["migrate", path.to_str().unwrap(), "--format", "json"]);
    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["from_version"], 7000000);
    assert_eq!(report["to_version"], 7000011);
    assert_eq!(report["steps"].as_array().unwrap().len(), 11);

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains(r#"version="7000011""#));
    assert!(!written.contains("WordformInventory"));
    assert!(written.contains(r#"ws="qaa-x-kal""#));
    assert!(!dir.path().join("sample.lgp.tmp").exists());
}

#[test]
fn migrate_dry_run_leaves_file_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.lgp");
    write_file(&path, PROJECT);

    let out = run_ok(
        dir.path(),
        &["migrate", path.to_str().unwrap(), "--to", "7000002", "--dry-run"],
    );
    assert!(out.contains("Migration 7000000 -> 7000002"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), PROJECT);
}

#[test]
fn check_reports_pending_steps() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.lgp");
    write_file(&path, PROJECT);

    let out = run_ok(dir.path(), &["check", path.to_str().unwrap()]);
    assert!(out.contains("Version: 7000000"));
    assert!(out.contains("Pending: 11 step(s)"));
}

#[test]
fn versions_lists_chain() {
    let dir = TempDir::new().unwrap();
    let out = run_ok(dir.path(), &["versions", "--format", "json"]);
    let steps: serde_json::Value = serde_json::from_str(&out).unwrap();
    let steps = steps.as_array().unwrap();
    assert_eq!(steps.len(), 11);
    assert_eq!(steps[0]["version"], 7000001);
    assert_eq!(steps[3]["bookkeeping_only"], true);
}

#[test]
fn delint_repairs_and_saves() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("damaged.lgp");
    write_file(
        &path,
        r#"<languageproject version="7000011">
  <rt class="LangProject" guid="00000000-0000-0000-0000-000000000001">
    <Texts><objsur guid="00000000-0000-0000-0000-000000000009" t="o"/></Texts>
  </rt>
  <rt class="Text" guid="00000000-0000-0000-0000-000000000002" ownerguid="00000000-0000-0000-0000-000000000001" owningflid="6001007"/>
</languageproject>"#,
    );

    let out = run_ok(dir.path(), &["delint", path.to_str().unwrap(), "--format", "json"]);
    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["links_removed"], 1);
    assert_eq!(report["removed"][0], "00000000-0000-0000-0000-000000000002");

    let out = run_ok(dir.path(), &["delint", path.to_str().unwrap()]);
    assert!(out.contains("No problems found."));
}

#[test]
fn malformed_project_fails_with_diagnostic() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.lgp");
    write_file(&path, "<languageproject version=\"7000000\"><rt class=\"LangProject\"></languageproject>");

    let output = run(dir.path(), &["check", path.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parse error"));
}

#[test]
fn downgrade_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.lgp");
    write_file(&path, &PROJECT.replace("7000000", "7000005"));

    let output = run(dir.path(), &["migrate", path.to_str().unwrap(), "--to", "7000001"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("backwards"));
}
