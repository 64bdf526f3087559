#![expect(clippy::unwrap_used)] // test code OK

use std::process::{Command, Output};

fn scmbridge(args: &[&str]) -> Output {
    let home = tempfile::tempdir().unwrap();
    Command::new(env!("CARGO_BIN_EXE_scmbridge"))
        .args(args)
        .env("SCMBRIDGE_HOME_PATH", home.path())
        .env("SCMBRIDGE_PROGS_PATH", concat!(env!("CARGO_MANIFEST_DIR"), "/share"))
        .env_remove("SCMBRIDGE_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_unknown_scheme_lists_backends_and_fails() {
    let output = scmbridge(&["--scheme", "does-not-exist", "-x", "1"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown scheme 'does-not-exist'"), "{stderr}");
    for name in ["arena", "confined", "direct"] {
        assert!(stderr.lines().any(|line| line.trim() == name), "{name} not listed: {stderr}");
    }
    assert!(output.stdout.is_empty());
}

#[test]
fn test_list_schemes() {
    let output = scmbridge(&["--list-schemes"]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("Available schemes:"), "{stderr}");
}

#[test]
fn test_execute_on_each_backend() {
    for name in ["arena", "confined", "direct"] {
        let output = scmbridge(&["-g", name, "-x", "(define (add1 n) (+ n 1))", "-x", "(add1 5)", "-x", "bridge-dialect"]);
        assert!(output.status.success(), "{name}: {}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout, format!("6\n\"{name}\"\n"));
    }
}

#[test]
fn test_evaluation_error_reports_and_continues() {
    let output = scmbridge(&["-x", "undefined-thing", "-x", "(+ 40 2)"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "42\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("undefined-thing"), "{stderr}");
}

#[test]
fn test_files_run_before_expressions() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("setup.scm");
    std::fs::write(&script, "(define greeting \"hello\")").unwrap();
    let output = scmbridge(&["--no-init", script.to_str().unwrap(), "-x", "greeting"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "\"hello\"\n");
}
