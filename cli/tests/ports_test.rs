mod data;
use assert_cmd::Command;
use data::data_path;

fn testenv(stack: &str) -> Command {
    let mut cmd = Command::cargo_bin("testenv").unwrap();
    cmd.env_remove("RUST_LOG")
        .args(&["--stack", data_path(stack).to_str().unwrap()]);
    cmd
}

#[test]
fn custom_ports_are_printed() {
    let output = testenv("custom_ports.yaml")
        .args(&["ports", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let parse: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parse["billing"]["postgres"], 25432);
    assert_eq!(parse["billing"]["datastorageMetrics"], 29090);
}

#[test]
fn conflicting_ports_fail() {
    let output = testenv("conflicting_ports.yaml")
        .arg("ports")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("15437"));
}

#[test]
fn whole_table_without_a_stack_file() {
    let output = testenv("missing.yaml")
        .args(&["ports", "--all"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("SUITE"));
    assert!(stdout.contains("notification"));
}

#[test]
fn missing_stack_file_is_reported() {
    let output = testenv("missing.yaml").arg("down").output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.yaml"));
}
