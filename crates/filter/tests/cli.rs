//! CLI tests: drive the built `filter` binary end to end.

use std::io::Write as _;
use std::process::{Command, Output, Stdio};

fn run(args: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_filter"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawning filter");
    child
        .stdin
        .as_mut()
        .expect("stdin piped")
        .write_all(input.as_bytes())
        .expect("writing stdin");
    child.wait_with_output().expect("waiting for filter")
}

fn run_ok(args: &[&str], input: &str) -> String {
    let output = run(args, input);
    assert!(
        output.status.success(),
        "filter failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("utf-8 output")
}

#[test]
fn test_scalar_stream() {
    assert_eq!(run_ok(&["--script", "n * 2 + 1"], "1 2 3\n"), "3\n5\n7\n");
}

#[test]
fn test_vector_rows() {
    let out = run_ok(
        &["--script", "{n.y, n.x}", "-i", "2", "-o", "2"],
        "1 2 3 4\n",
    );
    assert_eq!(out, "2 1\n4 3\n");
}

#[test]
fn test_defines_and_script_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("shift.cal");
    std::fs::write(&path, "# add the configured shift\nn + shift\n").expect("writing script");

    let out = run_ok(
        &["--file", path.to_str().expect("utf-8 path"), "-D", "shift=10"],
        "1 2\n",
    );
    assert_eq!(out, "11\n12\n");
}

#[test]
fn test_vector_define() {
    let out = run_ok(
        &["--script", "{n.dot(w)}", "-i", "3", "-o", "1", "-V", "w=1,0,2"],
        "1 2 3\n",
    );
    assert_eq!(out, "7\n");
}

#[test]
fn test_type_alias() {
    let out = run_ok(
        &["--script", "let v: vec2 = {n, n} in v.sum", "-T", "vec2=vector*2"],
        "4\n",
    );
    assert_eq!(out, "8\n");
}

#[test]
fn test_ieee_rendering() {
    assert_eq!(run_ok(&["--script", "1/n"], "0\n"), "+inf\n");
    assert_eq!(run_ok(&["--script", "-1/n"], "0\n"), "-inf\n");
    assert_eq!(run_ok(&["--script", "0/n"], "0\n"), "nan\n");
}

#[test]
fn test_float_precision() {
    assert_eq!(run_ok(&["--script", "n / 2", "-p", "float"], "5\n"), "2.5\n");
}

#[test]
fn test_compilation_error_is_fatal() {
    let output = run(&["--script", "frob(n)"], "1\n");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("compilation error"));
    assert!(stderr.contains("unresolved symbol 'frob'"));
}

#[test]
fn test_mismatched_vector_flags() {
    let output = run(&["--script", "n", "-i", "2"], "1 2\n");
    assert!(!output.status.success());
}
