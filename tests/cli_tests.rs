//! Tests that drive the `tetra` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn snapshots_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("snapshots")
}

/// Run the tetra CLI and return (stdout, stderr, exit_code)
fn run_tetra(args: &[&str], working_dir: Option<&Path>) -> (String, String, i32) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tetra"));
    cmd.args(args);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().expect("failed to execute tetra");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    (stdout, stderr, exit_code)
}

/// Every `foo.tasm` with a `foo.stdout` next to it must print exactly that,
/// with and without the optimizer.
#[test]
fn test_snapshots() {
    let mut checked = 0;
    let mut entries: Vec<_> = fs::read_dir(snapshots_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "tasm"))
        .collect();
    entries.sort();

    for path in entries {
        let stdout_path = path.with_extension("stdout");
        if !stdout_path.exists() {
            continue;
        }
        let expected = fs::read_to_string(&stdout_path).unwrap();
        let file = path.to_str().unwrap();

        for extra in [None, Some("--optimize")] {
            let mut args = vec!["run", file];
            args.extend(extra);
            let (stdout, stderr, code) = run_tetra(&args, None);
            assert_eq!(code, 0, "{:?} {:?} failed:\n{}", path, extra, stderr);
            assert_eq!(stdout, expected, "{:?} {:?} stdout mismatch", path, extra);
        }
        checked += 1;
    }
    assert!(checked >= 4, "only {} snapshots found", checked);
}

#[test]
fn test_runtime_error_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("div.tasm");
    fs::write(&file, "ld $a, 7\ndiv $a, 0\n").unwrap();

    let (stdout, stderr, code) = run_tetra(&["run", file.to_str().unwrap()], None);
    assert_eq!(code, 1);
    assert!(stdout.is_empty());
    assert!(stderr.contains("[Line 2]"), "stderr: {}", stderr);
    assert!(stderr.contains("divide by zero"), "stderr: {}", stderr);
    assert!(stderr.contains("<Root>"), "stderr: {}", stderr);
}

#[test]
fn test_syntax_error_names_the_line() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.tasm");
    fs::write(&file, "ld $a, 1\nfrobnicate $a\n").unwrap();

    let (_, stderr, code) = run_tetra(&["run", file.to_str().unwrap()], None);
    assert_eq!(code, 1);
    assert!(stderr.contains("[Line 2] Error:"), "stderr: {}", stderr);
}

#[test]
fn test_missing_file() {
    let (_, stderr, code) = run_tetra(&["run", "/nonexistent/missing.tasm"], None);
    assert_eq!(code, 1);
    assert!(stderr.contains("failed to read"), "stderr: {}", stderr);
}

#[test]
fn test_json_globals() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("globals.tasm");
    fs::write(&file, "ld $a, 3\nld $v, 1.0, 2.0\n").unwrap();

    let (stdout, stderr, code) = run_tetra(&["run", file.to_str().unwrap(), "--json"], None);
    assert_eq!(code, 0, "stderr: {}", stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["globals"]["a"], serde_json::json!(3));
    assert_eq!(json["globals"]["v"], serde_json::json!([1.0, 2.0]));
    assert_eq!(json["instructions_executed"], serde_json::json!(2));
}

#[test]
fn test_max_instructions_flag() {
    let file = snapshots_dir().join("loop.tasm");
    let (_, stderr, code) = run_tetra(&["run", file.to_str().unwrap(), "--max-instructions", "5"], None);
    assert_eq!(code, 1);
    assert!(stderr.contains("limit 5"), "stderr: {}", stderr);
}

#[test]
fn test_project_file_sets_runtime_defaults() {
    let dir = tempfile::tempdir().unwrap();
    fs::copy(snapshots_dir().join("loop.tasm"), dir.path().join("loop.tasm")).unwrap();
    fs::write(dir.path().join("tetra.toml"), "[runtime]\nmax-instructions = 8\n").unwrap();

    let (_, stderr, code) = run_tetra(&["run", "loop.tasm"], Some(dir.path()));
    assert_eq!(code, 1);
    assert!(stderr.contains("limit 8"), "stderr: {}", stderr);

    // The flag wins over the file.
    let (stdout, _, code) = run_tetra(&["run", "loop.tasm", "--max-instructions", "1000"], Some(dir.path()));
    assert_eq!(code, 0);
    assert!(stdout.starts_with("total = 55"));
}

#[test]
fn test_asm_output_reassembles() {
    let dir = tempfile::tempdir().unwrap();
    let source = snapshots_dir().join("call.tasm");

    let (dump, stderr, code) = run_tetra(&["asm", source.to_str().unwrap()], None);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(dump.contains("sum:\n"));
    assert!(dump.contains("call sum"));

    let copy = dir.path().join("dumped.tasm");
    fs::write(&copy, &dump).unwrap();
    let (again, _, code) = run_tetra(&["asm", copy.to_str().unwrap()], None);
    assert_eq!(code, 0);
    assert_eq!(again, dump);

    let (stdout, _, code) = run_tetra(&["run", copy.to_str().unwrap()], None);
    assert_eq!(code, 0);
    assert_eq!(stdout, "retval = 12\n");
}

#[test]
fn test_opt_prints_stats_to_stderr() {
    let file = snapshots_dir().join("shader.tasm");
    let (stdout, stderr, code) = run_tetra(&["opt", file.to_str().unwrap()], None);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("call main"));
    assert!(stderr.contains("sweeps"), "stderr: {}", stderr);
}

#[test]
fn test_render_writes_ppm() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("frame.ppm");
    let shader = snapshots_dir().join("shader.tasm");

    let (_, stderr, code) = run_tetra(
        &[
            "render",
            shader.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--width",
            "8",
            "--height",
            "4",
            "--threads",
            "2",
            "--optimize",
        ],
        None,
    );
    assert_eq!(code, 0, "stderr: {}", stderr);

    let bytes = fs::read(&out).unwrap();
    let header = b"P6\n8 4\n255\n";
    assert!(bytes.starts_with(header));
    assert_eq!(bytes.len(), header.len() + 8 * 4 * 3);
}
