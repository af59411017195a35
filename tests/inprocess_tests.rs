//! In-process integration tests.
//!
//! These call the library APIs directly instead of spawning the binary.

use std::path::Path;

use tetra::config::RuntimeConfig;
use tetra::error::{Error, RuntimeErrorKind};
use tetra::pipeline::{self, RunOutcome};
use tetra::vm::{Operand, SharedOutput, Vm};
use tetra::{Assembler, SHADER_UNIFORMS};

fn run(source: &str) -> RunOutcome {
    pipeline::run_source(source, &RuntimeConfig::default(), Box::new(std::io::sink()))
        .unwrap_or_else(|e| panic!("run failed: {}", e))
}

fn run_err(source: &str) -> RuntimeErrorKind {
    match pipeline::run_source(source, &RuntimeConfig::default(), Box::new(std::io::sink())) {
        Err(Error::Runtime(e)) => e.kind,
        Err(other) => panic!("expected a runtime error, got {}", other),
        Ok(_) => panic!("expected a runtime error"),
    }
}

fn global(outcome: &RunOutcome, name: &str) -> Operand {
    outcome
        .globals
        .get(name)
        .cloned()
        .unwrap_or_else(|| panic!("no global {}", name))
}

fn snapshot(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
        .join(name)
}

// Value model

#[test]
fn test_int_arithmetic_stays_int() {
    let outcome = run("ld $a, 6\nadd $a, 4\nsub $a, 3\nmul $a, 5\ndiv $a, 2");
    assert_eq!(global(&outcome, "a"), Operand::Int(17));
}

#[test]
fn test_float_operand_promotes() {
    let outcome = run("ld $a, 6\nadd $a, 0.5\nld $b, 2.0\nmul $b, 3");
    assert_eq!(global(&outcome, "a"), Operand::Float(6.5));
    assert_eq!(global(&outcome, "b"), Operand::Float(6.0));
}

#[test]
fn test_vector_ops_are_elementwise_and_broadcast() {
    let outcome = run("ld $v, 1.0, 2.0, 3.0\nadd $v, 1.0, 1.0, 2.0\nmul $v, 2.0");
    assert_eq!(global(&outcome, "v"), Operand::Vector(vec![4.0, 6.0, 10.0]));
}

#[test]
fn test_vector_length_mismatch_fails() {
    let kind = run_err("ld $v, 1.0, 2.0, 3.0\nadd $v, 1.0, 2.0");
    assert_eq!(kind, RuntimeErrorKind::LengthMismatch { left: 3, right: 2 });
}

#[test]
fn test_concatenating_loads() {
    let outcome = run("ld $a, 1.0\nld $b, 2.0\nld $v, $a, $b");
    assert_eq!(global(&outcome, "v"), Operand::Vector(vec![1.0, 2.0]));
}

#[test]
fn test_swizzle_reads_and_writes() {
    let outcome = run("ld $v, 1.0, 2.0, 3.0, 4.0\nld $s, $v.wzyx\nld $r, $v.g\nld $v.xy, 9.0");
    assert_eq!(global(&outcome, "s"), Operand::Vector(vec![4.0, 3.0, 2.0, 1.0]));
    assert_eq!(global(&outcome, "r"), Operand::Float(2.0));
    assert_eq!(global(&outcome, "v"), Operand::Vector(vec![9.0, 9.0, 3.0, 4.0]));
}

#[test]
fn test_subscript_out_of_range_fails() {
    let kind = run_err("ld $v, 1.0, 2.0\nld $x, $v[2]");
    assert_eq!(kind, RuntimeErrorKind::IndexOutOfRange { index: 2, len: 2 });
}

#[test]
fn test_divide_by_zero_fails() {
    assert_eq!(run_err("ld $a, 7\ndiv $a, 0"), RuntimeErrorKind::DivideByZero);
}

#[test]
fn test_dim_to_huge_width_fails() {
    let kind = run_err("ld $a, 1.0\ndim $a, 9223372036854775807");
    assert!(matches!(kind, RuntimeErrorKind::Shape(_)), "{:?}", kind);
}

#[test]
fn test_non_finite_result_fails() {
    assert!(matches!(run_err("sqrt $a, -1.0"), RuntimeErrorKind::NonFinite(_)));
}

// Scopes and calls

#[test]
fn test_block_shadowing_does_not_leak() {
    let outcome = run("ld $a, 1\npush_frame\ndecl $a\nld $a, 2\npop_frame");
    assert_eq!(global(&outcome, "a"), Operand::Int(1));
}

#[test]
fn test_call_with_arguments() {
    let source = "ld $arg0, 5\nld $arg1, 7\ncall f\nhalt\nf:\nld $a, $arg0\nadd $a, $arg1\nret $a";
    let outcome = run(source);
    assert_eq!(outcome.retval, Some(Operand::Int(12)));
    assert!(!outcome.globals.contains_key("a"));
}

#[test]
fn test_function_frames_hide_callers_locals() {
    let source = "call outer\nhalt\nouter:\nld $x, 1\ncall inner\nret\ninner:\nprint $x\nret";
    assert_eq!(run_err(source), RuntimeErrorKind::Undefined("x".to_string()));
}

#[test]
fn test_globals_visible_inside_functions() {
    let outcome = run("ld $g, 2\ncall f\nhalt\nf:\nld $r, $g\nmul $r, 10\nret $r");
    assert_eq!(outcome.retval, Some(Operand::Int(20)));
}

#[test]
fn test_pop_global_frame_fails() {
    assert_eq!(run_err("pop_frame"), RuntimeErrorKind::PopGlobalFrame);
}

#[test]
fn test_ret_outside_call_fails() {
    assert_eq!(run_err("ret 1"), RuntimeErrorKind::ReturnOutsideCall);
}

#[test]
fn test_self_assignment_fails() {
    assert_eq!(
        run_err("ld $a, 1\nld $a, $a"),
        RuntimeErrorKind::SelfAssignment("a".to_string())
    );
}

#[test]
fn test_execution_ceiling() {
    let config = RuntimeConfig {
        max_instructions: 100,
        ..Default::default()
    };
    let err = pipeline::run_source("loop:\njmp loop", &config, Box::new(std::io::sink())).unwrap_err();
    match err {
        Error::Runtime(e) => assert_eq!(e.kind, RuntimeErrorKind::CeilingExceeded(100)),
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_stack_trace_names_functions() {
    let source = "call outer\nhalt\nouter:\ncall inner\nret\ninner:\nld $a, 1\ndiv $a, 0\nret $a";
    let err = pipeline::run_source(source, &RuntimeConfig::default(), Box::new(std::io::sink())).unwrap_err();
    let Error::Runtime(e) = err else {
        panic!("expected a runtime error");
    };
    assert_eq!(e.stack_trace, vec!["inner", "outer", "<Root>"]);
    assert_eq!(e.line, Some(8));
    assert_eq!(e.instruction, "div $a, 0");
}

// Assembly

#[test]
fn test_dump_reassembles() {
    let source = std::fs::read_to_string(snapshot("shader.tasm")).unwrap();
    let assembler = Assembler::with_uniforms(SHADER_UNIFORMS);
    let first = assembler.assemble(&source).unwrap();
    let second = assembler.assemble(&first.dump()).unwrap();
    assert_eq!(first.instructions.len(), second.instructions.len());
    assert_eq!(first.dump(), second.dump());
}

#[test]
fn test_syntax_errors_abort_assembly() {
    let err = pipeline::compile("ld $a, 1\nld $a\n", false).unwrap_err();
    let Error::Syntax(e) = err else {
        panic!("expected a syntax error");
    };
    assert_eq!(e.line, 2);
}

#[test]
fn test_duplicate_label_fails() {
    let err = pipeline::compile("a:\nnop\na:\nnop", false).unwrap_err();
    assert!(matches!(err, Error::Syntax(ref e) if e.line == 3), "{}", err);
}

// Files and output

#[test]
fn test_run_snapshot_files() {
    for name in ["arithmetic", "call", "scopes", "loop"] {
        let output = SharedOutput::new();
        pipeline::run_file(
            &snapshot(&format!("{}.tasm", name)),
            &RuntimeConfig::default(),
            Box::new(output.clone()),
        )
        .unwrap();
        let expected = std::fs::read_to_string(snapshot(&format!("{}.stdout", name))).unwrap();
        assert_eq!(output.contents(), expected, "{}", name);
    }
}

#[test]
fn test_uniforms_bind_before_run() {
    let program = pipeline::compile_file(&snapshot("shader.tasm"), false).unwrap().0;
    let mut vm = Vm::with_output(Box::new(std::io::sink()));
    vm.add_uniform("fragCoord", Operand::Vector(vec![0.0, 0.0]));
    vm.add_uniform("iResolution", Operand::Vector(vec![4.0, 4.0]));
    vm.add_uniform("iTime", Operand::Float(0.0));
    vm.run(&program).unwrap();

    // cos(0, 2, 4) * 0.5 + 0.5
    let expected: Vec<f64> = [0.0f64, 2.0, 4.0].iter().map(|t| t.cos() * 0.5 + 0.5).collect();
    assert_eq!(vm.retval(), Some(&Operand::Vector(expected)));
}

#[test]
fn test_debug_snapshots_report_changes() {
    let program = pipeline::assemble("ld $a, 1\nld $a, 2").unwrap();
    let diffs = SharedOutput::new();
    let mut vm = Vm::with_output(Box::new(std::io::sink()));
    vm.set_debug_output(Box::new(diffs.clone()));
    vm.run(&program).unwrap();
    let text = diffs.contents();
    assert!(text.contains("a"), "{}", text);
    assert!(text.contains('2'), "{}", text);
}
