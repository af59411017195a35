//! `run(P)` and `run(optimize(P))` must agree.
//!
//! Each program is run before and after optimization with the same
//! uniforms; printed output, `retval` and every global must match, and the
//! optimized program must be no larger.

use tetra::config::RuntimeConfig;
use tetra::optimizer::Optimizer;
use tetra::pipeline;
use tetra::vm::{Operand, Program, SharedOutput, Vm};

const FIBONACCI: &str = r#"
    #
    # Print the first 10 Fibonacci numbers.
    #
    ld $i, 0
    ld $count, 10

loop:
    ld $c, $i
    ge $c, $count
    jmp_nz $c, done

    ld $arg0, $i
    call fib
    print $retval
    inc $i
    jmp loop

done:
    halt

fib:
    ld $n, $arg0
    ld $c, $n
    le $c, 1
    jmp_nz $c, base_case

    # fib(n - 1)
    ld $arg0, $n
    dec $arg0
    call fib
    ld $a, $retval

    # fib(n - 2)
    ld $arg0, $n
    dec $arg0
    dec $arg0
    call fib
    ld $b, $retval

    add $a, $b
    ret $a

base_case:
    ret $n
"#;

const TEMPORARIES: &str = r#"
    call main
    halt
main:
    decl $x, $y
    ld $tmp1, 2.0
    ld $x, $tmp1
    ld $tmp2, $x
    mul $tmp2, 3.0
    ld $y, $tmp2
    ld $tmp3, $y
    add $tmp3, 1
    ret $tmp3
"#;

const LOOP_IN_FUNCTION: &str = r#"
    call main
    halt
main:
    ld $sum, 0.0
    ld $i, 0
loop:
    ld $tmp1, $i
    mul $tmp1, 0.5
    add $sum, $tmp1
    inc $i
    jmp_lt $i, 8, loop
    ret $sum
"#;

const BLOCK_SCOPES: &str = r#"
    call main
    halt
main:
    decl $b
    ld $a, 1.0
    push_frame
    decl $a
    ld $a, 5.0
    ld $b, $a
    pop_frame
    add $b, $a
    ret $b
"#;

const SWIZZLES: &str = r#"
    call main
    halt
main:
    ld $tmp1, 1.0, 2.0, 3.0
    ld $v, $tmp1
    ld $tmp2, $v.zyx
    add $tmp2, $v
    ld $w, $tmp2.xy
    neg $w
    ld $tmp3, 2.0
    neg $tmp3
    mul $w, $tmp3
    ret $w, $v.z
"#;

const COPY_BEFORE_LOOP: &str = r#"
    call main
    halt
main:
    ld $a, 1
    ld $x, 0
    ld $t, $a
loop:
    add $x, $t
    inc $a
    jmp_lt $a, 5, loop
    ret $x
"#;

const SHADER: &str = include_str!("snapshots/shader.tasm");
const RINGS: &str = include_str!("../bench/shaders/rings.tasm");

/// Everything observable about one run.
#[derive(Debug, PartialEq)]
struct Observed {
    output: Vec<String>,
    retval: Option<Operand>,
    globals: Vec<(String, Operand)>,
}

fn observe(program: &Program, uniforms: &[(&str, Operand)]) -> Observed {
    let config = RuntimeConfig {
        max_instructions: 1_000_000,
        ..Default::default()
    };
    let output = SharedOutput::new();
    let mut vm = Vm::new_with_config(&config, Box::new(output.clone()));
    for (name, value) in uniforms {
        vm.add_uniform(name, value.clone());
    }
    vm.run(program).unwrap_or_else(|e| panic!("run failed: {}\n{}", e, program.dump()));
    let mut globals = vm.globals(program);
    globals.sort_by(|a, b| a.0.cmp(&b.0));
    Observed {
        output: output.lines(),
        retval: vm.retval().cloned(),
        globals,
    }
}

/// Optimize `source`, check equivalence, and return the plain run.
fn check_equivalent(source: &str, uniforms: &[(&str, Operand)]) -> (Observed, Program) {
    let program = pipeline::assemble(source).unwrap();
    let (optimized, stats) = Optimizer::new().optimize(&program);

    assert!(stats.size_after <= stats.size_before, "{}", stats);
    assert!(optimized.len() <= program.len());
    assert!(optimized.labels.len() <= program.labels.len());
    assert!(optimized.symbols.len() <= program.symbols.len());

    let before = observe(&program, uniforms);
    let after = observe(&optimized, uniforms);
    assert_eq!(before, after, "optimized program:\n{}", optimized.dump());
    (before, optimized)
}

#[test]
fn test_fibonacci() {
    let (observed, _) = check_equivalent(FIBONACCI, &[]);
    let expected: Vec<String> = [0, 1, 1, 2, 3, 5, 8, 13, 21, 34]
        .iter()
        .map(|n| format!("retval = {}", n))
        .collect();
    assert_eq!(observed.output, expected);
    assert_eq!(observed.retval, Some(Operand::Int(34)));
}

#[test]
fn test_compiler_temporaries_shrink() {
    let (observed, optimized) = check_equivalent(TEMPORARIES, &[]);
    assert_eq!(observed.retval, Some(Operand::Float(7.0)));

    let original = pipeline::assemble(TEMPORARIES).unwrap();
    assert!(optimized.size() < original.size());
    assert!(optimized.symbols.slot_of("tmp1").is_none());
}

#[test]
fn test_loop_in_function() {
    let (observed, optimized) = check_equivalent(LOOP_IN_FUNCTION, &[]);
    assert_eq!(observed.retval, Some(Operand::Float(14.0)));
    assert!(optimized.labels.contains("loop"));
}

#[test]
fn test_block_scopes() {
    let (observed, _) = check_equivalent(BLOCK_SCOPES, &[]);
    assert_eq!(observed.retval, Some(Operand::Float(6.0)));
}

#[test]
fn test_swizzles() {
    let (observed, _) = check_equivalent(SWIZZLES, &[]);
    assert_eq!(observed.retval, Some(Operand::Vector(vec![8.0, 8.0, 3.0])));
}

#[test]
fn test_copy_before_loop_is_not_folded_into_body() {
    let (observed, optimized) = check_equivalent(COPY_BEFORE_LOOP, &[]);
    assert_eq!(observed.retval, Some(Operand::Int(4)));
    assert!(!optimized.dump().contains("add $x, $a"), "{}", optimized.dump());
}

#[test]
fn test_shader_across_pixels() {
    let resolution = Operand::Vector(vec![16.0, 9.0]);
    for (x, y, time) in [(0.0, 0.0, 0.0), (3.0, 4.0, 0.5), (15.0, 9.0, 2.25)] {
        let uniforms = [
            ("fragCoord", Operand::Vector(vec![x, y])),
            ("iResolution", resolution.clone()),
            ("iTime", Operand::Float(time)),
        ];
        check_equivalent(RINGS, &uniforms);
        let (observed, optimized) = check_equivalent(SHADER, &uniforms);
        assert_eq!(observed.retval.as_ref().map(Operand::len), Some(3));
        // Host-bound names survive.
        for name in ["fragCoord", "iResolution", "iTime"] {
            assert!(optimized.symbols.slot_of(name).is_some(), "{} was dropped", name);
        }
    }
}

#[test]
fn test_temporaries_in_shader_are_folded() {
    let program = pipeline::assemble(RINGS).unwrap();
    let (optimized, stats) = Optimizer::new().optimize(&program);
    assert!(stats.size_after < stats.size_before, "{}", stats);
    assert!(optimized.symbols.slot_of("tmp1").is_none(), "{}", optimized.dump());
}

#[test]
fn test_snapshot_programs() {
    for name in ["arithmetic", "call", "scopes", "loop"] {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("snapshots")
            .join(format!("{}.tasm", name));
        let source = std::fs::read_to_string(path).unwrap();
        check_equivalent(&source, &[]);
    }
}
