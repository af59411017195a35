//! Load, assemble, optionally optimize, and run Tetra programs.
//!
//! The CLI, the integration tests and the bench all go through here.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::assembler::{Assembler, SHADER_UNIFORMS};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::optimizer::{OptimizeStats, Optimizer};
use crate::vm::{Operand, Program, SharedOutput, Vm};

/// Final state of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Global-frame variables by name
    pub globals: BTreeMap<String, Operand>,
    pub retval: Option<Operand>,
    pub instructions_executed: usize,
    /// Present when the program was optimized first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize: Option<OptimizeStats>,
}

pub fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Assemble with the shader uniforms pre-registered.
pub fn assemble(source: &str) -> Result<Program> {
    Ok(Assembler::with_uniforms(SHADER_UNIFORMS).assemble(source)?)
}

/// Assemble and, if asked, optimize.
pub fn compile(source: &str, optimize: bool) -> Result<(Program, Option<OptimizeStats>)> {
    // Assembly
    let program = assemble(source)?;
    debug!(instructions = program.len(), size = program.size(), "assembled");

    // Optimization
    if !optimize {
        return Ok((program, None));
    }
    let (program, stats) = Optimizer::new().optimize(&program);
    Ok((program, Some(stats)))
}

pub fn compile_file(path: &Path, optimize: bool) -> Result<(Program, Option<OptimizeStats>)> {
    let source = read_source(path)?;
    compile(&source, optimize)
}

/// Run an already-built program on a fresh `Vm`.
pub fn run_program(program: &Program, config: &RuntimeConfig, output: Box<dyn Write>) -> Result<RunOutcome> {
    let mut vm = Vm::new_with_config(config, output);
    vm.run(program)?;
    Ok(RunOutcome {
        globals: vm.globals(program).into_iter().collect(),
        retval: vm.retval().cloned(),
        instructions_executed: vm.instructions_executed(),
        optimize: None,
    })
}

/// Compile and run source text.
pub fn run_source(source: &str, config: &RuntimeConfig, output: Box<dyn Write>) -> Result<RunOutcome> {
    let (program, stats) = compile(source, config.optimize)?;

    // Execution
    let mut outcome = run_program(&program, config, output)?;
    outcome.optimize = stats;
    Ok(outcome)
}

pub fn run_file(path: &Path, config: &RuntimeConfig, output: Box<dyn Write>) -> Result<RunOutcome> {
    let source = read_source(path)?;
    run_source(&source, config, output)
}

/// Run source text, collecting everything it prints.
pub fn capture(source: &str, config: &RuntimeConfig) -> Result<(RunOutcome, Vec<String>)> {
    let output = SharedOutput::new();
    let outcome = run_source(source, config, Box::new(output.clone()))?;
    Ok((outcome, output.lines()))
}
