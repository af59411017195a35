//! Fixed-point peephole optimizer.
//!
//! A sweep applies every rewrite at every instruction index, then turns
//! unreachable code into `nop`s and strips all `nop`s. Sweeps repeat while
//! the operand-weighted size keeps shrinking. Temporary-slot reuse joins the
//! sweep only once the other rewrites have settled.

mod rewrites;
mod scope_walk;

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::assembler::SHADER_UNIFORMS;
use crate::vm::{Instruction, Program, RETVAL_SLOT, SymbolTable};
use rewrites::{Edits, Rewrite, sweep_rewrites};
use scope_walk::{Facts, reachable};

/// Upper bound on retries of a repeating rewrite at one index.
const MAX_REPEATS: usize = 64;

/// What one `optimize` call achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeStats {
    pub size_before: usize,
    pub size_after: usize,
    pub instructions_before: usize,
    pub instructions_after: usize,
    pub sweeps: usize,
}

impl std::fmt::Display for OptimizeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "size {} -> {}, instructions {} -> {}, {} sweeps",
            self.size_before, self.size_after, self.instructions_before, self.instructions_after, self.sweeps
        )
    }
}

/// Program-to-program optimizer. Variables named in `preserved` are bound
/// by the host and never renamed or removed.
#[derive(Debug, Clone)]
pub struct Optimizer {
    preserved: Vec<String>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    /// Preserves the shader uniforms.
    pub fn new() -> Self {
        Self::with_preserved(SHADER_UNIFORMS)
    }

    pub fn with_preserved(names: &[&str]) -> Self {
        Self {
            preserved: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Returns an equivalent, usually smaller program. The input is untouched.
    pub fn optimize(&self, program: &Program) -> (Program, OptimizeStats) {
        let preserved = self.preserved_slots(&program.symbols);
        let mut stats = OptimizeStats {
            size_before: program.size(),
            instructions_before: program.len(),
            ..Default::default()
        };

        let mut current = program.clone();
        let mut reuse_slots = false;
        loop {
            let before = current.size();
            current = sweep(&current, &preserved, reuse_slots);
            stats.sweeps += 1;
            debug!(sweep = stats.sweeps, size = current.size(), reuse_slots, "optimizer sweep");

            if current.size() != before {
                continue;
            }
            if !reuse_slots {
                reuse_slots = true;
                continue;
            }
            break;
        }

        let current = drop_unreferenced(current, &preserved);
        stats.size_after = current.size();
        stats.instructions_after = current.len();
        info!(
            size_before = stats.size_before,
            size_after = stats.size_after,
            instructions_before = stats.instructions_before,
            instructions_after = stats.instructions_after,
            sweeps = stats.sweeps,
            "optimized program"
        );
        (current, stats)
    }

    fn preserved_slots(&self, symbols: &SymbolTable) -> HashSet<usize> {
        let mut slots: HashSet<usize> = self
            .preserved
            .iter()
            .filter_map(|name| symbols.slot_of(name))
            .collect();
        slots.insert(RETVAL_SLOT);
        slots
    }
}

/// One pass of every rewrite, then reachability and `nop` stripping.
fn sweep(program: &Program, preserved: &HashSet<usize>, reuse_slots: bool) -> Program {
    let mut instructions = program.instructions.to_vec();
    for rewrite in sweep_rewrites(reuse_slots) {
        instructions = apply(rewrite.as_ref(), instructions, &program.symbols, preserved);
    }
    let instructions = remove_unreachable(instructions);
    strip_nops(&program.with_instructions(instructions))
}

/// Try `rewrite` at every index, rebuilding the facts after each hit.
fn apply(
    rewrite: &dyn Rewrite,
    mut instructions: Vec<Instruction>,
    symbols: &SymbolTable,
    preserved: &HashSet<usize>,
) -> Vec<Instruction> {
    let mut facts = Facts::new(&instructions, symbols, preserved);
    let mut index = 0;
    let mut repeats = 0;
    while index < instructions.len() {
        if let Some(edits) = rewrite.at(&instructions, &facts, index) {
            debug!(rewrite = rewrite.name(), index, "rewrite applied");
            instructions = with_edits(instructions, edits);
            facts = Facts::new(&instructions, symbols, preserved);
            if rewrite.repeats() && repeats < MAX_REPEATS {
                repeats += 1;
                continue;
            }
        }
        repeats = 0;
        index += 1;
    }
    instructions
}

fn with_edits(instructions: Vec<Instruction>, edits: Edits) -> Vec<Instruction> {
    let mut next = instructions;
    for (index, instruction) in edits {
        if let Some(slot) = next.get_mut(index) {
            *slot = instruction;
        }
    }
    next
}

fn remove_unreachable(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let live = reachable(&instructions);
    instructions
        .into_iter()
        .zip(live)
        .map(|(instruction, live)| if live { instruction } else { Instruction::nop() })
        .collect()
}

/// Remove every `nop`, renumbering labels and jump/call targets.
fn strip_nops(program: &Program) -> Program {
    // new_index[i]: position of the first kept instruction at or after i.
    let mut new_index = Vec::with_capacity(program.len() + 1);
    let mut kept = 0;
    for instruction in program.instructions.iter() {
        new_index.push(kept);
        if !instruction.is_nop() {
            kept += 1;
        }
    }
    new_index.push(kept);
    let remap = |old: usize| new_index[old.min(new_index.len() - 1)];

    let instructions = program
        .instructions
        .iter()
        .filter(|i| !i.is_nop())
        .map(|i| {
            let mut i = i.clone();
            if let Some(target) = i.target() {
                i.set_target(remap(target));
            }
            i
        })
        .collect();

    let mut stripped = program.with_instructions(instructions);
    stripped.labels.remap(remap);
    stripped
}

/// Drop labels no jump or call lands on, and symbols no operand mentions.
fn drop_unreferenced(program: Program, preserved: &HashSet<usize>) -> Program {
    let targets: HashSet<usize> = program
        .instructions
        .iter()
        .filter_map(Instruction::target)
        .collect();
    let slots: HashSet<usize> = program
        .instructions
        .iter()
        .flat_map(|i| i.operands.iter().filter_map(|o| o.var_name().map(|n| n.slot)))
        .collect();

    let mut program = program;
    program.labels.retain(|_, index| targets.contains(&index));
    program
        .symbols
        .retain(|slot, _| slots.contains(&slot) || preserved.contains(&slot));
    program
}
