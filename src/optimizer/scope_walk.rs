//! Dataflow facts shared by the rewrite passes.
//!
//! The central primitive is the scope walk: starting just after a
//! definition, scan forward until the enclosing function returns or halts.
//! Calls are not followed. A backward jump that re-enters code at or before
//! the walk's start ends the walk without a result, as does any jump that
//! leaves the scanned range or enters it from outside.

use std::collections::HashSet;
use std::ops::Range;

use crate::vm::{Instruction, OpCode, Shape, SymbolTable};

/// A straight scan `[start, end)`. `end` is one past the terminating `ret`/`halt`
/// (or the program length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn indices(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices().contains(&index)
    }
}

/// Where the forward scan from `start` stops.
pub fn end_of_scope(instructions: &[Instruction], start: usize) -> usize {
    instructions
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, i)| matches!(i.op, OpCode::Ret | OpCode::Halt))
        .map_or(instructions.len(), |(j, _)| j + 1)
}

/// Program-wide facts, rebuilt after every applied rewrite.
pub struct Facts<'a> {
    symbols: &'a SymbolTable,
    preserved: &'a HashSet<usize>,
    targets: HashSet<usize>,
    root_slots: HashSet<usize>,
    declared: HashSet<usize>,
}

impl<'a> Facts<'a> {
    pub fn new(instructions: &[Instruction], symbols: &'a SymbolTable, preserved: &'a HashSet<usize>) -> Self {
        let targets = instructions.iter().filter_map(Instruction::target).collect();
        let declared = instructions
            .iter()
            .filter(|i| i.op == OpCode::Decl)
            .flat_map(|i| i.operands.iter().filter_map(|o| o.var_name().map(|n| n.slot)))
            .collect();
        Self {
            symbols,
            preserved,
            targets,
            root_slots: root_slots(instructions),
            declared,
        }
    }

    /// Some jump or call lands on `index`.
    pub fn is_target(&self, index: usize) -> bool {
        self.targets.contains(&index)
    }

    /// The slot lives only in function frames: it is never touched by
    /// root-level code, is not a call argument, and is not host-visible.
    pub fn is_local(&self, slot: usize) -> bool {
        !self.preserved.contains(&slot)
            && !self.symbols.is_function_argument(slot)
            && !self.root_slots.contains(&slot)
    }

    pub fn is_local_temporary(&self, slot: usize) -> bool {
        self.is_local(slot) && self.symbols.is_temporary(slot)
    }

    /// The scope walk from `start`, or `None` when control can enter or
    /// leave the scanned range other than through its ends.
    pub fn span(&self, instructions: &[Instruction], start: usize) -> Option<Span> {
        if start > instructions.len() {
            return None;
        }
        let len = instructions.len();
        let span = Span {
            start,
            end: end_of_scope(instructions, start),
        };

        for j in span.indices() {
            let instruction = &instructions[j];
            if !instruction.op.is_jump() {
                continue;
            }
            let target = instruction.target()?;
            // A jump back to `start` reruns the span without its definition.
            let inside =
                (span.contains(target) && target > span.start) || (span.end == len && target == len);
            if !inside {
                return None;
            }
        }

        let entered_from_outside = instructions.iter().enumerate().any(|(j, i)| {
            !span.contains(j) && i.target().is_some_and(|t| span.contains(t))
        });
        if entered_from_outside {
            return None;
        }
        Some(span)
    }

    /// No `decl` of `slot` in the span, and no frame push/pop when `slot` is
    /// ever declared, so every reference in the span names one binding.
    pub fn binding_is_stable(&self, instructions: &[Instruction], span: Span, slot: usize) -> bool {
        let frame_ops = self.declared.contains(&slot);
        span.indices().all(|j| {
            let i = &instructions[j];
            match i.op {
                OpCode::Decl => !i.uses_slot(slot),
                OpCode::PushFrame | OpCode::PopFrame => !frame_ops,
                _ => true,
            }
        })
    }
}

/// Indices in `span` whose instruction mentions `slot`.
pub fn users(instructions: &[Instruction], span: Span, slot: usize) -> Vec<usize> {
    span.indices()
        .filter(|&j| instructions[j].uses_slot(slot))
        .collect()
}

/// The instruction may change the binding of `slot`.
pub fn writes_slot(instruction: &Instruction, slot: usize) -> bool {
    match instruction.op {
        OpCode::Decl => instruction.uses_slot(slot),
        _ => instruction.destination().is_some_and(|d| d.slot == slot),
    }
}

/// Operand `index` is only read, never written.
pub fn is_read_position(instruction: &Instruction, index: usize) -> bool {
    instruction.op != OpCode::Decl && (index > 0 || instruction.destination().is_none())
}

/// Operand `index` may hold a constant.
pub fn accepts_value(op: OpCode, index: usize) -> bool {
    op.signatures().iter().any(|s| {
        let shape = s.fixed.get(index).copied().or(s.tail);
        shape == Some(Shape::Value)
    })
}

/// First operand of the run that is concatenated into one value, if the
/// opcode takes such a run.
pub fn concat_start(op: OpCode) -> Option<usize> {
    op.signatures()
        .iter()
        .find(|s| s.tail == Some(Shape::Value))
        .map(|s| s.fixed.len().saturating_sub(1))
}

/// Slots referenced by code that runs with no call active, i.e. bindings
/// that live in the Global frame.
fn root_slots(instructions: &[Instruction]) -> HashSet<usize> {
    let mut seen = vec![false; instructions.len()];
    let mut pending = vec![0];
    let mut slots = HashSet::new();
    while let Some(ip) = pending.pop() {
        if ip >= instructions.len() || seen[ip] {
            continue;
        }
        seen[ip] = true;
        let instruction = &instructions[ip];
        slots.extend(
            instruction
                .operands
                .iter()
                .filter_map(|o| o.var_name().map(|n| n.slot)),
        );
        match instruction.op {
            OpCode::Ret | OpCode::Halt => {}
            OpCode::Jmp => pending.extend(instruction.target()),
            op if op.is_jump() => {
                pending.extend(instruction.target());
                pending.push(ip + 1);
            }
            _ => pending.push(ip + 1),
        }
    }
    slots
}

/// Instructions reachable from 0 along every jump and call edge.
pub fn reachable(instructions: &[Instruction]) -> Vec<bool> {
    let mut seen = vec![false; instructions.len()];
    let mut pending = vec![0];
    while let Some(ip) = pending.pop() {
        if ip >= instructions.len() || seen[ip] {
            continue;
        }
        seen[ip] = true;
        let instruction = &instructions[ip];
        if instruction.op.has_target() {
            pending.extend(instruction.target());
        }
        if !instruction.op.ends_block() {
            pending.push(ip + 1);
        }
    }
    seen
}
