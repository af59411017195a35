//! The assembled unit passed between assembler, optimizer and interpreter.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::ops::OpCode;
use super::value::Operand;
use super::var_name::VarName;

/// Slot → original variable name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    names: BTreeMap<usize, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: usize, name: impl Into<String>) {
        self.names.insert(slot, name.into());
    }

    pub fn name(&self, slot: usize) -> Option<&str> {
        self.names.get(&slot).map(|s| s.as_str())
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(slot, _)| *slot)
    }

    /// The next unused slot.
    pub fn next_slot(&self) -> usize {
        self.names.keys().next_back().map_or(0, |last| last + 1)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(|(slot, name)| (*slot, name.as_str()))
    }

    pub fn retain(&mut self, mut keep: impl FnMut(usize, &str) -> bool) {
        self.names.retain(|slot, name| keep(*slot, name));
    }

    /// Display name for a slot, falling back to its number.
    pub fn display_name(&self, slot: usize) -> String {
        self.name(slot)
            .map(|s| s.to_string())
            .unwrap_or_else(|| slot.to_string())
    }

    /// Compiler temporaries are named `tmpN`.
    pub fn is_temporary(&self, slot: usize) -> bool {
        self.name(slot).is_some_and(|n| has_numbered_prefix(n, "tmp"))
    }

    /// Call arguments are named `argN`.
    pub fn is_function_argument(&self, slot: usize) -> bool {
        self.name(slot).is_some_and(|n| has_numbered_prefix(n, "arg"))
    }

    pub fn render(&self, name: &VarName) -> String {
        name.render(&self.display_name(name.slot))
    }
}

fn has_numbered_prefix(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

/// Label name → instruction index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: BTreeMap<String, usize>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, index: usize) -> Option<usize> {
        self.labels.insert(name.into(), index)
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(name, index)| (name.as_str(), *index))
    }

    /// The name used for an instruction index. When several labels alias one
    /// index, the lexicographically first wins.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, i)| **i == index)
            .map(|(name, _)| name.as_str())
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, usize) -> bool) {
        self.labels.retain(|name, index| keep(name, *index));
    }

    pub fn remap(&mut self, mut f: impl FnMut(usize) -> usize) {
        for index in self.labels.values_mut() {
            *index = f(*index);
        }
    }
}

/// An opcode with its operands and originating source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: OpCode,
    pub operands: Vec<Operand>,
    pub line: Option<usize>,
}

impl Instruction {
    pub fn new(op: OpCode, operands: Vec<Operand>) -> Self {
        Self {
            op,
            operands,
            line: None,
        }
    }

    pub fn nop() -> Self {
        Self::new(OpCode::Nop, Vec::new())
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_operands(&self, operands: Vec<Operand>) -> Self {
        Self {
            op: self.op,
            operands,
            line: self.line,
        }
    }

    pub fn is_nop(&self) -> bool {
        self.op == OpCode::Nop
    }

    /// Jump/call target, if this instruction has one.
    pub fn target(&self) -> Option<usize> {
        if !self.op.has_target() {
            return None;
        }
        self.operands.last().and_then(Operand::label)
    }

    pub fn set_target(&mut self, target: usize) {
        if self.op.has_target() {
            if let Some(last) = self.operands.last_mut() {
                *last = Operand::Label(target);
            }
        }
    }

    /// The variable written by this instruction, if it has one.
    pub fn destination(&self) -> Option<&VarName> {
        match self.op {
            OpCode::Nop
            | OpCode::Halt
            | OpCode::Jmp
            | OpCode::Jmpz
            | OpCode::Jmpnz
            | OpCode::JmpEq
            | OpCode::JmpNe
            | OpCode::JmpLt
            | OpCode::JmpLe
            | OpCode::JmpGt
            | OpCode::JmpGe
            | OpCode::Call
            | OpCode::Ret
            | OpCode::PushFrame
            | OpCode::PopFrame
            | OpCode::Print
            | OpCode::Debug => None,
            _ => self.operands.first().and_then(Operand::var_name),
        }
    }

    /// True if any operand refers to `slot`.
    pub fn uses_slot(&self, slot: usize) -> bool {
        self.operands
            .iter()
            .any(|o| o.var_name().is_some_and(|n| n.slot == slot))
    }

    /// Number of operands referring to `slot`.
    pub fn count_slot(&self, slot: usize) -> usize {
        self.operands
            .iter()
            .filter(|o| o.var_name().is_some_and(|n| n.slot == slot))
            .count()
    }

    /// Operand-weighted size used by the optimizer.
    pub fn weight(&self) -> usize {
        self.operands.len() + 1
    }

    /// Render with symbol names, e.g. `ld $a, 1.0`.
    pub fn render(&self, symbols: &SymbolTable, labels: &LabelTable) -> String {
        let operands: Vec<String> = self
            .operands
            .iter()
            .enumerate()
            .map(|(i, o)| match o {
                Operand::Variable(name) => symbols.render(name),
                Operand::Label(target) if self.op.has_target() && i + 1 == self.operands.len() => {
                    labels
                        .name_at(*target)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| target.to_string())
                }
                Operand::Vector(values) => values
                    .iter()
                    .map(|f| super::value::format_float(*f))
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            })
            .collect();
        if operands.is_empty() {
            self.op.mnemonic().to_string()
        } else {
            format!("{} {}", self.op.mnemonic(), operands.join(", "))
        }
    }
}

/// Instructions plus the tables needed to interpret and display them.
///
/// A `Program` is a value: rewrites build a new one, and the instruction
/// list is shared read-only between interpreters via `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub instructions: Arc<[Instruction]>,
    pub symbols: SymbolTable,
    pub labels: LabelTable,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>, symbols: SymbolTable, labels: LabelTable) -> Self {
        Self {
            instructions: instructions.into(),
            symbols,
            labels,
        }
    }

    /// A new program sharing the tables of this one.
    pub fn with_instructions(&self, instructions: Vec<Instruction>) -> Self {
        Self {
            instructions: instructions.into(),
            symbols: self.symbols.clone(),
            labels: self.labels.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Operand-weighted size: Σ(operands + 1).
    pub fn size(&self) -> usize {
        self.instructions.iter().map(Instruction::weight).sum()
    }

    /// Number of slots needed to hold every variable.
    pub fn slot_count(&self) -> usize {
        let from_code = self
            .instructions
            .iter()
            .flat_map(|i| i.operands.iter())
            .filter_map(Operand::var_name)
            .map(|n| n.slot + 1)
            .max()
            .unwrap_or(0);
        from_code.max(self.symbols.next_slot())
    }

    /// Name of the function containing `ip`: the label of the call target
    /// that entered it.
    pub fn function_name(&self, call_target: usize) -> String {
        self.labels
            .name_at(call_target)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    pub fn render_instruction(&self, ip: usize) -> String {
        self.instructions
            .get(ip)
            .map(|i| i.render(&self.symbols, &self.labels))
            .unwrap_or_default()
    }

    /// Disassemble back to assembler text that re-assembles to an equivalent program.
    pub fn dump(&self) -> String {
        let mut by_index: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for (name, index) in self.labels.iter() {
            by_index.entry(index).or_default().push(name);
        }

        let mut out = String::new();
        for (ip, instruction) in self.instructions.iter().enumerate() {
            if let Some(names) = by_index.get(&ip) {
                for name in names {
                    out.push_str(&format!("{}:\n", name));
                }
            }
            out.push_str("    ");
            out.push_str(&instruction.render(&self.symbols, &self.labels));
            out.push('\n');
        }
        // Labels pointing past the last instruction.
        for (_, names) in by_index.range(self.instructions.len()..) {
            for name in names {
                out.push_str(&format!("{}:\n", name));
            }
        }
        out
    }
}
