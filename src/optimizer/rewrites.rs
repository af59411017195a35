use std::collections::HashSet;

use super::scope_walk::{
    accepts_value, concat_start, is_read_position, users, writes_slot, Facts,
};
use crate::vm::{Instruction, OpCode, Operand, VarName};

/// Replacement instructions keyed by index.
pub type Edits = Vec<(usize, Instruction)>;

/// A local rewrite tried at every instruction index.
pub trait Rewrite {
    /// The name of this rewrite (e.g., "inline-temps").
    fn name(&self) -> &str;

    /// Edits for the pattern anchored at `index`, if it matches there.
    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits>;

    /// Keep retrying the same index after a successful rewrite.
    fn repeats(&self) -> bool {
        false
    }
}

/// The rewrites of one sweep, in application order.
pub fn sweep_rewrites(reuse_slots: bool) -> Vec<Box<dyn Rewrite>> {
    let mut rewrites: Vec<Box<dyn Rewrite>> = vec![
        Box::new(InlineConstantLoad),
        Box::new(RemoveRedundantDim),
        Box::new(FoldNegatedConstantLoad),
        Box::new(PruneUnusedDeclarations),
        Box::new(RemoveJumpToNext),
        Box::new(InlineLoadUsedNext),
        Box::new(CombineAdjacentDecls),
        Box::new(FoldResultIntoDestination),
        Box::new(InlineTemps),
    ];
    if reuse_slots {
        rewrites.push(Box::new(ReuseExpiredTemporaries));
    }
    rewrites.push(Box::new(RemoveSwapBack));
    rewrites.push(Box::new(CollapseCopyRoundTrip));
    rewrites.push(Box::new(DeduplicateDeclarations));
    rewrites.push(Box::new(FoldLoadIntoUnaryOp));
    rewrites.push(Box::new(IncrementByOne));
    rewrites
}

// ============================================================================
// Helpers
// ============================================================================

/// A whole-variable reference: no subscript or swizzle.
fn plain(operand: &Operand) -> Option<&VarName> {
    operand.var_name().filter(|n| !n.is_component())
}

fn refers_to(operand: &Operand, slot: usize) -> bool {
    operand.var_name().is_some_and(|n| n.slot == slot)
}

/// `print`/`debug` render variable names, so their operands stay as written.
fn is_emit(op: OpCode) -> bool {
    matches!(op, OpCode::Print | OpCode::Debug)
}

/// `ld $v, c...` with only numeric literals as sources.
fn constant_load(instruction: &Instruction) -> Option<(&VarName, &[Operand])> {
    if instruction.op != OpCode::Ld || instruction.operands.len() < 2 {
        return None;
    }
    let dst = plain(&instruction.operands[0])?;
    let sources = &instruction.operands[1..];
    sources
        .iter()
        .all(Operand::is_numeric)
        .then_some((dst, sources))
}

/// `ld $a, $b` where both sides are whole variables in different slots.
fn copy(instruction: &Instruction) -> Option<(&VarName, &VarName)> {
    if instruction.op != OpCode::Ld || instruction.operands.len() != 2 {
        return None;
    }
    let dst = plain(&instruction.operands[0])?;
    let src = plain(&instruction.operands[1])?;
    (dst.slot != src.slot).then_some((dst, src))
}

/// `ld $a, $a` fails at runtime; a rewrite must never produce it.
fn is_self_load(instruction: &Instruction) -> bool {
    match (instruction.op, instruction.operands.as_slice()) {
        (OpCode::Ld, [Operand::Variable(dst), Operand::Variable(src)]) => dst == src,
        _ => false,
    }
}

/// Rewrite every read of `slot` in `instruction` with `replace`. Fails if
/// the slot also appears in a written position.
fn replace_reads(
    instruction: &Instruction,
    slot: usize,
    replace: impl Fn(&VarName) -> Option<Operand>,
) -> Option<Instruction> {
    let mut operands = Vec::with_capacity(instruction.operands.len());
    for (position, operand) in instruction.operands.iter().enumerate() {
        match operand.var_name() {
            Some(name) if name.slot == slot => {
                if !is_read_position(instruction, position) {
                    return None;
                }
                operands.push(replace(name)?);
            }
            _ => operands.push(operand.clone()),
        }
    }
    let rewritten = instruction.with_operands(operands);
    (!is_self_load(&rewritten)).then_some(rewritten)
}

fn negate(operand: &Operand) -> Operand {
    match operand {
        Operand::Int(n) => Operand::Int(n.wrapping_neg()),
        Operand::Float(f) => Operand::Float(-f),
        Operand::Vector(v) => Operand::Vector(v.iter().map(|x| -x).collect()),
        other => other.clone(),
    }
}

// ============================================================================
// Rewrites
// ============================================================================

/// `ld $v, 1.0` whose only reader in scope is one operand: splice the
/// literal into the reader and drop the load.
pub struct InlineConstantLoad;

impl Rewrite for InlineConstantLoad {
    fn name(&self) -> &str {
        "inline-constant-load"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let (dst, constants) = constant_load(&instructions[index])?;
        if !facts.is_local(dst.slot) {
            return None;
        }
        let span = facts.span(instructions, index + 1)?;
        if !facts.binding_is_stable(instructions, span, dst.slot) {
            return None;
        }
        let readers = users(instructions, span, dst.slot);
        let &[reader] = readers.as_slice() else {
            return None;
        };

        let target = &instructions[reader];
        if is_emit(target.op) || target.count_slot(dst.slot) != 1 {
            return None;
        }
        let position = target
            .operands
            .iter()
            .position(|o| refers_to(o, dst.slot))?;
        if plain(&target.operands[position]).is_none() || !is_read_position(target, position) {
            return None;
        }
        let fits = if constants.len() == 1 {
            accepts_value(target.op, position)
        } else {
            concat_start(target.op).is_some_and(|start| position >= start)
        };
        if !fits {
            return None;
        }

        let mut operands = target.operands.clone();
        operands.splice(position..=position, constants.iter().cloned());
        Some(vec![
            (index, Instruction::nop()),
            (reader, target.with_operands(operands)),
        ])
    }
}

/// `dim` right after a literal load of the same width.
pub struct RemoveRedundantDim;

impl Rewrite for RemoveRedundantDim {
    fn name(&self) -> &str {
        "remove-redundant-dim"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let instruction = &instructions[index];
        if instruction.op != OpCode::Dim || index == 0 || facts.is_target(index) {
            return None;
        }
        let var = plain(instruction.operands.first()?)?;
        let width = instruction.operands.get(1)?.as_int().ok()?;
        let (dst, constants) = constant_load(&instructions[index - 1])?;
        let loaded: usize = constants.iter().map(Operand::len).sum();
        (dst.slot == var.slot && usize::try_from(width).ok() == Some(loaded))
            .then(|| vec![(index, Instruction::nop())])
    }
}

/// `ld $v, 2.0` + `neg $v` becomes `ld $v, -2.0`.
pub struct FoldNegatedConstantLoad;

impl Rewrite for FoldNegatedConstantLoad {
    fn name(&self) -> &str {
        "fold-negated-constant-load"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let instruction = &instructions[index];
        if instruction.op != OpCode::Neg || index == 0 || facts.is_target(index) {
            return None;
        }
        let var = plain(instruction.operands.first()?)?;
        let load = &instructions[index - 1];
        let (dst, constants) = constant_load(load)?;
        if dst.slot != var.slot {
            return None;
        }
        let mut operands = vec![load.operands[0].clone()];
        operands.extend(constants.iter().map(negate));
        Some(vec![
            (index - 1, load.with_operands(operands)),
            (index, Instruction::nop()),
        ])
    }
}

/// Drop `decl` entries for locals nothing in scope refers to.
pub struct PruneUnusedDeclarations;

impl Rewrite for PruneUnusedDeclarations {
    fn name(&self) -> &str {
        "prune-unused-declarations"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let instruction = &instructions[index];
        if instruction.op != OpCode::Decl {
            return None;
        }
        let span = facts.span(instructions, index + 1)?;
        let kept: Vec<Operand> = instruction
            .operands
            .iter()
            .filter(|o| {
                o.var_name().is_none_or(|n| {
                    !facts.is_local(n.slot) || !users(instructions, span, n.slot).is_empty()
                })
            })
            .cloned()
            .collect();
        if kept.len() == instruction.operands.len() {
            return None;
        }
        let replacement = if kept.is_empty() {
            Instruction::nop()
        } else {
            instruction.with_operands(kept)
        };
        Some(vec![(index, replacement)])
    }
}

/// A jump to the very next instruction.
pub struct RemoveJumpToNext;

impl Rewrite for RemoveJumpToNext {
    fn name(&self) -> &str {
        "remove-jump-to-next"
    }

    fn at(&self, instructions: &[Instruction], _facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let instruction = &instructions[index];
        (instruction.op.is_jump() && instruction.target() == Some(index + 1))
            .then(|| vec![(index, Instruction::nop())])
    }
}

/// `ld $t, $src` read only by the next instruction: read `$src` there instead.
pub struct InlineLoadUsedNext;

impl Rewrite for InlineLoadUsedNext {
    fn name(&self) -> &str {
        "inline-load-used-next"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let instruction = &instructions[index];
        if instruction.op != OpCode::Ld || instruction.operands.len() != 2 {
            return None;
        }
        let dst = plain(&instruction.operands[0])?;
        let src = instruction.operands[1].var_name()?;
        if src.slot == dst.slot || !facts.is_local(dst.slot) {
            return None;
        }
        let span = facts.span(instructions, index + 1)?;
        if !facts.binding_is_stable(instructions, span, dst.slot)
            || users(instructions, span, dst.slot) != [index + 1]
        {
            return None;
        }

        let next = &instructions[index + 1];
        if is_emit(next.op) {
            return None;
        }
        let rewritten = replace_reads(next, dst.slot, |name| {
            if !name.is_component() {
                Some(Operand::Variable(src.clone()))
            } else if !src.is_component() {
                Some(Operand::Variable(name.renamed_to(src.slot)))
            } else {
                None
            }
        })?;
        Some(vec![(index, Instruction::nop()), (index + 1, rewritten)])
    }
}

/// Merge the `decl`s of one straight-line run into the first.
pub struct CombineAdjacentDecls;

impl Rewrite for CombineAdjacentDecls {
    fn name(&self) -> &str {
        "combine-adjacent-decls"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let first = &instructions[index];
        if first.op != OpCode::Decl {
            return None;
        }
        let mut merged = first.operands.clone();
        let mut touched: HashSet<usize> = HashSet::new();
        let mut edits = Vec::new();

        for (j, next) in instructions.iter().enumerate().skip(index + 1) {
            if facts.is_target(j)
                || next.op.has_target()
                || matches!(
                    next.op,
                    OpCode::Ret | OpCode::Halt | OpCode::PushFrame | OpCode::PopFrame
                )
            {
                break;
            }
            let slots: Vec<usize> = next
                .operands
                .iter()
                .filter_map(|o| o.var_name().map(|n| n.slot))
                .collect();
            if next.op == OpCode::Decl {
                // Hoisting past a reference would change which binding it sees.
                if slots.iter().any(|s| touched.contains(s)) {
                    break;
                }
                for operand in &next.operands {
                    let known = operand
                        .var_name()
                        .is_some_and(|n| merged.iter().any(|m| refers_to(m, n.slot)));
                    if !known {
                        merged.push(operand.clone());
                    }
                }
                edits.push((j, Instruction::nop()));
            } else {
                touched.extend(slots);
            }
        }

        if edits.is_empty() {
            return None;
        }
        edits.push((index, first.with_operands(merged)));
        Some(edits)
    }
}

/// `op $tmp, x...` + `ld $c, $tmp` becomes `op $c, x...` when the
/// temporary is dead afterwards.
pub struct FoldResultIntoDestination;

impl Rewrite for FoldResultIntoDestination {
    fn name(&self) -> &str {
        "fold-result-into-destination"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let instruction = &instructions[index];
        if !instruction.op.is_direct_assignment() {
            return None;
        }
        let tmp = plain(instruction.operands.first()?)?;
        if !facts.is_local_temporary(tmp.slot) {
            return None;
        }
        let next = instructions.get(index + 1)?;
        if next.op != OpCode::Ld || next.operands.len() != 2 || facts.is_target(index + 1) {
            return None;
        }
        let dst = next.operands[0].var_name()?;
        if dst.slot == tmp.slot || plain(&next.operands[1]).map(|n| n.slot) != Some(tmp.slot) {
            return None;
        }
        let span = facts.span(instructions, index + 2)?;
        if !users(instructions, span, tmp.slot).is_empty() {
            return None;
        }

        let mut operands = instruction.operands.clone();
        operands[0] = Operand::Variable(dst.clone());
        let rewritten = instruction.with_operands(operands);
        if is_self_load(&rewritten) {
            return None;
        }
        Some(vec![(index, rewritten), (index + 1, Instruction::nop())])
    }
}

/// `ld $tmp, $src` with one later reader and `$src` unchanged in between:
/// the reader reads `$src` directly.
pub struct InlineTemps;

impl Rewrite for InlineTemps {
    fn name(&self) -> &str {
        "inline-temps"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let (tmp, src) = copy(&instructions[index])?;
        if !facts.is_local_temporary(tmp.slot) {
            return None;
        }
        let span = facts.span(instructions, index + 1)?;
        if !facts.binding_is_stable(instructions, span, tmp.slot)
            || !facts.binding_is_stable(instructions, span, src.slot)
        {
            return None;
        }
        let readers = users(instructions, span, tmp.slot);
        let &[reader] = readers.as_slice() else {
            return None;
        };
        if is_emit(instructions[reader].op) {
            return None;
        }

        let src_changes = span.indices().any(|j| {
            let i = &instructions[j];
            writes_slot(i, src.slot) || (i.op == OpCode::Call && !facts.is_local(src.slot))
        });
        if src_changes {
            return None;
        }

        let rewritten = replace_reads(&instructions[reader], tmp.slot, |name| {
            Some(Operand::Variable(name.renamed_to(src.slot)))
        })?;
        Some(vec![(index, Instruction::nop()), (reader, rewritten)])
    }
}

/// Rename a later temporary's live range onto a temporary whose last use
/// has already passed. Only applied in straight-line code.
pub struct ReuseExpiredTemporaries;

struct LiveRange {
    slot: usize,
    def: usize,
    last: usize,
}

impl Rewrite for ReuseExpiredTemporaries {
    fn name(&self) -> &str {
        "reuse-expired-temporaries"
    }

    fn repeats(&self) -> bool {
        true
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let span = facts.span(instructions, index + 1)?;
        let range = index..span.end;
        let branching = range.clone().any(|j| {
            let i = &instructions[j];
            i.op.is_jump()
                || matches!(i.op, OpCode::PushFrame | OpCode::PopFrame)
                || (j > index && facts.is_target(j))
        });
        if branching {
            return None;
        }

        let mut seen = HashSet::new();
        let mut ranges = Vec::new();
        for j in range.clone() {
            let i = &instructions[j];
            if !i.op.is_direct_assignment() {
                continue;
            }
            let Some(tmp) = i.operands.first().and_then(plain) else {
                continue;
            };
            if !facts.is_local_temporary(tmp.slot) || !seen.insert(tmp.slot) {
                continue;
            }
            // The definition must not read the value it replaces.
            if i.operands[1..].iter().any(|o| refers_to(o, tmp.slot)) {
                continue;
            }
            let declared = range
                .clone()
                .any(|k| instructions[k].op == OpCode::Decl && instructions[k].uses_slot(tmp.slot));
            if declared {
                continue;
            }
            let last = range
                .clone()
                .rev()
                .find(|&k| instructions[k].uses_slot(tmp.slot))
                .unwrap_or(j);
            ranges.push(LiveRange {
                slot: tmp.slot,
                def: j,
                last,
            });
        }

        let (expired, later) = ranges.iter().find_map(|a| {
            ranges
                .iter()
                .find(|b| b.slot != a.slot && b.def > a.last)
                .map(|b| (a, b))
        })?;

        let edits = (later.def..=later.last)
            .filter(|&k| instructions[k].uses_slot(later.slot))
            .map(|k| {
                let i = &instructions[k];
                let operands = i
                    .operands
                    .iter()
                    .map(|o| match o.var_name() {
                        Some(n) if n.slot == later.slot => Operand::Variable(n.renamed_to(expired.slot)),
                        _ => o.clone(),
                    })
                    .collect();
                (k, i.with_operands(operands))
            })
            .collect();
        Some(edits)
    }
}

/// `ld $a, $b` + `ld $b, $a`: the second copy changes nothing.
pub struct RemoveSwapBack;

impl Rewrite for RemoveSwapBack {
    fn name(&self) -> &str {
        "remove-swap-back"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let (a, b) = copy(&instructions[index])?;
        let (back_dst, back_src) = copy(instructions.get(index + 1)?)?;
        (back_dst.slot == b.slot && back_src.slot == a.slot && !facts.is_target(index + 1))
            .then(|| vec![(index + 1, Instruction::nop())])
    }
}

/// `ld $b, $a` + `op $b, x...` + `ld $a, $b` becomes `op $a, x...`.
pub struct CollapseCopyRoundTrip;

impl Rewrite for CollapseCopyRoundTrip {
    fn name(&self) -> &str {
        "collapse-copy-round-trip"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let (b, a) = copy(&instructions[index])?;
        if !facts.is_local(b.slot) {
            return None;
        }
        let op = instructions.get(index + 1)?;
        let (back_dst, back_src) = copy(instructions.get(index + 2)?)?;
        if back_dst.slot != a.slot || back_src.slot != b.slot {
            return None;
        }
        if facts.is_target(index + 1) || facts.is_target(index + 2) {
            return None;
        }
        let writes_b = op
            .operands
            .first()
            .and_then(plain)
            .is_some_and(|d| d.slot == b.slot)
            && op.destination().is_some()
            && op.op != OpCode::Decl;
        if !writes_b || op.operands[1..].iter().any(|o| refers_to(o, b.slot)) {
            return None;
        }
        let span = facts.span(instructions, index + 3)?;
        if !users(instructions, span, b.slot).is_empty() {
            return None;
        }

        let mut operands = op.operands.clone();
        operands[0] = Operand::Variable(a.clone());
        let rewritten = op.with_operands(operands);
        if is_self_load(&rewritten) {
            return None;
        }
        Some(vec![
            (index, Instruction::nop()),
            (index + 1, rewritten),
            (index + 2, Instruction::nop()),
        ])
    }
}

/// Repeated names within one `decl`.
pub struct DeduplicateDeclarations;

impl Rewrite for DeduplicateDeclarations {
    fn name(&self) -> &str {
        "deduplicate-declarations"
    }

    fn at(&self, instructions: &[Instruction], _facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let instruction = &instructions[index];
        if instruction.op != OpCode::Decl {
            return None;
        }
        let mut seen = HashSet::new();
        let kept: Vec<Operand> = instruction
            .operands
            .iter()
            .filter(|o| o.var_name().is_none_or(|n| seen.insert(n.slot)))
            .cloned()
            .collect();
        (kept.len() != instruction.operands.len())
            .then(|| vec![(index, instruction.with_operands(kept))])
    }
}

/// `ld $v, x...` + `op $v, $v` becomes `op $v, x...`.
pub struct FoldLoadIntoUnaryOp;

impl Rewrite for FoldLoadIntoUnaryOp {
    fn name(&self) -> &str {
        "fold-load-into-unary-op"
    }

    fn at(&self, instructions: &[Instruction], facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let load = &instructions[index];
        if load.op != OpCode::Ld || load.operands.len() < 2 {
            return None;
        }
        let var = plain(&load.operands[0])?;
        let next = instructions.get(index + 1)?;
        if !next.op.is_direct_assignment() || next.op == OpCode::Ld || facts.is_target(index + 1) {
            return None;
        }
        let [dst, source] = next.operands.as_slice() else {
            return None;
        };
        let reads_itself = plain(dst).is_some_and(|d| d.slot == var.slot)
            && plain(source).is_some_and(|s| s.slot == var.slot);
        if !reads_itself {
            return None;
        }

        let mut operands = vec![dst.clone()];
        operands.extend(load.operands[1..].iter().cloned());
        Some(vec![
            (index, Instruction::nop()),
            (index + 1, next.with_operands(operands)),
        ])
    }
}

/// `add $v, 1` / `sub $v, 1` become `inc $v` / `dec $v`.
pub struct IncrementByOne;

impl Rewrite for IncrementByOne {
    fn name(&self) -> &str {
        "increment-by-one"
    }

    fn at(&self, instructions: &[Instruction], _facts: &Facts<'_>, index: usize) -> Option<Edits> {
        let instruction = &instructions[index];
        let op = match instruction.op {
            OpCode::Add => OpCode::Inc,
            OpCode::Sub => OpCode::Dec,
            _ => return None,
        };
        let [dst @ Operand::Variable(_), Operand::Int(1)] = instruction.operands.as_slice() else {
            return None;
        };
        let mut rewritten = Instruction::new(op, vec![dst.clone()]);
        rewritten.line = instruction.line;
        Some(vec![(index, rewritten)])
    }
}
