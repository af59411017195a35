//! Text to `Program`.
//!
//! One instruction per line, `#` comments, `name:` label lines, and
//! operands separated by whitespace and/or commas.

use std::collections::HashMap;

use tracing::debug;

use crate::error::SyntaxError;
use crate::vm::{
    Instruction, LabelTable, MAX_SLOTS, OpCode, Operand, Program, Shape, Signature, SymbolTable,
    VarName, parse_var_token,
};

type Result<T> = std::result::Result<T, SyntaxError>;

/// Names the render host binds before every run.
pub const SHADER_UNIFORMS: &[&str] = &["fragCoord", "iResolution", "iTime"];

/// Assembles Tetra source text.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    uniforms: Vec<String>,
}

/// One non-blank source line after comment stripping.
struct SourceLine<'a> {
    number: usize,
    words: Vec<&'a str>,
}

impl<'a> SourceLine<'a> {
    fn label(&self) -> Option<&'a str> {
        self.words.first().and_then(|w| w.strip_suffix(':'))
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// An assembler that gives `names` fixed slots right after `retval`,
    /// whether or not the source mentions them.
    pub fn with_uniforms(names: &[&str]) -> Self {
        Self {
            uniforms: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Assemble `source`. Any bad line fails the whole call.
    pub fn assemble(&self, source: &str) -> Result<Program> {
        let lines = split_lines(source);
        let labels = collect_labels(&lines)?;

        let mut symbols = Symbols::new();
        for name in std::iter::once("retval").chain(self.uniforms.iter().map(String::as_str)) {
            symbols
                .slot(name)
                .ok_or_else(|| SyntaxError::new(0, format!("Too many uniforms (limit {})", MAX_SLOTS)))?;
        }

        let mut instructions = Vec::new();
        for line in &lines {
            if line.label().is_some() {
                continue;
            }
            instructions.push(assemble_line(line, &labels, &mut symbols)?);
        }

        debug!(
            instructions = instructions.len(),
            labels = labels.len(),
            symbols = symbols.table.len(),
            "assembled program"
        );
        Ok(Program::new(instructions, symbols.table, labels))
    }
}

/// Slot allocation: first sighting gets the next slot.
struct Symbols {
    slots: HashMap<String, usize>,
    table: SymbolTable,
}

impl Symbols {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            table: SymbolTable::new(),
        }
    }

    /// `None` once every slot is taken.
    fn slot(&mut self, name: &str) -> Option<usize> {
        if let Some(slot) = self.slots.get(name) {
            return Some(*slot);
        }
        let slot = self.slots.len();
        if slot >= MAX_SLOTS {
            return None;
        }
        self.slots.insert(name.to_string(), slot);
        self.table.insert(slot, name);
        Some(slot)
    }
}

fn split_lines(source: &str) -> Vec<SourceLine<'_>> {
    source
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let code = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let words: Vec<&str> = code
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|w| !w.is_empty())
                .collect();
            if words.is_empty() {
                None
            } else {
                Some(SourceLine {
                    number: index + 1,
                    words,
                })
            }
        })
        .collect()
}

/// Find every `name:` line and the index of the instruction that follows it.
fn collect_labels(lines: &[SourceLine<'_>]) -> Result<LabelTable> {
    let mut labels = LabelTable::new();
    let mut index = 0;
    for line in lines {
        let Some(name) = line.label() else {
            index += 1;
            continue;
        };
        if line.words.len() > 1 {
            return Err(SyntaxError::new(
                line.number,
                format!("Label '{}' cannot have operands.", name),
            ));
        }
        if !is_identifier(name) {
            return Err(SyntaxError::new(
                line.number,
                format!("Invalid label name '{}'.", name),
            ));
        }
        if labels.insert(name, index).is_some() {
            return Err(SyntaxError::new(
                line.number,
                format!("Duplicate label '{}'.", name),
            ));
        }
    }
    Ok(labels)
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn assemble_line(line: &SourceLine<'_>, labels: &LabelTable, symbols: &mut Symbols) -> Result<Instruction> {
    let mnemonic = line.words[0];
    let op = OpCode::from_mnemonic(mnemonic).ok_or_else(|| {
        SyntaxError::new(line.number, format!("Unrecognized instruction '{}'", mnemonic))
    })?;

    let operands = line.words[1..]
        .iter()
        .map(|word| parse_operand(word, line.number, labels, symbols))
        .collect::<Result<Vec<_>>>()?;

    validate(op, &operands, line.number)?;
    Ok(Instruction::new(op, operands).with_line(line.number))
}

fn parse_operand(word: &str, line: usize, labels: &LabelTable, symbols: &mut Symbols) -> Result<Operand> {
    if let Some(text) = word.strip_prefix('$') {
        let token = parse_var_token(text).map_err(|msg| SyntaxError::new(line, msg))?;
        let slot = symbols.slot(token.name).ok_or_else(|| {
            SyntaxError::new(
                line,
                format!("Too many variables: '${}' needs slot {}", token.name, MAX_SLOTS),
            )
        })?;
        let mut name = VarName::new(slot);
        if let Some(index) = token.index {
            name = name.with_index(index);
        }
        if let Some(swizzle) = token.swizzle {
            name = name.with_swizzle(swizzle);
        }
        return Ok(Operand::Variable(name));
    }

    if let Some(index) = labels.get(word) {
        return Ok(Operand::Label(index));
    }

    if word.contains(['.', 'e', 'E']) {
        let digits = word.strip_suffix(['f', 'F']).unwrap_or(word);
        if let Ok(value) = digits.parse::<f64>() {
            if value.is_finite() {
                return Ok(Operand::Float(value));
            }
        }
    }

    if let Ok(value) = word.parse::<i64>() {
        return Ok(Operand::Int(value));
    }

    if is_identifier(word) {
        return Err(SyntaxError::new(line, format!("Label '{}' not found.", word)));
    }
    Err(SyntaxError::new(line, format!("Unrecognized operand '{}'", word)))
}

fn shape_of(operand: &Operand) -> Option<Shape> {
    match operand {
        Operand::Variable(_) => Some(Shape::Var),
        Operand::Int(_) => Some(Shape::Int),
        Operand::Float(_) | Operand::Vector(_) => Some(Shape::Value),
        Operand::Label(_) => Some(Shape::Label),
        Operand::Unassigned => None,
    }
}

/// Whether an operand of shape `actual` may stand where `expected` is required.
fn accepts(expected: Shape, actual: Shape) -> bool {
    match expected {
        Shape::Value => matches!(actual, Shape::Var | Shape::Int | Shape::Value),
        _ => expected == actual,
    }
}

fn arity_fits(signature: &Signature, count: usize) -> bool {
    match signature.tail {
        Some(_) => count >= signature.fixed.len(),
        None => count == signature.fixed.len(),
    }
}

fn fits(signature: &Signature, shapes: &[Option<Shape>]) -> bool {
    arity_fits(signature, shapes.len())
        && shapes.iter().enumerate().all(|(i, shape)| {
            let expected = signature.fixed.get(i).copied().or(signature.tail);
            match (expected, shape) {
                (Some(expected), Some(actual)) => accepts(expected, *actual),
                _ => false,
            }
        })
}

fn validate(op: OpCode, operands: &[Operand], line: usize) -> Result<()> {
    let signatures = op.signatures();
    let shapes: Vec<Option<Shape>> = operands.iter().map(shape_of).collect();
    if signatures.iter().any(|s| fits(s, &shapes)) {
        return Ok(());
    }

    let expected = signatures
        .iter()
        .map(Signature::describe)
        .collect::<Vec<_>>()
        .join(" or ");
    if !signatures.iter().any(|s| arity_fits(s, operands.len())) {
        return Err(SyntaxError::new(
            line,
            format!(
                "'{}' expected {}, but got {} operand(s).",
                op,
                expected,
                operands.len()
            ),
        ));
    }
    let actual = shapes
        .iter()
        .map(|s| s.map_or("?", Shape::name))
        .collect::<Vec<_>>()
        .join(", ");
    Err(SyntaxError::new(
        line,
        format!("'{}' expected {}, but got {}.", op, expected, actual),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(source: &str) -> Result<Program> {
        Assembler::new().assemble(source)
    }

    fn error_line(source: &str) -> usize {
        assemble(source).unwrap_err().line
    }

    #[test]
    fn test_retval_is_slot_zero() {
        let program = Assembler::with_uniforms(SHADER_UNIFORMS)
            .assemble("ld $a, 1")
            .unwrap();
        assert_eq!(program.symbols.name(0), Some("retval"));
        assert_eq!(program.symbols.name(1), Some("fragCoord"));
        assert_eq!(program.symbols.name(3), Some("iTime"));
        assert_eq!(program.symbols.slot_of("a"), Some(4));
    }

    #[test]
    fn test_variable_count_is_bounded() {
        let mut source: String = (1..MAX_SLOTS).map(|i| format!("ld $v{}, {}\n", i, i)).collect();
        assert!(assemble(&source).is_ok());

        source.push_str("ld $v1, 0\nld $overflow, 1\n");
        let err = assemble(&source).unwrap_err();
        assert_eq!(err.line, MAX_SLOTS + 1);
        assert!(err.message.contains("overflow"), "{}", err.message);
    }

    #[test]
    fn test_labels_resolve_to_following_instruction() {
        let program = assemble("jmp end\n# comment\n\nprint 1\nend:\nhalt").unwrap();
        assert_eq!(program.labels.get("end"), Some(2));
        assert_eq!(program.instructions[0].target(), Some(2));
        assert_eq!(program.instructions[2].line, Some(6));
    }

    #[test]
    fn test_forward_and_backward_labels() {
        let program = assemble("top:\njmp bottom\nbottom:\njmp top").unwrap();
        assert_eq!(program.instructions[0].target(), Some(1));
        assert_eq!(program.instructions[1].target(), Some(0));
    }

    #[test]
    fn test_operand_tokens() {
        let program = assemble("ld $v, 1, 2.5, 3e2, 4.0f, $x[1].yx").unwrap();
        let ops = &program.instructions[0].operands;
        assert_eq!(ops[1], Operand::Int(1));
        assert_eq!(ops[2], Operand::Float(2.5));
        assert_eq!(ops[3], Operand::Float(300.0));
        assert_eq!(ops[4], Operand::Float(4.0));
        let x = ops[5].var_name().unwrap();
        assert_eq!(x.index, Some(1));
        assert_eq!(x.swizzle.as_deref(), Some("yx"));
    }

    #[test]
    fn test_comma_separated_without_spaces() {
        let program = assemble("ld $v,1.0,2.0").unwrap();
        assert_eq!(program.instructions[0].operands.len(), 3);
    }

    #[test]
    fn test_mnemonics_are_case_insensitive() {
        let program = assemble("LD $a, 1\nJmp_Z $a, end\nend:\nHALT").unwrap();
        assert_eq!(program.instructions[1].op, OpCode::Jmpz);
    }

    #[test]
    fn test_slots_follow_first_use() {
        let program = assemble("ld $b, 1\nld $a, $b").unwrap();
        assert_eq!(program.symbols.slot_of("b"), Some(1));
        assert_eq!(program.symbols.slot_of("a"), Some(2));
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = assemble("nop\nfoo $a").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("foo"));
    }

    #[test]
    fn test_label_with_operand() {
        assert_eq!(error_line("label: 1"), 1);
    }

    #[test]
    fn test_duplicate_label() {
        assert_eq!(error_line("a:\nnop\na:\nnop"), 3);
    }

    #[test]
    fn test_unresolved_label() {
        let err = assemble("jmp nowhere").unwrap_err();
        assert!(err.message.contains("nowhere"));
    }

    #[test]
    fn test_arity_and_type_checks() {
        assert_eq!(error_line("add $a"), 1);
        assert_eq!(error_line("inc 1"), 1);
        assert_eq!(error_line("nop\ndim $a, 1.5"), 2);
        assert_eq!(error_line("halt 1"), 1);
        assert_eq!(error_line("clamp $a, 1.0"), 1);
    }

    #[test]
    fn test_print_label_is_rejected() {
        assert_eq!(error_line("main:\n    print main"), 2);
    }

    #[test]
    fn test_bad_tokens() {
        assert!(assemble("ld $a, 1.2.3").is_err());
        assert!(assemble("ld $, 1").is_err());
        assert!(assemble("ld $a.xq, 1").is_err());
        assert!(assemble("ld $a, 1e999").is_err());
    }

    #[test]
    fn test_ret_forms() {
        assert!(assemble("ret").is_ok());
        assert!(assemble("ret $a").is_ok());
        assert!(assemble("ret 1.0, 2.0, 3.0").is_ok());
    }
}
