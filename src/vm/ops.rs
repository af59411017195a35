/// Tetra opcodes.
///
/// Arithmetic opcodes accumulate into their first operand (`add $a, $b` is
/// `a += b`). Comparisons and logical ops overwrite it with 0/1. The
/// "direct assignment" intrinsics write their first operand without reading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ========================================
    // Housekeeping
    // ========================================
    Nop,
    Halt,
    Decl,
    Ld,
    Dim,

    // ========================================
    // Arithmetic
    // ========================================
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Inc,
    Dec,
    Neg,
    Shiftl,
    Shiftr,
    BitAnd,
    BitOr,

    // ========================================
    // Comparison / logic
    // ========================================
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Test,

    // ========================================
    // Control flow
    // ========================================
    Jmp,
    Jmpz,
    Jmpnz,
    JmpEq,
    JmpNe,
    JmpLt,
    JmpLe,
    JmpGt,
    JmpGe,
    Call,
    Ret,
    PushFrame,
    PopFrame,

    // ========================================
    // Output
    // ========================================
    Print,
    Debug,

    // ========================================
    // Intrinsics
    // ========================================
    Sin,
    Sinh,
    Asin,
    Cos,
    Cosh,
    Acos,
    Tan,
    Tanh,
    Atan,
    Sqrt,
    Exp,
    Log,
    Abs,
    Sign,
    Floor,
    Ceil,
    Fract,
    Normalize,
    Length,
    Pow,
    Min,
    Max,
    Step,
    Dot,
    Cross,
    Reflect,
    Clamp,
    Mix,
    Smoothstep,
    Refract,
}

/// What a single operand position accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `$name`
    Var,
    /// `$name`, int or float constant
    Value,
    /// Integer constant
    Int,
    /// Known label
    Label,
}

impl Shape {
    pub fn name(self) -> &'static str {
        match self {
            Shape::Var => "variable",
            Shape::Value => "value",
            Shape::Int => "int",
            Shape::Label => "label",
        }
    }
}

/// One accepted operand layout: fixed positions, optionally followed by
/// one or more further operands of the `tail` shape.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub fixed: &'static [Shape],
    pub tail: Option<Shape>,
}

impl Signature {
    const fn exact(fixed: &'static [Shape]) -> Self {
        Self { fixed, tail: None }
    }

    const fn variadic(fixed: &'static [Shape], tail: Shape) -> Self {
        Self {
            fixed,
            tail: Some(tail),
        }
    }

    /// Human-readable layout, e.g. `variable, value[, value...]`.
    pub fn describe(&self) -> String {
        let mut parts: Vec<&str> = self.fixed.iter().map(|s| s.name()).collect();
        if let Some(tail) = self.tail {
            parts.push(match tail {
                Shape::Var => "[variable...]",
                Shape::Value => "[value...]",
                Shape::Int => "[int...]",
                Shape::Label => "[label...]",
            });
        }
        if parts.is_empty() {
            "no operands".to_string()
        } else {
            parts.join(", ")
        }
    }
}

use Shape::{Int, Label, Value, Var};

const NONE: &[Signature] = &[Signature::exact(&[])];
const VAR: &[Signature] = &[Signature::exact(&[Var])];
const VAR_VALUES: &[Signature] = &[Signature::variadic(&[Var, Value], Value)];
const VAR_VALUE: &[Signature] = &[Signature::exact(&[Var, Value])];
const VAR_VALUE_VALUE: &[Signature] = &[Signature::exact(&[Var, Value, Value])];
const VARS: &[Signature] = &[Signature::variadic(&[Var], Var)];
const VAR_INT: &[Signature] = &[Signature::exact(&[Var, Int])];
const LABEL: &[Signature] = &[Signature::exact(&[Label])];
const VAR_LABEL: &[Signature] = &[Signature::exact(&[Var, Label])];
const VAR_VALUE_LABEL: &[Signature] = &[Signature::exact(&[Var, Value, Label])];
const VALUES: &[Signature] = &[Signature::variadic(&[Value], Value)];
const OPTIONAL_VALUES: &[Signature] = &[Signature::exact(&[]), Signature::variadic(&[Value], Value)];

impl OpCode {
    pub const ALL: &'static [OpCode] = &[
        OpCode::Nop,
        OpCode::Halt,
        OpCode::Decl,
        OpCode::Ld,
        OpCode::Dim,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Mod,
        OpCode::Inc,
        OpCode::Dec,
        OpCode::Neg,
        OpCode::Shiftl,
        OpCode::Shiftr,
        OpCode::BitAnd,
        OpCode::BitOr,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Gt,
        OpCode::Ge,
        OpCode::Eq,
        OpCode::Ne,
        OpCode::And,
        OpCode::Or,
        OpCode::Not,
        OpCode::Test,
        OpCode::Jmp,
        OpCode::Jmpz,
        OpCode::Jmpnz,
        OpCode::JmpEq,
        OpCode::JmpNe,
        OpCode::JmpLt,
        OpCode::JmpLe,
        OpCode::JmpGt,
        OpCode::JmpGe,
        OpCode::Call,
        OpCode::Ret,
        OpCode::PushFrame,
        OpCode::PopFrame,
        OpCode::Print,
        OpCode::Debug,
        OpCode::Sin,
        OpCode::Sinh,
        OpCode::Asin,
        OpCode::Cos,
        OpCode::Cosh,
        OpCode::Acos,
        OpCode::Tan,
        OpCode::Tanh,
        OpCode::Atan,
        OpCode::Sqrt,
        OpCode::Exp,
        OpCode::Log,
        OpCode::Abs,
        OpCode::Sign,
        OpCode::Floor,
        OpCode::Ceil,
        OpCode::Fract,
        OpCode::Normalize,
        OpCode::Length,
        OpCode::Pow,
        OpCode::Min,
        OpCode::Max,
        OpCode::Step,
        OpCode::Dot,
        OpCode::Cross,
        OpCode::Reflect,
        OpCode::Clamp,
        OpCode::Mix,
        OpCode::Smoothstep,
        OpCode::Refract,
    ];

    /// The canonical lowercase spelling.
    pub fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Nop => "nop",
            OpCode::Halt => "halt",
            OpCode::Decl => "decl",
            OpCode::Ld => "ld",
            OpCode::Dim => "dim",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Div => "div",
            OpCode::Mod => "mod",
            OpCode::Inc => "inc",
            OpCode::Dec => "dec",
            OpCode::Neg => "neg",
            OpCode::Shiftl => "shiftl",
            OpCode::Shiftr => "shiftr",
            OpCode::BitAnd => "bitand",
            OpCode::BitOr => "bitor",
            OpCode::Lt => "lt",
            OpCode::Le => "le",
            OpCode::Gt => "gt",
            OpCode::Ge => "ge",
            OpCode::Eq => "eq",
            OpCode::Ne => "ne",
            OpCode::And => "and",
            OpCode::Or => "or",
            OpCode::Not => "not",
            OpCode::Test => "test",
            OpCode::Jmp => "jmp",
            OpCode::Jmpz => "jmp_z",
            OpCode::Jmpnz => "jmp_nz",
            OpCode::JmpEq => "jmp_eq",
            OpCode::JmpNe => "jmp_ne",
            OpCode::JmpLt => "jmp_lt",
            OpCode::JmpLe => "jmp_le",
            OpCode::JmpGt => "jmp_gt",
            OpCode::JmpGe => "jmp_ge",
            OpCode::Call => "call",
            OpCode::Ret => "ret",
            OpCode::PushFrame => "push_frame",
            OpCode::PopFrame => "pop_frame",
            OpCode::Print => "print",
            OpCode::Debug => "debug",
            OpCode::Sin => "sin",
            OpCode::Sinh => "sinh",
            OpCode::Asin => "asin",
            OpCode::Cos => "cos",
            OpCode::Cosh => "cosh",
            OpCode::Acos => "acos",
            OpCode::Tan => "tan",
            OpCode::Tanh => "tanh",
            OpCode::Atan => "atan",
            OpCode::Sqrt => "sqrt",
            OpCode::Exp => "exp",
            OpCode::Log => "log",
            OpCode::Abs => "abs",
            OpCode::Sign => "sign",
            OpCode::Floor => "floor",
            OpCode::Ceil => "ceil",
            OpCode::Fract => "fract",
            OpCode::Normalize => "normalize",
            OpCode::Length => "length",
            OpCode::Pow => "pow",
            OpCode::Min => "min",
            OpCode::Max => "max",
            OpCode::Step => "step",
            OpCode::Dot => "dot",
            OpCode::Cross => "cross",
            OpCode::Reflect => "reflect",
            OpCode::Clamp => "clamp",
            OpCode::Mix => "mix",
            OpCode::Smoothstep => "smoothstep",
            OpCode::Refract => "refract",
        }
    }

    /// Case-insensitive lookup.
    pub fn from_mnemonic(word: &str) -> Option<OpCode> {
        let word = word.to_ascii_lowercase();
        OpCode::ALL.iter().copied().find(|op| op.mnemonic() == word)
    }

    /// Accepted operand layouts for the assembler.
    pub fn signatures(self) -> &'static [Signature] {
        match self {
            OpCode::Nop | OpCode::Halt | OpCode::PushFrame | OpCode::PopFrame => NONE,
            OpCode::Decl => VARS,
            OpCode::Ld => VAR_VALUES,
            OpCode::Dim => VAR_INT,
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => VAR_VALUES,
            OpCode::Inc | OpCode::Dec | OpCode::Neg | OpCode::Not | OpCode::Test => VAR,
            OpCode::Shiftl | OpCode::Shiftr | OpCode::BitAnd | OpCode::BitOr => VAR_VALUE,
            OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::And
            | OpCode::Or => VAR_VALUES,
            OpCode::Jmp | OpCode::Call => LABEL,
            OpCode::Jmpz | OpCode::Jmpnz => VAR_LABEL,
            OpCode::JmpEq
            | OpCode::JmpNe
            | OpCode::JmpLt
            | OpCode::JmpLe
            | OpCode::JmpGt
            | OpCode::JmpGe => VAR_VALUE_LABEL,
            OpCode::Ret => OPTIONAL_VALUES,
            OpCode::Print | OpCode::Debug => VALUES,
            OpCode::Sin
            | OpCode::Sinh
            | OpCode::Asin
            | OpCode::Cos
            | OpCode::Cosh
            | OpCode::Acos
            | OpCode::Tan
            | OpCode::Tanh
            | OpCode::Atan
            | OpCode::Sqrt
            | OpCode::Exp
            | OpCode::Log
            | OpCode::Abs
            | OpCode::Sign
            | OpCode::Floor
            | OpCode::Ceil
            | OpCode::Fract
            | OpCode::Normalize
            | OpCode::Length => VAR_VALUES,
            OpCode::Pow
            | OpCode::Min
            | OpCode::Max
            | OpCode::Step
            | OpCode::Dot
            | OpCode::Cross
            | OpCode::Reflect => VAR_VALUES,
            OpCode::Clamp | OpCode::Mix | OpCode::Smoothstep | OpCode::Refract => VAR_VALUE_VALUE,
        }
    }

    /// Writes its first operand without reading it (`a = f(b)`).
    pub fn is_direct_assignment(self) -> bool {
        matches!(
            self,
            OpCode::Ld
                | OpCode::Sin
                | OpCode::Sinh
                | OpCode::Asin
                | OpCode::Cos
                | OpCode::Cosh
                | OpCode::Acos
                | OpCode::Tan
                | OpCode::Tanh
                | OpCode::Atan
                | OpCode::Sqrt
                | OpCode::Exp
                | OpCode::Log
                | OpCode::Abs
                | OpCode::Sign
                | OpCode::Floor
                | OpCode::Ceil
                | OpCode::Fract
                | OpCode::Normalize
                | OpCode::Length
        )
    }

    /// Jumps (conditional or not) whose last operand is the target.
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            OpCode::Jmp
                | OpCode::Jmpz
                | OpCode::Jmpnz
                | OpCode::JmpEq
                | OpCode::JmpNe
                | OpCode::JmpLt
                | OpCode::JmpLe
                | OpCode::JmpGt
                | OpCode::JmpGe
        )
    }

    /// Instructions whose last operand is an instruction index.
    pub fn has_target(self) -> bool {
        self.is_jump() || self == OpCode::Call
    }

    /// Execution never falls through to the next instruction.
    pub fn ends_block(self) -> bool {
        matches!(self, OpCode::Jmp | OpCode::Ret | OpCode::Halt)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Check that every opcode has a unique mnemonic that maps back to it,
/// and at least one assembler signature.
pub fn verify_tables() -> Result<(), String> {
    let mut problems = Vec::new();
    for (i, op) in OpCode::ALL.iter().enumerate() {
        if OpCode::ALL[..i].contains(op) {
            problems.push(format!("{:?} is listed twice", op));
        }
        if OpCode::from_mnemonic(op.mnemonic()) != Some(*op) {
            problems.push(format!("{:?} does not round-trip through '{}'", op, op.mnemonic()));
        }
        if op.signatures().is_empty() {
            problems.push(format!("{:?} has no assembler signature", op));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(format!("opcode tables are inconsistent: {}", problems.join("; ")))
    }
}
