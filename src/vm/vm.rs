use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, trace};

use super::debug::DebugSnap;
use super::intrinsics;
use super::ops::OpCode;
use super::program::{Instruction, Program};
use super::scope::{ScopeKind, ScopeStack};
use super::value::Operand;
use super::var_name::VarName;
use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeErrorKind};

/// Slot reserved for `retval` by the assembler.
pub const RETVAL_SLOT: usize = 0;

type OpResult<T> = std::result::Result<T, RuntimeErrorKind>;

/// An active `call`.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    /// Instruction index of the called label
    function: usize,
    return_ip: usize,
    /// Scope depth when the call was made
    depth: usize,
}

/// A `Write` sink that can be cloned and read back after a run.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buffer = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Output split into the lines written by each `print`/`debug`.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(|s| s.to_string()).collect()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The Tetra interpreter.
///
/// A `Vm` borrows nothing from the program it runs, so one read-only
/// `Program` can be executed by many instances at once.
pub struct Vm {
    scope: ScopeStack,
    call_stack: Vec<CallFrame>,
    uniforms: Vec<(String, Operand)>,
    max_instructions: usize,
    executed: usize,
    /// Output stream for print/debug
    output: Box<dyn Write>,
    /// Step diffs, when enabled
    debug_output: Option<Box<dyn Write>>,
}

impl Vm {
    pub fn new() -> Self {
        Self::new_with_config(&RuntimeConfig::default(), Box::new(io::stdout()))
    }

    /// Create a VM with a custom output stream.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        Self::new_with_config(&RuntimeConfig::default(), output)
    }

    /// Create a VM with full configuration. Step diffs go to stderr when
    /// `config.debug` is set.
    pub fn new_with_config(config: &RuntimeConfig, output: Box<dyn Write>) -> Self {
        let debug_output: Option<Box<dyn Write>> = if config.debug {
            Some(Box::new(io::stderr()))
        } else {
            None
        };
        Self {
            scope: ScopeStack::new(),
            call_stack: Vec::new(),
            uniforms: Vec::new(),
            max_instructions: config.max_instructions,
            executed: 0,
            output,
            debug_output,
        }
    }

    /// Redirect step diffs, enabling them.
    pub fn set_debug_output(&mut self, output: Box<dyn Write>) {
        self.debug_output = Some(output);
    }

    /// Bind a value in the Global frame at the start of every run.
    /// Replaces an earlier binding of the same name.
    pub fn add_uniform(&mut self, name: &str, value: Operand) {
        match self.uniforms.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.uniforms.push((name.to_string(), value)),
        }
    }

    /// Number of instructions executed by the last run.
    pub fn instructions_executed(&self) -> usize {
        self.executed
    }

    pub fn scope(&self) -> &ScopeStack {
        &self.scope
    }

    /// The `retval` left in the Global frame.
    pub fn retval(&self) -> Option<&Operand> {
        self.scope.global().get(RETVAL_SLOT)
    }

    /// A Global-frame variable by name.
    pub fn global(&self, program: &Program, name: &str) -> Option<&Operand> {
        let slot = program.symbols.slot_of(name)?;
        self.scope.global().get(slot)
    }

    /// Every Global-frame binding, by name.
    pub fn globals(&self, program: &Program) -> Vec<(String, Operand)> {
        self.scope
            .global()
            .bindings()
            .map(|(slot, value)| (program.symbols.display_name(slot), value.clone()))
            .collect()
    }

    /// Execute `program` from instruction 0 until it halts, runs off the
    /// end, or fails.
    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.scope = ScopeStack::new();
        self.call_stack.clear();
        self.executed = 0;
        self.bind_uniforms(program);

        let arg_slots: Vec<usize> = program
            .symbols
            .iter()
            .map(|(slot, _)| slot)
            .filter(|slot| program.symbols.is_function_argument(*slot))
            .collect();

        let mut ip = 0;
        while let Some(instruction) = program.instructions.get(ip) {
            self.executed += 1;
            if self.executed > self.max_instructions {
                return Err(self.fail(program, ip, RuntimeErrorKind::CeilingExceeded(self.max_instructions)));
            }
            trace!(ip, "{}", program.render_instruction(ip));

            let before = self
                .debug_output
                .is_some()
                .then(|| self.snapshot(program, ip));

            let flow = match self.execute(program, instruction, ip, &arg_slots) {
                Ok(flow) => flow,
                Err(kind) => return Err(self.fail(program, ip, kind)),
            };

            let next = match flow {
                ControlFlow::Continue => ip + 1,
                ControlFlow::Jump(target) => target,
                ControlFlow::Exit => program.len(),
            };

            if let Some(before) = before {
                let after = self.snapshot(program, next);
                let written = match self.debug_output.as_mut() {
                    Some(out) => write!(out, "{}", before.diff(&after)),
                    None => Ok(()),
                };
                written.map_err(|e| self.fail_io(program, ip, e))?;
            }
            ip = next;
        }

        self.output
            .flush()
            .map_err(|e| self.fail_io(program, ip.min(program.len().saturating_sub(1)), e))?;
        Ok(())
    }

    fn bind_uniforms(&mut self, program: &Program) {
        for (name, value) in &self.uniforms {
            match program.symbols.slot_of(name) {
                Some(slot) => {
                    self.scope.define(slot, value.clone());
                }
                None => debug!(uniform = %name, "uniform not referenced by program"),
            }
        }
    }

    fn snapshot(&self, program: &Program, ip: usize) -> DebugSnap {
        let function = self.call_stack.last().map(|f| f.function);
        DebugSnap::capture(program, ip, function, &self.scope)
    }

    /// Function names from the innermost call outwards, ending with `<Root>`.
    fn stack_trace(&self, program: &Program) -> Vec<String> {
        self.call_stack
            .iter()
            .rev()
            .map(|f| program.function_name(f.function))
            .chain(std::iter::once("<Root>".to_string()))
            .collect()
    }

    fn fail(&self, program: &Program, ip: usize, kind: RuntimeErrorKind) -> RuntimeError {
        let err = RuntimeError {
            kind,
            ip,
            line: program.instructions.get(ip).and_then(|i| i.line),
            instruction: program.render_instruction(ip),
            stack_trace: self.stack_trace(program),
        };
        error!(ip, trace = ?err.stack_trace, "{}", err.kind);
        err
    }

    fn fail_io(&self, program: &Program, ip: usize, e: io::Error) -> RuntimeError {
        self.fail(program, ip, RuntimeErrorKind::Output(e.to_string()))
    }

    // ========================================
    // Operand access
    // ========================================

    fn name_of(program: &Program, name: &VarName) -> String {
        program.symbols.display_name(name.slot)
    }

    fn read_var(&self, program: &Program, name: &VarName) -> OpResult<Operand> {
        let value = self
            .scope
            .get(name.slot)
            .ok_or_else(|| RuntimeErrorKind::Undefined(Self::name_of(program, name)))?;
        if let Operand::Unassigned = value {
            return Err(RuntimeErrorKind::Unassigned(Self::name_of(program, name)));
        }
        let value = match name.index {
            Some(index) => value.component(index)?,
            None => value.clone(),
        };
        match name.swizzle_indices() {
            Some(indices) => value.swizzled(&indices),
            None => Ok(value),
        }
    }

    fn value_of(&self, program: &Program, operand: &Operand) -> OpResult<Operand> {
        match operand {
            Operand::Int(_) | Operand::Float(_) | Operand::Vector(_) => Ok(operand.clone()),
            Operand::Variable(name) => self.read_var(program, name),
            other => Err(RuntimeErrorKind::TypeMismatch {
                expected: "numeric",
                found: other.type_name(),
            }),
        }
    }

    /// Resolve and concatenate a run of source operands.
    fn values_of(&self, program: &Program, operands: &[Operand]) -> OpResult<Operand> {
        let values = operands
            .iter()
            .map(|o| self.value_of(program, o))
            .collect::<OpResult<Vec<_>>>()?;
        Operand::concat(values)
    }

    fn write_var(&mut self, program: &Program, name: &VarName, value: Operand) -> OpResult<()> {
        value.check_finite()?;
        if !name.is_component() {
            self.scope.assign(name.slot, value);
            return Ok(());
        }

        let target = self
            .scope
            .get_mut(name.slot)
            .ok_or_else(|| RuntimeErrorKind::Undefined(Self::name_of(program, name)))?;
        if let Operand::Unassigned = target {
            return Err(RuntimeErrorKind::Unassigned(Self::name_of(program, name)));
        }
        if let Some(index) = name.index {
            let scalar = Operand::Float(value.as_float()?);
            return target.write_components(&[index], &scalar);
        }
        match name.swizzle_indices() {
            Some(indices) => target.write_components(&indices, &value),
            None => Ok(()),
        }
    }

    fn destination(instruction: &Instruction) -> OpResult<&VarName> {
        instruction
            .operands
            .first()
            .and_then(Operand::var_name)
            .ok_or(RuntimeErrorKind::TypeMismatch {
                expected: "variable",
                found: instruction
                    .operands
                    .first()
                    .map_or("nothing", Operand::type_name),
            })
    }

    fn operand(instruction: &Instruction, index: usize) -> OpResult<&Operand> {
        instruction
            .operands
            .get(index)
            .ok_or(RuntimeErrorKind::TypeMismatch {
                expected: "operand",
                found: "nothing",
            })
    }

    fn target(instruction: &Instruction) -> OpResult<usize> {
        instruction.target().ok_or(RuntimeErrorKind::TypeMismatch {
            expected: "label",
            found: instruction
                .operands
                .last()
                .map_or("nothing", Operand::type_name),
        })
    }

    /// `a = f(a, rest...)`
    fn accumulate(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        f: impl Fn(&Operand, &Operand) -> OpResult<Operand>,
    ) -> OpResult<()> {
        let dst = Self::destination(instruction)?;
        let rhs = self.values_of(program, &instruction.operands[1..])?;
        let current = self.read_var(program, dst)?;
        let result = f(&current, &rhs)?;
        self.write_var(program, dst, result)
    }

    /// `a = f(rest...)`
    fn assign(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        f: impl Fn(&Operand) -> OpResult<Operand>,
    ) -> OpResult<()> {
        let dst = Self::destination(instruction)?;
        let value = self.values_of(program, &instruction.operands[1..])?;
        let result = f(&value)?;
        self.write_var(program, dst, result)
    }

    /// `a = f(a)`
    fn update(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        f: impl Fn(&Operand) -> OpResult<Operand>,
    ) -> OpResult<()> {
        let dst = Self::destination(instruction)?;
        let current = self.read_var(program, dst)?;
        let result = f(&current)?;
        self.write_var(program, dst, result)
    }

    /// `a = f(a, x, y)` for the three-operand intrinsics.
    fn ternary(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        f: impl Fn(&Operand, &Operand, &Operand) -> OpResult<Operand>,
    ) -> OpResult<()> {
        let dst = Self::destination(instruction)?;
        let x = self.value_of(program, Self::operand(instruction, 1)?)?;
        let y = self.value_of(program, Self::operand(instruction, 2)?)?;
        let current = self.read_var(program, dst)?;
        let result = f(&current, &x, &y)?;
        self.write_var(program, dst, result)
    }

    /// Overwrite `a` with 0/1.
    fn compare(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        pred: impl Fn(f64, f64) -> bool,
    ) -> OpResult<()> {
        let dst = Self::destination(instruction)?;
        let rhs = self.values_of(program, &instruction.operands[1..])?;
        let current = self.read_var(program, dst)?;
        let flag = current.compare(&rhs, pred)?;
        self.write_var(program, dst, Operand::Int(flag as i64))
    }

    fn logic(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        f: impl Fn(bool, bool) -> bool,
    ) -> OpResult<()> {
        let dst = Self::destination(instruction)?;
        let rhs = self.values_of(program, &instruction.operands[1..])?;
        let current = self.read_var(program, dst)?;
        let flag = f(current.is_truthy()?, rhs.is_truthy()?);
        self.write_var(program, dst, Operand::Int(flag as i64))
    }

    /// Fused compare-and-branch.
    fn branch_if(
        &self,
        program: &Program,
        instruction: &Instruction,
        pred: impl Fn(f64, f64) -> bool,
    ) -> OpResult<ControlFlow> {
        let a = self.value_of(program, Self::operand(instruction, 0)?)?;
        let b = self.value_of(program, Self::operand(instruction, 1)?)?;
        if a.compare(&b, pred)? {
            Ok(ControlFlow::Jump(Self::target(instruction)?))
        } else {
            Ok(ControlFlow::Continue)
        }
    }

    fn emit(&mut self, program: &Program, instruction: &Instruction) -> OpResult<()> {
        let value = self.values_of(program, &instruction.operands)?;
        let text = match instruction.operands.as_slice() {
            [Operand::Variable(name)] => {
                let rendered = program.symbols.render(name);
                format!("{} = {}", rendered.trim_start_matches('$'), value)
            }
            _ => value.to_string(),
        };
        writeln!(self.output, "{}", text).map_err(|e| RuntimeErrorKind::Output(e.to_string()))
    }

    // ========================================
    // Dispatch
    // ========================================

    fn execute(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        ip: usize,
        arg_slots: &[usize],
    ) -> OpResult<ControlFlow> {
        match instruction.op {
            OpCode::Nop => {}
            OpCode::Halt => return Ok(ControlFlow::Exit),
            OpCode::Decl => {
                for name in instruction.operands.iter().filter_map(Operand::var_name) {
                    if !self.scope.is_defined_locally(name.slot) {
                        self.scope.define(name.slot, Operand::Unassigned);
                    }
                }
            }
            OpCode::Ld => {
                let dst = Self::destination(instruction)?;
                if let [_, Operand::Variable(src)] = instruction.operands.as_slice() {
                    if src == dst {
                        return Err(RuntimeErrorKind::SelfAssignment(Self::name_of(program, dst)));
                    }
                }
                self.assign(program, instruction, |v| Ok(v.clone()))?;
            }
            OpCode::Dim => {
                let width = Self::operand(instruction, 1)?.as_int()?;
                self.update(program, instruction, |v| intrinsics::dim(v, width))?;
            }

            // Arithmetic
            OpCode::Add => self.accumulate(program, instruction, |a, b| {
                a.binary(b, |x, y| Ok(x.wrapping_add(y)), |x, y| Ok(x + y))
            })?,
            OpCode::Sub => self.accumulate(program, instruction, |a, b| {
                a.binary(b, |x, y| Ok(x.wrapping_sub(y)), |x, y| Ok(x - y))
            })?,
            OpCode::Mul => self.accumulate(program, instruction, intrinsics::mul)?,
            OpCode::Div => self.accumulate(program, instruction, intrinsics::div)?,
            OpCode::Mod => self.accumulate(program, instruction, intrinsics::modulo)?,
            OpCode::Inc => self.update(program, instruction, |a| {
                a.map_numeric(|x| x.wrapping_add(1), |x| x + 1.0)
            })?,
            OpCode::Dec => self.update(program, instruction, |a| {
                a.map_numeric(|x| x.wrapping_sub(1), |x| x - 1.0)
            })?,
            OpCode::Neg => self.update(program, instruction, |a| a.map_numeric(|x| x.wrapping_neg(), |x| -x))?,
            OpCode::Shiftl => self.accumulate(program, instruction, intrinsics::shift_left)?,
            OpCode::Shiftr => self.accumulate(program, instruction, intrinsics::shift_right)?,
            OpCode::BitAnd => self.accumulate(program, instruction, intrinsics::bit_and)?,
            OpCode::BitOr => self.accumulate(program, instruction, intrinsics::bit_or)?,

            // Comparison / logic
            OpCode::Lt => self.compare(program, instruction, |a, b| a < b)?,
            OpCode::Le => self.compare(program, instruction, |a, b| a <= b)?,
            OpCode::Gt => self.compare(program, instruction, |a, b| a > b)?,
            OpCode::Ge => self.compare(program, instruction, |a, b| a >= b)?,
            OpCode::Eq => self.compare(program, instruction, |a, b| a == b)?,
            OpCode::Ne => self.compare(program, instruction, |a, b| a != b)?,
            OpCode::And => self.logic(program, instruction, |a, b| a && b)?,
            OpCode::Or => self.logic(program, instruction, |a, b| a || b)?,
            OpCode::Not => self.update(program, instruction, |a| Ok(Operand::Int(!a.is_truthy()? as i64)))?,
            OpCode::Test => self.update(program, instruction, |a| Ok(Operand::Int(a.is_truthy()? as i64)))?,

            // Control flow
            OpCode::Jmp => return Ok(ControlFlow::Jump(Self::target(instruction)?)),
            OpCode::Jmpz | OpCode::Jmpnz => {
                let value = self.value_of(program, Self::operand(instruction, 0)?)?;
                if value.is_truthy()? == (instruction.op == OpCode::Jmpnz) {
                    return Ok(ControlFlow::Jump(Self::target(instruction)?));
                }
            }
            OpCode::JmpEq => return self.branch_if(program, instruction, |a, b| a == b),
            OpCode::JmpNe => return self.branch_if(program, instruction, |a, b| a != b),
            OpCode::JmpLt => return self.branch_if(program, instruction, |a, b| a < b),
            OpCode::JmpLe => return self.branch_if(program, instruction, |a, b| a <= b),
            OpCode::JmpGt => return self.branch_if(program, instruction, |a, b| a > b),
            OpCode::JmpGe => return self.branch_if(program, instruction, |a, b| a >= b),
            OpCode::Call => {
                let target = Self::target(instruction)?;
                let args: Vec<(usize, Operand)> = arg_slots
                    .iter()
                    .filter_map(|&slot| self.scope.get(slot).map(|v| (slot, v.clone())))
                    .collect();
                self.call_stack.push(CallFrame {
                    function: target,
                    return_ip: ip + 1,
                    depth: self.scope.depth(),
                });
                self.scope.push(ScopeKind::Function);
                for (slot, value) in args {
                    self.scope.define(slot, value);
                }
                return Ok(ControlFlow::Jump(target));
            }
            OpCode::Ret => {
                if self.call_stack.is_empty() {
                    return Err(RuntimeErrorKind::ReturnOutsideCall);
                }
                let value = if instruction.operands.is_empty() {
                    None
                } else {
                    Some(self.values_of(program, &instruction.operands)?)
                };
                let frame = self.call_stack.pop().ok_or(RuntimeErrorKind::ReturnOutsideCall)?;
                self.scope.truncate(frame.depth);
                if let Some(value) = value {
                    value.check_finite()?;
                    self.scope.assign(RETVAL_SLOT, value);
                }
                return Ok(ControlFlow::Jump(frame.return_ip));
            }
            OpCode::PushFrame => self.scope.push(ScopeKind::Block),
            OpCode::PopFrame => {
                if !self.scope.pop() {
                    return Err(RuntimeErrorKind::PopGlobalFrame);
                }
            }

            // Output
            OpCode::Print | OpCode::Debug => self.emit(program, instruction)?,

            // Intrinsics
            OpCode::Sin => self.assign(program, instruction, |v| v.map(f64::sin))?,
            OpCode::Sinh => self.assign(program, instruction, |v| v.map(f64::sinh))?,
            OpCode::Asin => self.assign(program, instruction, |v| v.map(f64::asin))?,
            OpCode::Cos => self.assign(program, instruction, |v| v.map(f64::cos))?,
            OpCode::Cosh => self.assign(program, instruction, |v| v.map(f64::cosh))?,
            OpCode::Acos => self.assign(program, instruction, |v| v.map(f64::acos))?,
            OpCode::Tan => self.assign(program, instruction, |v| v.map(f64::tan))?,
            OpCode::Tanh => self.assign(program, instruction, |v| v.map(f64::tanh))?,
            OpCode::Atan => self.assign(program, instruction, |v| v.map(f64::atan))?,
            OpCode::Sqrt => self.assign(program, instruction, |v| v.map(f64::sqrt))?,
            OpCode::Exp => self.assign(program, instruction, |v| v.map(f64::exp))?,
            OpCode::Log => self.assign(program, instruction, |v| v.map(f64::ln))?,
            OpCode::Abs => self.assign(program, instruction, |v| v.map_numeric(i64::wrapping_abs, f64::abs))?,
            OpCode::Sign => self.assign(program, instruction, |v| v.map_numeric(i64::signum, intrinsics::sign))?,
            OpCode::Floor => self.assign(program, instruction, |v| v.map(f64::floor))?,
            OpCode::Ceil => self.assign(program, instruction, |v| v.map(f64::ceil))?,
            OpCode::Fract => self.assign(program, instruction, |v| v.map(intrinsics::fract))?,
            OpCode::Normalize => self.assign(program, instruction, intrinsics::normalize)?,
            OpCode::Length => self.assign(program, instruction, intrinsics::length)?,
            OpCode::Pow => self.accumulate(program, instruction, intrinsics::pow)?,
            OpCode::Min => self.accumulate(program, instruction, intrinsics::min)?,
            OpCode::Max => self.accumulate(program, instruction, intrinsics::max)?,
            OpCode::Step => self.accumulate(program, instruction, intrinsics::step)?,
            OpCode::Dot => self.accumulate(program, instruction, intrinsics::dot)?,
            OpCode::Cross => self.accumulate(program, instruction, intrinsics::cross)?,
            OpCode::Reflect => self.accumulate(program, instruction, intrinsics::reflect)?,
            OpCode::Clamp => self.ternary(program, instruction, intrinsics::clamp)?,
            OpCode::Mix => self.ternary(program, instruction, intrinsics::mix)?,
            OpCode::Smoothstep => self.ternary(program, instruction, |a, e0, e1| intrinsics::smoothstep(e0, e1, a))?,
            OpCode::Refract => self.ternary(program, instruction, intrinsics::refract)?,
        }
        Ok(ControlFlow::Continue)
    }
}

enum ControlFlow {
    Continue,
    Jump(usize),
    Exit,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
