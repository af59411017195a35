use std::fmt;

use serde::{Serialize, Serializer};

use super::var_name::VarName;
use crate::error::RuntimeErrorKind;

type Result<T> = std::result::Result<T, RuntimeErrorKind>;

/// A tagged instruction operand or runtime value.
///
/// Numeric values are `Int`, `Float` or `Vector`. A one-component
/// sequence is always stored as a scalar, never as a length-1 `Vector`.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Unassigned,
    Int(i64),
    Float(f64),
    Vector(Vec<f64>),
    Variable(VarName),
    /// A resolved instruction index.
    Label(usize),
}

impl Operand {
    /// Build a numeric value from components, collapsing a single component to a scalar.
    pub fn from_floats(mut values: Vec<f64>) -> Operand {
        if values.len() == 1 {
            Operand::Float(values.remove(0))
        } else {
            Operand::Vector(values)
        }
    }

    /// Concatenate resolved numeric values into one.
    ///
    /// A single value is returned unchanged (so an `Int` stays an `Int`);
    /// several values are flattened into their float components.
    pub fn concat(values: Vec<Operand>) -> Result<Operand> {
        if values.len() == 1 {
            let mut values = values;
            let value = values.remove(0);
            value.floats()?;
            return Ok(value);
        }
        let mut out = Vec::new();
        for value in &values {
            out.extend(value.floats()?);
        }
        Ok(Operand::from_floats(out))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Operand::Int(_) | Operand::Float(_) | Operand::Vector(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Int(_) | Operand::Float(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Operand::Int(_))
    }

    pub fn var_name(&self) -> Option<&VarName> {
        match self {
            Operand::Variable(name) => Some(name),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<usize> {
        match self {
            Operand::Label(target) => Some(*target),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Operand::Unassigned => "unassigned",
            Operand::Int(_) => "int",
            Operand::Float(_) => "float",
            Operand::Vector(_) => "vector",
            Operand::Variable(_) => "variable",
            Operand::Label(_) => "label",
        }
    }

    /// Number of numeric components (0 for non-numeric operands).
    pub fn len(&self) -> usize {
        match self {
            Operand::Int(_) | Operand::Float(_) => 1,
            Operand::Vector(v) => v.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric components as floats.
    pub fn floats(&self) -> Result<Vec<f64>> {
        match self {
            Operand::Int(n) => Ok(vec![*n as f64]),
            Operand::Float(f) => Ok(vec![*f]),
            Operand::Vector(v) => Ok(v.clone()),
            other => Err(RuntimeErrorKind::TypeMismatch {
                expected: "numeric",
                found: other.type_name(),
            }),
        }
    }

    /// The value as a single float. Vectors are rejected.
    pub fn as_float(&self) -> Result<f64> {
        match self {
            Operand::Int(n) => Ok(*n as f64),
            Operand::Float(f) => Ok(*f),
            other => Err(RuntimeErrorKind::TypeMismatch {
                expected: "scalar",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Operand::Int(n) => Ok(*n),
            other => Err(RuntimeErrorKind::TypeMismatch {
                expected: "int",
                found: other.type_name(),
            }),
        }
    }

    /// True if any component is non-zero.
    pub fn is_truthy(&self) -> Result<bool> {
        Ok(self.floats()?.iter().any(|f| *f != 0.0))
    }

    /// Fails if any component is NaN or infinite.
    pub fn check_finite(&self) -> Result<()> {
        if let Operand::Float(_) | Operand::Vector(_) = self {
            for f in self.floats()? {
                if f.is_nan() {
                    return Err(RuntimeErrorKind::NonFinite("NaN"));
                }
                if f.is_infinite() {
                    return Err(RuntimeErrorKind::NonFinite("infinity"));
                }
            }
        }
        Ok(())
    }

    /// Elementwise binary arithmetic with scalar broadcasting.
    ///
    /// The result is `Int` only when both inputs are `Int`.
    pub fn binary(
        &self,
        other: &Operand,
        int_op: impl Fn(i64, i64) -> Result<i64>,
        float_op: impl Fn(f64, f64) -> Result<f64>,
    ) -> Result<Operand> {
        if let (Operand::Int(a), Operand::Int(b)) = (self, other) {
            return Ok(Operand::Int(int_op(*a, *b)?));
        }
        let values = broadcast(&self.floats()?, &other.floats()?, float_op)?;
        Ok(Operand::from_floats(values))
    }

    /// Elementwise float function. The result is always floating point.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Result<Operand> {
        Ok(Operand::from_floats(
            self.floats()?.into_iter().map(f).collect(),
        ))
    }

    /// Elementwise function that preserves `Int`.
    pub fn map_numeric(&self, int_op: impl Fn(i64) -> i64, float_op: impl Fn(f64) -> f64) -> Result<Operand> {
        match self {
            Operand::Int(n) => Ok(Operand::Int(int_op(*n))),
            other => other.map(float_op),
        }
    }

    /// Compare two values, collapsing vectors to a single result
    /// that holds only if every component pair satisfies `pred`.
    pub fn compare(&self, other: &Operand, pred: impl Fn(f64, f64) -> bool) -> Result<bool> {
        if let (Operand::Int(a), Operand::Int(b)) = (self, other) {
            return Ok(pred(*a as f64, *b as f64));
        }
        let a = self.floats()?;
        let b = other.floats()?;
        let flags = broadcast(&a, &b, |x, y| Ok(if pred(x, y) { 1.0 } else { 0.0 }))?;
        Ok(flags.iter().all(|f| *f != 0.0))
    }

    /// Read one component (`$v[i]`).
    pub fn component(&self, index: usize) -> Result<Operand> {
        match self {
            Operand::Vector(v) => v
                .get(index)
                .map(|f| Operand::Float(*f))
                .ok_or(RuntimeErrorKind::IndexOutOfRange {
                    index,
                    len: v.len(),
                }),
            other => Err(RuntimeErrorKind::NotAVector(other.type_name().to_string())),
        }
    }

    /// Build a new value from selected components (`$v.yx`). Repeats are allowed.
    pub fn swizzled(&self, indices: &[usize]) -> Result<Operand> {
        let Operand::Vector(v) = self else {
            return Err(RuntimeErrorKind::NotAVector(self.type_name().to_string()));
        };
        let mut out = Vec::with_capacity(indices.len());
        for &i in indices {
            let f = v.get(i).ok_or(RuntimeErrorKind::IndexOutOfRange {
                index: i,
                len: v.len(),
            })?;
            out.push(*f);
        }
        Ok(Operand::from_floats(out))
    }

    /// Write `value` into the given components of this vector.
    ///
    /// Component `k` of the target takes component `min(k, len-1)` of `value`,
    /// so a scalar broadcasts across every selected component.
    pub fn write_components(&mut self, indices: &[usize], value: &Operand) -> Result<()> {
        let source = value.floats()?;
        if source.is_empty() {
            return Err(RuntimeErrorKind::Shape("cannot assign an empty vector".to_string()));
        }
        let Operand::Vector(v) = self else {
            return Err(RuntimeErrorKind::NotAVector(self.type_name().to_string()));
        };
        let len = v.len();
        for (k, &i) in indices.iter().enumerate() {
            let slot = v
                .get_mut(i)
                .ok_or(RuntimeErrorKind::IndexOutOfRange { index: i, len })?;
            *slot = source[k.min(source.len() - 1)];
        }
        Ok(())
    }
}

/// Apply `op` pairwise, broadcasting a length-1 side across the other.
pub fn broadcast(a: &[f64], b: &[f64], op: impl Fn(f64, f64) -> Result<f64>) -> Result<Vec<f64>> {
    match (a.len(), b.len()) {
        (1, _) => b.iter().map(|y| op(a[0], *y)).collect(),
        (_, 1) => a.iter().map(|x| op(*x, b[0])).collect(),
        (n, m) if n == m => a.iter().zip(b).map(|(x, y)| op(*x, *y)).collect(),
        (n, m) => Err(RuntimeErrorKind::LengthMismatch { left: n, right: m }),
    }
}

/// Format a float so integral values keep a trailing `.0`.
pub fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Unassigned => write!(f, "<unassigned>"),
            Operand::Int(n) => write!(f, "{}", n),
            Operand::Float(x) => write!(f, "{}", format_float(*x)),
            Operand::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|x| format_float(*x)).collect();
                write!(f, "[{}]", parts.join(","))
            }
            Operand::Variable(name) => write!(f, "{}", name.render(&name.slot.to_string())),
            Operand::Label(target) => write!(f, "{}", target),
        }
    }
}

/// Numbers as JSON numbers, vectors as arrays, `Unassigned` as null.
impl Serialize for Operand {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Operand::Unassigned => serializer.serialize_none(),
            Operand::Int(n) => serializer.serialize_i64(*n),
            Operand::Float(x) => serializer.serialize_f64(*x),
            Operand::Vector(v) => v.serialize(serializer),
            Operand::Variable(_) | Operand::Label(_) => serializer.collect_str(self),
        }
    }
}
