//! Vector and shader-style math used by the interpreter.
//!
//! Every function takes already-resolved numeric operands and returns a new
//! value; writing the result back (and its finiteness check) is the caller's job.

use super::value::{Operand, broadcast};
use crate::error::RuntimeErrorKind;

type Result<T> = std::result::Result<T, RuntimeErrorKind>;

/// Widest value `dim` will build.
pub const MAX_COMPONENTS: i64 = 256;

fn shape(message: impl Into<String>) -> RuntimeErrorKind {
    RuntimeErrorKind::Shape(message.into())
}

fn vector(op: &Operand, what: &str) -> Result<Vec<f64>> {
    match op {
        Operand::Vector(v) => Ok(v.clone()),
        other => Err(shape(format!("{} requires a vector, found {}", what, other.type_name()))),
    }
}

/// `a * b`, treating an `n`-vector times an `n²`-vector as a row vector times a matrix.
pub fn mul(a: &Operand, b: &Operand) -> Result<Operand> {
    let n = a.len();
    if n > 1 && b.len() == n * n {
        let v = a.floats()?;
        let m = b.floats()?;
        let out = (0..n)
            .map(|i| (0..n).map(|j| v[j] * m[i * n + j]).sum())
            .collect();
        return Ok(Operand::from_floats(out));
    }
    a.binary(b, |x, y| Ok(x.wrapping_mul(y)), |x, y| Ok(x * y))
}

pub fn div(a: &Operand, b: &Operand) -> Result<Operand> {
    a.binary(
        b,
        |x, y| x.checked_div(y).ok_or(RuntimeErrorKind::DivideByZero),
        |x, y| {
            if y == 0.0 {
                Err(RuntimeErrorKind::DivideByZero)
            } else {
                Ok(x / y)
            }
        },
    )
}

/// Truncated remainder.
pub fn modulo(a: &Operand, b: &Operand) -> Result<Operand> {
    a.binary(
        b,
        |x, y| x.checked_rem(y).ok_or(RuntimeErrorKind::DivideByZero),
        |x, y| {
            if y == 0.0 {
                Err(RuntimeErrorKind::DivideByZero)
            } else {
                Ok(x % y)
            }
        },
    )
}

/// Like `f64::signum`, except zero maps to zero.
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

pub fn fract(x: f64) -> f64 {
    x - x.floor()
}

/// `dim`: resize a value to `width` components.
pub fn dim(value: &Operand, width: i64) -> Result<Operand> {
    if !(1..=MAX_COMPONENTS).contains(&width) {
        return Err(shape(format!("cannot resize to {} components", width)));
    }
    let width = width as usize;
    let floats = value.floats()?;
    if width == floats.len() {
        return Ok(value.clone());
    }
    if width < floats.len() {
        return Ok(Operand::from_floats(floats[..width].to_vec()));
    }
    if floats.len() == 1 {
        return Ok(Operand::from_floats(vec![floats[0]; width]));
    }
    Err(shape(format!(
        "cannot expand a {}-component vector to {}",
        floats.len(),
        width
    )))
}

pub fn dot(a: &Operand, b: &Operand) -> Result<Operand> {
    let a = a.floats()?;
    let b = b.floats()?;
    if a.len() != b.len() {
        return Err(RuntimeErrorKind::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(Operand::Float(a.iter().zip(&b).map(|(x, y)| x * y).sum()))
}

pub fn cross(a: &Operand, b: &Operand) -> Result<Operand> {
    let a = a.floats()?;
    let b = b.floats()?;
    if a.len() != 3 || b.len() != 3 {
        return Err(shape("cross requires two 3-component vectors"));
    }
    Ok(Operand::Vector(vec![
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]))
}

pub fn length(a: &Operand) -> Result<Operand> {
    let sum: f64 = a.floats()?.iter().map(|x| x * x).sum();
    Ok(Operand::Float(sum.sqrt()))
}

/// Unit vector in the direction of `a`; the zero vector maps to itself.
pub fn normalize(a: &Operand) -> Result<Operand> {
    let v = vector(a, "normalize")?;
    let len = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if len == 0.0 {
        return Ok(Operand::Vector(vec![0.0; v.len()]));
    }
    Ok(Operand::Vector(v.iter().map(|x| x / len).collect()))
}

/// `i - 2·dot(n, i)·n`
pub fn reflect(i: &Operand, n: &Operand) -> Result<Operand> {
    let iv = i.floats()?;
    let nv = n.floats()?;
    if iv.len() != nv.len() {
        return Err(RuntimeErrorKind::LengthMismatch {
            left: iv.len(),
            right: nv.len(),
        });
    }
    let d: f64 = iv.iter().zip(&nv).map(|(x, y)| x * y).sum();
    Ok(Operand::from_floats(
        iv.iter().zip(&nv).map(|(x, y)| x - 2.0 * d * y).collect(),
    ))
}

/// GLSL `refract(i, n, eta)`; total internal reflection yields the zero vector.
pub fn refract(i: &Operand, n: &Operand, eta: &Operand) -> Result<Operand> {
    let iv = vector(i, "refract")?;
    let nv = n.floats()?;
    if nv.len() != 3 || iv.len() != 3 {
        return Err(shape("refract requires 3-component incident and normal vectors"));
    }
    let eta = eta.as_float()?;
    let d: f64 = iv.iter().zip(&nv).map(|(x, y)| x * y).sum();
    let k = 1.0 - eta * eta * (1.0 - d * d);
    if k < 0.0 {
        return Ok(Operand::Vector(vec![0.0; 3]));
    }
    let scale = eta * d + k.sqrt();
    Ok(Operand::Vector(
        iv.iter().zip(&nv).map(|(x, y)| eta * x - scale * y).collect(),
    ))
}

/// `clamp(a, lo, hi)`, keeping `Int` when all inputs are `Int`.
pub fn clamp(a: &Operand, lo: &Operand, hi: &Operand) -> Result<Operand> {
    let lower = a.binary(lo, |x, y| Ok(x.max(y)), |x, y| Ok(x.max(y)))?;
    lower.binary(hi, |x, y| Ok(x.min(y)), |x, y| Ok(x.min(y)))
}

/// `mix(a, b, t) = a·(1-t) + b·t`
pub fn mix(a: &Operand, b: &Operand, t: &Operand) -> Result<Operand> {
    let diff = broadcast(&b.floats()?, &a.floats()?, |x, y| Ok(x - y))?;
    let scaled = broadcast(&diff, &t.floats()?, |x, y| Ok(x * y))?;
    let out = broadcast(&a.floats()?, &scaled, |x, y| Ok(x + y))?;
    Ok(Operand::from_floats(out))
}

/// GLSL `smoothstep(edge0, edge1, x)`.
pub fn smoothstep(edge0: &Operand, edge1: &Operand, x: &Operand) -> Result<Operand> {
    let span = broadcast(&edge1.floats()?, &edge0.floats()?, |a, b| Ok(a - b))?;
    let offset = broadcast(&x.floats()?, &edge0.floats()?, |a, b| Ok(a - b))?;
    let t = broadcast(&offset, &span, |a, b| {
        if b == 0.0 {
            Err(RuntimeErrorKind::DivideByZero)
        } else {
            Ok((a / b).clamp(0.0, 1.0))
        }
    })?;
    Ok(Operand::from_floats(
        t.iter().map(|t| t * t * (3.0 - 2.0 * t)).collect(),
    ))
}

/// `step(edge, a)`: 1 where `a >= edge`, else 0.
pub fn step(a: &Operand, edge: &Operand) -> Result<Operand> {
    let out = broadcast(&a.floats()?, &edge.floats()?, |x, e| {
        Ok(if x >= e { 1.0 } else { 0.0 })
    })?;
    Ok(Operand::from_floats(out))
}

pub fn pow(a: &Operand, b: &Operand) -> Result<Operand> {
    let out = broadcast(&a.floats()?, &b.floats()?, |x, y| Ok(x.powf(y)))?;
    Ok(Operand::from_floats(out))
}

pub fn min(a: &Operand, b: &Operand) -> Result<Operand> {
    a.binary(b, |x, y| Ok(x.min(y)), |x, y| Ok(x.min(y)))
}

pub fn max(a: &Operand, b: &Operand) -> Result<Operand> {
    a.binary(b, |x, y| Ok(x.max(y)), |x, y| Ok(x.max(y)))
}

fn int_pair(a: &Operand, b: &Operand) -> Result<(i64, i64)> {
    Ok((a.as_int()?, b.as_int()?))
}

pub fn shift_left(a: &Operand, b: &Operand) -> Result<Operand> {
    let (x, y) = int_pair(a, b)?;
    Ok(Operand::Int(x.wrapping_shl(y as u32)))
}

pub fn shift_right(a: &Operand, b: &Operand) -> Result<Operand> {
    let (x, y) = int_pair(a, b)?;
    Ok(Operand::Int(x.wrapping_shr(y as u32)))
}

pub fn bit_and(a: &Operand, b: &Operand) -> Result<Operand> {
    let (x, y) = int_pair(a, b)?;
    Ok(Operand::Int(x & y))
}

pub fn bit_or(a: &Operand, b: &Operand) -> Result<Operand> {
    let (x, y) = int_pair(a, b)?;
    Ok(Operand::Int(x | y))
}
