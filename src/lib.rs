//! Tetra - a bytecode VM for per-pixel shader programs
//!
//! This library provides the assembler, optimizer and interpreter, plus a
//! small multi-threaded renderer that runs one VM per pixel.

pub mod assembler;
pub mod config;
pub mod error;
pub mod logging;
pub mod optimizer;
pub mod pipeline;
pub mod render;
pub mod vm;

// Re-export commonly used types
pub use assembler::{Assembler, SHADER_UNIFORMS};
pub use config::{ProjectConfig, RenderConfig, RuntimeConfig};
pub use error::{Error, Result, RuntimeError, RuntimeErrorKind, SyntaxError};
pub use optimizer::{OptimizeStats, Optimizer};
pub use render::{Image, RenderOptions, render_image};
pub use vm::{Operand, Program, Vm};
