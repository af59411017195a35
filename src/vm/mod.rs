mod debug;
mod intrinsics;
mod ops;
mod program;
mod scope;
mod value;
mod var_name;
mod vm;

pub use debug::DebugSnap;
pub use ops::{OpCode, Shape, Signature, verify_tables};
pub use program::{Instruction, LabelTable, Program, SymbolTable};
pub use scope::{MAX_SLOTS, ScopeFrame, ScopeKind, ScopeStack};
pub use value::{Operand, format_float};
pub use var_name::{VarName, VarToken, parse_var_token, swizzle_index};
pub use vm::{RETVAL_SLOT, SharedOutput, Vm};
