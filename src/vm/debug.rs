//! Step snapshots for `--debug` runs.

use super::program::Program;
use super::scope::{ScopeKind, ScopeStack};

/// Interpreter state observed just before an instruction executes.
#[derive(Debug, Clone)]
pub struct DebugSnap {
    function: String,
    instruction: String,
    line: Option<usize>,
    variables: Vec<(ScopeKind, String, String)>,
}

impl DebugSnap {
    /// `function` is the call target of the innermost active call, if any.
    pub fn capture(program: &Program, ip: usize, function: Option<usize>, scope: &ScopeStack) -> Self {
        let function = match function {
            Some(target) => format!("{}()", program.function_name(target)),
            None => "<Root>".to_string(),
        };
        let variables = scope
            .visible_bindings()
            .into_iter()
            .map(|(kind, slot, value)| (kind, program.symbols.display_name(slot), value.to_string()))
            .collect();
        Self {
            function,
            instruction: program.render_instruction(ip),
            line: program.instructions.get(ip).and_then(|i| i.line),
            variables,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// The instruction header followed by every variable that is new (`+`)
    /// or changed (` `) in `next`.
    pub fn diff(&self, next: &DebugSnap) -> String {
        let line = self.line.map(|l| l.to_string()).unwrap_or_default();
        let mut out = format!(">> {:<32} {}:{}\n", self.instruction, self.function, line);

        let mut changes: Vec<(ScopeKind, char, &str, &str)> = Vec::new();
        for (kind, name, value) in &next.variables {
            let before = self
                .variables
                .iter()
                .find(|(k, n, _)| k == kind && n == name);
            match before {
                Some((_, _, old)) if old == value => {}
                Some(_) => changes.push((*kind, ' ', name, value)),
                None => changes.push((*kind, '+', name, value)),
            }
        }
        changes.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.2.cmp(b.2)));

        for (kind, marker, name, value) in &changes {
            let scope = if *kind == ScopeKind::Global { "🌍 " } else { "  " };
            out.push_str(&format!("{}{}{:<9} = {}\n", scope, marker, name, value));
        }
        if !changes.is_empty() {
            out.push('\n');
        }
        out
    }
}
