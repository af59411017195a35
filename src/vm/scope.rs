//! Runtime variable binding: a stack of frames linked by index.

use super::value::Operand;

/// Slots a frame can hold; the assembler refuses programs that name more variables.
pub const MAX_SLOTS: usize = 256;

/// How a frame participates in name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
}

/// One binding set. `parent` is an index into the owning `ScopeStack`.
#[derive(Debug, Clone)]
pub struct ScopeFrame {
    pub kind: ScopeKind,
    pub parent: Option<usize>,
    slots: Vec<Option<Operand>>,
}

impl ScopeFrame {
    fn new(kind: ScopeKind, parent: Option<usize>) -> Self {
        Self {
            kind,
            parent,
            slots: Vec::new(),
        }
    }

    pub fn get(&self, slot: usize) -> Option<&Operand> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, slot: usize) -> Option<&mut Operand> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn put(&mut self, slot: usize, value: Operand) {
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        self.slots[slot] = Some(value);
    }

    /// Bound slots in ascending order.
    pub fn bindings(&self) -> impl Iterator<Item = (usize, &Operand)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, v)| v.as_ref().map(|v| (slot, v)))
    }
}

/// The frame stack of one interpreter run. Index 0 is always the Global frame.
///
/// Block frames are transparent to lookup. A Function frame is opaque: a
/// lookup that reaches it continues at the Global frame.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: vec![ScopeFrame::new(ScopeKind::Global, None)],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current(&self) -> &ScopeFrame {
        &self.frames[self.frames.len() - 1]
    }

    pub fn global(&self) -> &ScopeFrame {
        &self.frames[0]
    }

    pub fn frames(&self) -> &[ScopeFrame] {
        &self.frames
    }

    pub fn push(&mut self, kind: ScopeKind) {
        let top = self.frames.len() - 1;
        let parent = match kind {
            ScopeKind::Function => 0,
            _ => top,
        };
        self.frames.push(ScopeFrame::new(kind, Some(parent)));
    }

    /// Pop the innermost frame. The Global frame cannot be popped.
    pub fn pop(&mut self) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        self.frames.pop();
        true
    }

    /// Pop frames until `depth` remain.
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth.max(1));
    }

    /// Indices of the frames visible from the current one, innermost first.
    pub fn visible(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = Some(self.frames.len() - 1);
        std::iter::from_fn(move || {
            let index = next?;
            next = self.frames[index].parent;
            Some(index)
        })
    }

    fn owner(&self, slot: usize) -> Option<usize> {
        self.visible().find(|&i| self.frames[i].get(slot).is_some())
    }

    pub fn is_defined(&self, slot: usize) -> bool {
        self.owner(slot).is_some()
    }

    pub fn is_defined_locally(&self, slot: usize) -> bool {
        self.current().get(slot).is_some()
    }

    /// Bind `slot` in the current frame, shadowing any outer binding.
    pub fn define(&mut self, slot: usize, value: Operand) {
        let top = self.frames.len() - 1;
        self.frames[top].put(slot, value);
    }

    /// Overwrite an existing visible binding. Returns false if `slot` is not visible.
    pub fn set(&mut self, slot: usize, value: Operand) -> bool {
        match self.owner(slot) {
            Some(index) => {
                self.frames[index].put(slot, value);
                true
            }
            None => false,
        }
    }

    /// Overwrite the visible binding, or define it in the current frame.
    pub fn assign(&mut self, slot: usize, value: Operand) {
        let index = self.owner(slot).unwrap_or(self.frames.len() - 1);
        self.frames[index].put(slot, value);
    }

    pub fn get(&self, slot: usize) -> Option<&Operand> {
        self.owner(slot).and_then(|i| self.frames[i].get(slot))
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Operand> {
        let index = self.owner(slot)?;
        self.frames[index].get_mut(slot)
    }

    /// Visible bindings with their frame kind, innermost frame first.
    /// A shadowed binding is reported once, from the frame that wins lookup.
    pub fn visible_bindings(&self) -> Vec<(ScopeKind, usize, &Operand)> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for index in self.visible() {
            let frame = &self.frames[index];
            for (slot, value) in frame.bindings() {
                if !seen.contains(&slot) {
                    seen.push(slot);
                    out.push((frame.kind, slot, value));
                }
            }
        }
        out
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_shadowing_does_not_leak() {
        let mut scope = ScopeStack::new();
        scope.assign(1, Operand::Int(1));
        scope.push(ScopeKind::Block);
        scope.define(1, Operand::Unassigned);
        scope.assign(1, Operand::Int(2));
        assert_eq!(scope.get(1), Some(&Operand::Int(2)));
        assert!(scope.pop());
        assert_eq!(scope.get(1), Some(&Operand::Int(1)));
    }

    #[test]
    fn test_block_sees_outer_frames() {
        let mut scope = ScopeStack::new();
        scope.push(ScopeKind::Function);
        scope.assign(1, Operand::Int(5));
        scope.push(ScopeKind::Block);
        assert!(scope.set(1, Operand::Int(6)));
        assert!(scope.pop());
        assert_eq!(scope.get(1), Some(&Operand::Int(6)));
    }

    #[test]
    fn test_function_frame_is_opaque() {
        let mut scope = ScopeStack::new();
        scope.assign(1, Operand::Int(1));
        scope.push(ScopeKind::Function);
        scope.assign(2, Operand::Int(2));
        scope.push(ScopeKind::Function);

        // Globals remain visible, the caller's locals do not.
        assert!(scope.is_defined(1));
        assert!(!scope.is_defined(2));
        assert!(!scope.set(2, Operand::Int(3)));
    }

    #[test]
    fn test_global_frame_cannot_be_popped() {
        let mut scope = ScopeStack::new();
        assert!(!scope.pop());
        scope.push(ScopeKind::Block);
        assert!(scope.pop());
        assert!(!scope.pop());
    }

    #[test]
    fn test_visible_bindings_reports_winner() {
        let mut scope = ScopeStack::new();
        scope.assign(1, Operand::Int(1));
        scope.push(ScopeKind::Block);
        scope.define(1, Operand::Int(9));
        let bindings = scope.visible_bindings();
        assert_eq!(bindings, vec![(ScopeKind::Block, 1, &Operand::Int(9))]);
    }
}
