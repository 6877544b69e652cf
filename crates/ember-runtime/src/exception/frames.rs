//! Explicit compiled-frame stack
//!
//! The dispatcher never walks the machine stack. Each execution context
//! keeps a `FrameStack` of the compiled frames currently active on it,
//! youngest last, and records which frames have been deoptimized. The
//! deoptimized set outlives the frames themselves so the query stays
//! answerable after unwinding; it is pruned when a new call chain starts on
//! an empty stack, since older activations are gone for good.

use rustc_hash::FxHashSet;

/// Identity of one activation of a compiled method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// One compiled frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame identity
    pub id: FrameId,
    /// Current program point (return address of the outgoing call, or the faulting pc)
    pub pc: usize,
    /// Bytecode index the pc maps to, used to resume after deoptimization
    pub bci: i32,
    /// Frame is marked for deoptimization when the exception unwinds through it
    pub deopt_eligible: bool,
}

/// Stack of compiled frames for one execution context
#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
    deoptimized: FxHashSet<FrameId>,
    next_id: u64,
}

impl FrameStack {
    /// Create an empty frame stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new youngest frame and return its id
    pub fn push(&mut self, pc: usize, bci: i32, deopt_eligible: bool) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        if self.frames.is_empty() {
            self.deoptimized.clear();
        }
        self.frames.push(Frame {
            id,
            pc,
            bci,
            deopt_eligible,
        });
        id
    }

    /// Pop the youngest frame
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// The youngest frame
    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// The youngest frame, mutably (to update its pc)
    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Look up a live frame by id
    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.iter().rev().find(|f| f.id == id)
    }

    /// Whether a frame with this id is still on the stack
    pub fn contains(&self, id: FrameId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames are live
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Live frames, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Whether `id` has been deoptimized (live or already unwound)
    pub fn is_deoptimized(&self, id: FrameId) -> bool {
        self.deoptimized.contains(&id)
    }

    /// Record that `id` is deoptimized; false if it already was
    pub(crate) fn mark_deoptimized(&mut self, id: FrameId) -> bool {
        self.deoptimized.insert(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_order() {
        let mut stack = FrameStack::new();
        let a = stack.push(0x100, 0, false);
        let b = stack.push(0x200, 3, true);
        assert_ne!(a, b);
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top().unwrap().id, b);
        assert_eq!(stack.pop().unwrap().id, b);
        assert_eq!(stack.top().unwrap().id, a);
    }

    #[test]
    fn test_deoptimized_survives_pop() {
        let mut stack = FrameStack::new();
        let a = stack.push(0x100, 0, true);
        assert!(!stack.is_deoptimized(a));
        assert!(stack.mark_deoptimized(a));
        assert!(!stack.mark_deoptimized(a));
        stack.pop();
        assert!(!stack.contains(a));
        assert!(stack.is_deoptimized(a));
    }

    #[test]
    fn test_new_call_chain_prunes_deoptimized() {
        let mut stack = FrameStack::new();
        let outer = stack.push(0x100, 0, false);
        let inner = stack.push(0x200, 0, true);
        stack.mark_deoptimized(inner);
        stack.pop();

        // still answerable while the chain is live
        let sibling = stack.push(0x300, 0, false);
        assert!(stack.is_deoptimized(inner));
        stack.mark_deoptimized(sibling);
        stack.pop();
        stack.pop();
        assert!(!stack.contains(outer));
        assert!(stack.is_deoptimized(inner));

        let next = stack.push(0x400, 0, false);
        assert!(!stack.is_deoptimized(inner));
        assert!(!stack.is_deoptimized(sibling));
        assert!(stack.deoptimized.is_empty());
        assert!(!stack.is_deoptimized(next));
    }
}
