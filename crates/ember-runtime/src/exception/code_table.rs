//! Code-range to handler-table lookup
//!
//! An ordered map from the start address of each compiled method to the
//! method's metadata. A faulting program point resolves to the method whose
//! `[start, end)` range covers it; the method's handler table then maps the
//! pc's offset to a handler.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;

/// One protected region of a compiled method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerEntry {
    /// First covered code offset
    pub start: u32,
    /// One past the last covered code offset
    pub end: u32,
    /// Code offset of the handler
    pub handler: u32,
}

impl HandlerEntry {
    /// Whether this entry covers `offset`
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Handler entries of one method, innermost regions first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerTable {
    entries: Vec<HandlerEntry>,
}

impl HandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region; earlier entries win when regions nest
    pub fn add(&mut self, start: u32, end: u32, handler: u32) -> &mut Self {
        self.entries.push(HandlerEntry { start, end, handler });
        self
    }

    /// Handler offset for a faulting offset
    pub fn find(&self, offset: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.covers(offset))
            .map(|e| e.handler)
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Metadata of one compiled method
#[derive(Debug)]
pub struct CompiledMethod {
    /// Method name, for diagnostics
    pub name: String,
    /// Code address range
    pub code: Range<usize>,
    /// Exception handlers keyed by code offset
    pub handlers: HandlerTable,
}

impl CompiledMethod {
    /// Create method metadata
    pub fn new(name: impl Into<String>, code: Range<usize>, handlers: HandlerTable) -> Self {
        CompiledMethod {
            name: name.into(),
            code,
            handlers,
        }
    }

    /// Absolute handler address for a faulting pc inside this method
    pub fn handler_for(&self, pc: usize) -> Option<usize> {
        if !self.code.contains(&pc) {
            return None;
        }
        let offset = u32::try_from(pc - self.code.start).ok()?;
        self.handlers
            .find(offset)
            .map(|h| self.code.start + h as usize)
    }
}

/// Ordered table of installed compiled methods
#[derive(Debug, Default)]
pub struct CodeTable {
    methods: RwLock<BTreeMap<usize, Arc<CompiledMethod>>>,
}

impl CodeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a method. Returns false (and installs nothing) if its range
    /// is empty or overlaps an installed method.
    pub fn register(&self, method: CompiledMethod) -> bool {
        if method.code.is_empty() {
            return false;
        }
        let mut methods = self.methods.write();
        let overlaps_prev = methods
            .range(..method.code.end)
            .next_back()
            .map(|(_, m)| m.code.end > method.code.start)
            .unwrap_or(false);
        if overlaps_prev {
            return false;
        }
        methods.insert(method.code.start, Arc::new(method));
        true
    }

    /// Remove the method starting at `start`
    pub fn unregister(&self, start: usize) -> Option<Arc<CompiledMethod>> {
        self.methods.write().remove(&start)
    }

    /// Method whose code range covers `pc`
    pub fn lookup(&self, pc: usize) -> Option<Arc<CompiledMethod>> {
        let methods = self.methods.read();
        let (_, method) = methods.range(..=pc).next_back()?;
        if method.code.contains(&pc) {
            Some(method.clone())
        } else {
            None
        }
    }

    /// Number of installed methods
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    /// Whether no methods are installed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_table_innermost_first() {
        let mut table = HandlerTable::new();
        table.add(0x10, 0x20, 0x80).add(0x00, 0x40, 0x90);
        assert_eq!(table.find(0x18), Some(0x80));
        assert_eq!(table.find(0x30), Some(0x90));
        assert_eq!(table.find(0x40), None);
    }

    #[test]
    fn test_lookup_by_pc() {
        let code = CodeTable::new();
        assert!(code.register(CompiledMethod::new("a", 0x1000..0x1100, HandlerTable::new())));
        assert!(code.register(CompiledMethod::new("b", 0x2000..0x2400, HandlerTable::new())));

        assert_eq!(code.lookup(0x1000).unwrap().name, "a");
        assert_eq!(code.lookup(0x10FF).unwrap().name, "a");
        assert!(code.lookup(0x1100).is_none());
        assert_eq!(code.lookup(0x2200).unwrap().name, "b");
        assert!(code.lookup(0x0FFF).is_none());
    }

    #[test]
    fn test_register_rejects_overlap() {
        let code = CodeTable::new();
        assert!(code.register(CompiledMethod::new("a", 0x1000..0x1100, HandlerTable::new())));
        assert!(!code.register(CompiledMethod::new("b", 0x10F0..0x1200, HandlerTable::new())));
        assert!(!code.register(CompiledMethod::new("c", 0x0F00..0x1001, HandlerTable::new())));
        assert!(!code.register(CompiledMethod::new("empty", 0x3000..0x3000, HandlerTable::new())));
        assert!(code.register(CompiledMethod::new("d", 0x1100..0x1200, HandlerTable::new())));
        assert_eq!(code.len(), 2);
    }

    #[test]
    fn test_handler_for_absolute_pc() {
        let mut handlers = HandlerTable::new();
        handlers.add(0x0, 0x20, 0x50);
        let method = CompiledMethod::new("m", 0x4000..0x4100, handlers);
        assert_eq!(method.handler_for(0x4010), Some(0x4050));
        assert_eq!(method.handler_for(0x4030), None);
        assert_eq!(method.handler_for(0x5000), None);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_offsets_past_u32_have_no_handler() {
        let mut handlers = HandlerTable::new();
        handlers.add(0x0, 0x20, 0x10);
        let start = 0x1_0000_0000usize;
        let method = CompiledMethod::new("huge", start..start + 0x2_0000_0000, handlers);
        assert_eq!(method.handler_for(start + 0x8), Some(start + 0x10));
        // would alias offset 0x8 if truncated
        assert_eq!(method.handler_for(start + 0x1_0000_0008), None);
    }
}
