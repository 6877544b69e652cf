//! Named profiling counters
//!
//! Compiled code increments a counter by loading, adding and storing its
//! 32-bit count in place, so a counter's address must never move once it is
//! handed out. Counters are therefore individually boxed behind `Arc` and the
//! registry only ever appends. Creation is rare and takes the registry lock;
//! increments are unsynchronized (each counter has exactly one call site).

use std::io::{self, Write};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// What a counter counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterTag {
    /// Plain event counter
    None,
    /// Dynamic lock acquisitions at one monitor-enter site
    Lock,
    /// Acquisitions of a lock the compiler eliminated
    EliminatedLock,
}

impl CounterTag {
    /// Label printed after the counter name; empty for plain counters
    pub fn label(self) -> &'static str {
        match self {
            CounterTag::None => "",
            CounterTag::Lock => "lock",
            CounterTag::EliminatedLock => "eliminated",
        }
    }
}

/// One inlining scope of a counter's call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDesc {
    /// Declaring class of the method
    pub holder: String,
    /// Method name
    pub method: String,
    /// Bytecode index in this scope (negative means unknown)
    pub bci: i32,
}

impl ScopeDesc {
    /// Create a scope
    pub fn new(holder: impl Into<String>, method: impl Into<String>, bci: i32) -> Self {
        ScopeDesc {
            holder: holder.into(),
            method: method.into(),
            bci,
        }
    }
}

/// Counter name for a call site: `Holder.method@bci` per scope, youngest
/// scope first, separated by spaces
pub fn scope_name(scopes: &[ScopeDesc]) -> String {
    let mut name = String::new();
    for (i, scope) in scopes.iter().enumerate() {
        if i > 0 {
            name.push(' ');
        }
        name.push_str(&format!("{}.{}@{}", scope.holder, scope.method, scope.bci.max(0)));
    }
    name
}

/// A tagged counter with a stable address
#[derive(Debug)]
pub struct NamedCounter {
    name: String,
    tag: CounterTag,
    count: AtomicI32,
}

impl NamedCounter {
    fn new(name: String, tag: CounterTag) -> Self {
        NamedCounter {
            name,
            tag,
            count: AtomicI32::new(0),
        }
    }

    /// Counter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counter tag
    pub fn tag(&self) -> CounterTag {
        self.tag
    }

    /// Current count
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Increment from Rust, return the new count
    pub fn increment(&self) -> i32 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Address generated code increments
    pub fn count_addr(&self) -> usize {
        self.count.as_ptr() as usize
    }
}

/// Lock statistics accumulated by [`NamedCounterRegistry::print_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSummary {
    /// Counters printed
    pub printed: usize,
    /// Sum over `Lock` counters
    pub dynamic_locks: i64,
    /// Sum over `EliminatedLock` counters
    pub eliminated_locks: i64,
}

/// Append-only registry of named counters
#[derive(Debug, Default)]
pub struct NamedCounterRegistry {
    counters: Mutex<Vec<Arc<NamedCounter>>>,
}

static NAMED_COUNTERS: Lazy<NamedCounterRegistry> = Lazy::new(NamedCounterRegistry::new);

/// The process-wide counter registry
pub fn named_counters() -> &'static NamedCounterRegistry {
    &NAMED_COUNTERS
}

impl NamedCounterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and register a counter
    pub fn new_counter(&self, name: impl Into<String>, tag: CounterTag) -> Arc<NamedCounter> {
        let counter = Arc::new(NamedCounter::new(name.into(), tag));
        self.counters.lock().push(counter.clone());
        counter
    }

    /// Allocate a counter named after its inlining scopes
    pub fn new_counter_for_scopes(&self, scopes: &[ScopeDesc], tag: CounterTag) -> Arc<NamedCounter> {
        self.new_counter(scope_name(scopes), tag)
    }

    /// Counters, most recently created first
    pub fn snapshot(&self) -> Vec<Arc<NamedCounter>> {
        self.counters.lock().iter().rev().cloned().collect()
    }

    /// Number of registered counters
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Whether no counters are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Print every counter (most recent first) followed by the lock summary
    pub fn print_all(&self, out: &mut dyn Write) -> io::Result<CounterSummary> {
        let mut summary = CounterSummary::default();
        for counter in self.snapshot() {
            let count = counter.count();
            match counter.tag {
                CounterTag::Lock => summary.dynamic_locks += count as i64,
                CounterTag::EliminatedLock => summary.eliminated_locks += count as i64,
                CounterTag::None => {}
            }
            match counter.tag.label() {
                "" => writeln!(out, "{} {}", count, counter.name)?,
                label => writeln!(out, "{} {} ({})", count, counter.name, label)?,
            }
            summary.printed += 1;
        }

        let total = summary.dynamic_locks + summary.eliminated_locks;
        if total > 0 {
            writeln!(out, "dynamic locks: {}", summary.dynamic_locks)?;
            if summary.eliminated_locks > 0 {
                let percent = summary.eliminated_locks * 100 / total;
                writeln!(out, "eliminated locks: {} ({}%)", summary.eliminated_locks, percent)?;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_name() {
        let scopes = vec![
            ScopeDesc::new("coll/Vector", "add", 12),
            ScopeDesc::new("Main", "run", -1),
        ];
        assert_eq!(scope_name(&scopes), "coll/Vector.add@12 Main.run@0");
        assert_eq!(scope_name(&[]), "");
    }

    #[test]
    fn test_counter_address_is_stable() {
        let registry = NamedCounterRegistry::new();
        let first = registry.new_counter("first", CounterTag::None);
        let addr = first.count_addr();
        for i in 0..64 {
            registry.new_counter(format!("filler {}", i), CounterTag::None);
        }
        assert_eq!(first.count_addr(), addr);

        // Writes through the raw address are visible to readers
        unsafe { *(addr as *mut i32) += 5 };
        assert_eq!(first.count(), 5);
    }

    #[test]
    fn test_print_all_newest_first_with_summary() {
        let registry = NamedCounterRegistry::new();
        let locks = registry.new_counter("A.lock@1", CounterTag::Lock);
        let elided = registry.new_counter("A.elided@2", CounterTag::EliminatedLock);
        registry.new_counter("plain", CounterTag::None);
        for _ in 0..3 {
            locks.increment();
        }
        elided.increment();

        let mut out = Vec::new();
        let summary = registry.print_all(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "0 plain\n1 A.elided@2 (eliminated)\n3 A.lock@1 (lock)\ndynamic locks: 3\neliminated locks: 1 (25%)\n"
        );
        assert_eq!(summary.printed, 3);
        assert_eq!(summary.dynamic_locks, 3);
        assert_eq!(summary.eliminated_locks, 1);
    }

    #[test]
    fn test_no_lock_summary_without_locks() {
        let registry = NamedCounterRegistry::new();
        registry.new_counter("x", CounterTag::None).increment();
        let mut out = Vec::new();
        registry.print_all(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1 x\n");
    }
}
