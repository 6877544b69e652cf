//! Profiling counters shared between compiled code and diagnostics

pub mod counters;

pub use counters::{
    named_counters, scope_name, CounterSummary, CounterTag, NamedCounter, NamedCounterRegistry,
    ScopeDesc,
};
