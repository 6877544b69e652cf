//! Ember JIT Runtime Stubs
//!
//! This crate provides the bridge between code produced by the optimizing
//! compiler and the VM's native runtime:
//! - **Catalog**: the closed set of runtime stubs and their metadata (`stubs` module)
//! - **Signatures**: calling-convention descriptors, memoized per parameter tuple
//! - **Codegen**: one-time generation of bridging routines with Cranelift (`codegen` module)
//! - **Entry table**: the process-wide, read-only table of stub entry points
//! - **Exceptions**: handler search, frame unwinding and deoptimization (`exception` module)
//! - **Profiling**: named counters incremented directly from generated code
//!
//! # Example
//!
//! ```rust,ignore
//! use ember_runtime::{startup, GeneratorConfig, NativeImplTable, StubId};
//!
//! let table = startup::initialize(&NativeImplTable::runtime_defaults(), GeneratorConfig::default())?;
//! let new_array = table.entry_address(StubId::NewArray);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]

/// Stub catalog, value kinds, signatures and native implementation tables
pub mod stubs;

/// Stub code generation (Cranelift bridging routines and code blobs)
pub mod codegen;

/// Process-wide table of generated stub entry points
pub mod entry_table;

/// Execution context and default native implementations
pub mod runtime;

/// Exception dispatch and deoptimization
pub mod exception;

/// Named profiling counters
pub mod profiling;

/// Startup sequencing for one-time stub generation
pub mod startup;

mod config;
mod error;

pub use codegen::StubGenerator;
pub use config::{GeneratorConfig, OptLevel};
pub use entry_table::{EntryTable, StubEntry};
pub use error::{SignatureRangeError, StubError, TrapError};
pub use exception::{ExceptionDispatcher, ImplicitFault};
pub use profiling::{named_counters, CounterTag, NamedCounterRegistry};
pub use runtime::{ExecutionContext, ObjRef, VmServices};
pub use stubs::catalog::{Continuation, StubFlags, StubId};
pub use stubs::natives::{NativeImplTable, RuntimeRoutine};
pub use stubs::signature::{CallSignature, SignatureRegistry};
pub use stubs::types::{ValueKind, VectorKind};
