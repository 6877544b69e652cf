//! Exception dispatch for compiled code
//!
//! Handler search runs synchronously on the throwing thread over the
//! context's explicit frame stack. Frames that an exception unwinds through
//! may be deoptimized on the way out; uncommon traps deoptimize the trapping
//! frame and resume it in the interpreter.

pub mod code_table;
pub mod deopt;
pub mod dispatcher;
pub mod frames;

pub use code_table::{CodeTable, CompiledMethod, HandlerEntry, HandlerTable};
pub use deopt::{DeoptAction, DeoptReason, TrapRequest, UnrollBlock};
pub use dispatcher::{DispatchOutcome, DispatchState, ExceptionDispatcher};
pub use frames::{Frame, FrameId, FrameStack};

/// Hardware-level fault converted into an ordinary exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImplicitFault {
    /// Dereference of a null reference
    NullDereference,
    /// Integer division by zero
    DivisionByZero,
    /// Stack guard page reached
    StackOverflow,
}

impl std::fmt::Display for ImplicitFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImplicitFault::NullDereference => "null dereference",
            ImplicitFault::DivisionByZero => "division by zero",
            ImplicitFault::StackOverflow => "stack overflow",
        };
        f.write_str(s)
    }
}
