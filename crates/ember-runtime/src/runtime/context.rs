//! Per-thread execution context
//!
//! Compiled code receives a `*mut ExecutionContext` as its first argument and
//! hands it to every runtime stub. The leading fields are `#[repr(C)]` so
//! generated code can address them with fixed offsets (see [`offsets`]); the
//! remaining fields are only touched from Rust.

use std::sync::Arc;

use super::services::VmServices;
use crate::exception::deopt::UnrollBlock;
use crate::exception::dispatcher::ExceptionDispatcher;
use crate::exception::frames::FrameStack;

/// Managed reference as it crosses the stub boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjRef(pub u64);

impl ObjRef {
    /// The null reference
    pub const NULL: ObjRef = ObjRef(0);

    /// Whether this is the null reference
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj@{:#x}", self.0)
    }
}

/// Execution state of one thread running compiled code
#[repr(C)]
pub struct ExecutionContext {
    /// Exception left behind by a native call, 0 if none
    pending_exception: u64,
    /// Exception being dispatched by the exception blob
    exception_oop: u64,
    /// Program point the exception was raised at
    exception_pc: usize,
    /// Handler selected by the last dispatch
    exception_handler_pc: usize,

    unroll: Option<UnrollBlock>,
    services: Arc<dyn VmServices>,
    dispatcher: Arc<ExceptionDispatcher>,
    frames: FrameStack,
}

/// Byte offsets of the fields generated code reads and writes
pub mod offsets {
    use super::ExecutionContext;

    /// `pending_exception` slot
    pub const PENDING_EXCEPTION: i32 = std::mem::offset_of!(ExecutionContext, pending_exception) as i32;
    /// `exception_oop` slot
    pub const EXCEPTION_OOP: i32 = std::mem::offset_of!(ExecutionContext, exception_oop) as i32;
    /// `exception_pc` slot
    pub const EXCEPTION_PC: i32 = std::mem::offset_of!(ExecutionContext, exception_pc) as i32;
    /// `exception_handler_pc` slot
    pub const EXCEPTION_HANDLER_PC: i32 =
        std::mem::offset_of!(ExecutionContext, exception_handler_pc) as i32;
}

impl ExecutionContext {
    /// Create a context with an empty frame stack
    pub fn new(services: Arc<dyn VmServices>, dispatcher: Arc<ExceptionDispatcher>) -> Self {
        ExecutionContext {
            pending_exception: 0,
            exception_oop: 0,
            exception_pc: 0,
            exception_handler_pc: 0,
            unroll: None,
            services,
            dispatcher,
            frames: FrameStack::new(),
        }
    }

    /// Compiled frames active on this thread
    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    /// Compiled frames active on this thread, mutably
    pub fn frames_mut(&mut self) -> &mut FrameStack {
        &mut self.frames
    }

    /// VM collaborator
    pub fn services(&self) -> &Arc<dyn VmServices> {
        &self.services
    }

    /// Handler search for this thread
    pub fn dispatcher(&self) -> &Arc<ExceptionDispatcher> {
        &self.dispatcher
    }

    /// Pending exception, if any
    pub fn pending_exception(&self) -> Option<ObjRef> {
        match self.pending_exception {
            0 => None,
            raw => Some(ObjRef(raw)),
        }
    }

    /// Leave `exception` pending and record the current program point
    pub fn set_pending_exception(&mut self, exception: ObjRef) {
        self.pending_exception = exception.0;
        self.exception_pc = self.frames.top().map(|f| f.pc).unwrap_or(0);
    }

    /// Take and clear the pending exception
    pub fn take_pending_exception(&mut self) -> Option<ObjRef> {
        let exception = self.pending_exception();
        self.pending_exception = 0;
        exception
    }

    /// Clear the pending exception
    pub fn clear_pending_exception(&mut self) {
        self.pending_exception = 0;
    }

    /// Exception handed to the exception blob
    pub fn exception_oop(&self) -> ObjRef {
        ObjRef(self.exception_oop)
    }

    /// Hand an exception to the exception blob
    pub fn set_exception_oop(&mut self, exception: ObjRef) {
        self.exception_oop = exception.0;
    }

    /// Program point the current exception was raised at
    pub fn exception_pc(&self) -> usize {
        self.exception_pc
    }

    /// Handler selected by the last dispatch; a bridge zeroes it (and the
    /// exception slot) when it enters the handler
    pub fn exception_handler_pc(&self) -> usize {
        self.exception_handler_pc
    }

    /// Record a completed dispatch: the handler will find `exception` in the
    /// exception slot
    pub(crate) fn set_handler(&mut self, exception: ObjRef, handler_pc: usize) {
        self.exception_oop = exception.0;
        self.exception_handler_pc = handler_pc;
    }

    /// Store unroll information for the second half of an uncommon trap
    pub fn set_unroll(&mut self, unroll: UnrollBlock) {
        self.unroll = Some(unroll);
    }

    /// Take the stored unroll information
    pub fn take_unroll(&mut self) -> Option<UnrollBlock> {
        self.unroll.take()
    }

    /// Raw pointer passed to generated code
    pub fn as_ptr(&mut self) -> *mut ExecutionContext {
        self as *mut ExecutionContext
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("pending_exception", &self.pending_exception())
            .field("exception_oop", &self.exception_oop())
            .field("exception_pc", &self.exception_pc)
            .field("exception_handler_pc", &self.exception_handler_pc)
            .field("frames", &self.frames.depth())
            .finish()
    }
}
