//! Exception handler search
//!
//! State machine run on the throwing thread:
//!
//! ```text
//! Thrown ──▶ Searching ──▶ HandlerFound
//!               ▲   │
//!               │   ▼
//!               Unwound          Rethrow ──▶ (pop handler frame) ──▶ Searching
//! ```
//!
//! `Searching` looks up the youngest frame's compiled method and asks its
//! handler table about the frame's pc. Without a match the frame is popped
//! (`Unwound`), deoptimizing it first when it is marked eligible, and the
//! search moves to the caller. Running out of frames is an unhandled
//! exception.

use std::sync::Arc;

use super::code_table::CodeTable;
use super::frames::{FrameId, FrameStack};
use super::ImplicitFault;
use crate::error::StubError;
use crate::runtime::{ObjRef, VmServices};

/// Dispatcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Exception raised, search not started
    Thrown,
    /// Looking for a handler in the youngest frame
    Searching,
    /// A handler covers the youngest frame's pc (terminal)
    HandlerFound,
    /// Re-propagating from a handler frame to its caller
    Rethrow,
    /// The youngest frame was popped
    Unwound,
}

/// Result of a successful search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Absolute address of the handler to continue at
    pub handler_pc: usize,
    /// Frame the handler belongs to (now the youngest frame)
    pub frame: FrameId,
    /// Frames popped during the search, youngest first
    pub unwound: Vec<FrameId>,
    /// Frames deoptimized during the search
    pub deoptimized: Vec<FrameId>,
    /// States visited, in order
    pub transitions: Vec<DispatchState>,
}

/// Native handler search over compiled frames
#[derive(Debug)]
pub struct ExceptionDispatcher {
    code: Arc<CodeTable>,
}

impl ExceptionDispatcher {
    /// Create a dispatcher over the given installed code
    pub fn new(code: Arc<CodeTable>) -> Self {
        ExceptionDispatcher { code }
    }

    /// Installed compiled methods
    pub fn code(&self) -> &Arc<CodeTable> {
        &self.code
    }

    /// Search for a handler for `exception`, starting at the youngest frame
    pub fn dispatch(
        &self,
        stack: &mut FrameStack,
        exception: ObjRef,
        services: &dyn VmServices,
    ) -> Result<DispatchOutcome, StubError> {
        self.run(DispatchState::Thrown, stack, exception, services)
    }

    /// Re-propagate an already matched exception: the youngest (handler)
    /// frame is popped without a local search and the search resumes at its
    /// caller
    pub fn rethrow(
        &self,
        stack: &mut FrameStack,
        exception: ObjRef,
        services: &dyn VmServices,
    ) -> Result<DispatchOutcome, StubError> {
        self.run(DispatchState::Rethrow, stack, exception, services)
    }

    /// Convert an implicit fault into an exception object and dispatch it
    pub fn dispatch_implicit(
        &self,
        stack: &mut FrameStack,
        fault: ImplicitFault,
        services: &dyn VmServices,
    ) -> Result<(ObjRef, DispatchOutcome), StubError> {
        let exception = services.create_implicit_exception(fault);
        let outcome = self.dispatch(stack, exception, services)?;
        Ok((exception, outcome))
    }

    /// Deoptimize a live frame so its caller resumes it in the interpreter.
    /// Returns false without side effects if the frame is unknown or already
    /// deoptimized.
    pub fn deoptimize_frame(
        &self,
        stack: &mut FrameStack,
        frame: FrameId,
        services: &dyn VmServices,
    ) -> bool {
        if stack.is_deoptimized(frame) {
            return false;
        }
        if !stack.contains(frame) {
            log::warn!("deoptimization requested for {} which is not on the stack", frame);
            return false;
        }
        services.block_for_deoptimization(frame);
        stack.mark_deoptimized(frame);
        log::debug!("deoptimized {}", frame);
        true
    }

    /// Deoptimize the youngest compiled frame (the caller of the running stub)
    pub fn deoptimize_caller_frame(&self, stack: &mut FrameStack, services: &dyn VmServices) -> bool {
        match stack.top().map(|f| f.id) {
            Some(id) => self.deoptimize_frame(stack, id, services),
            None => false,
        }
    }

    /// Whether `frame` has been deoptimized
    pub fn is_deoptimized(&self, stack: &FrameStack, frame: FrameId) -> bool {
        stack.is_deoptimized(frame)
    }

    fn run(
        &self,
        start: DispatchState,
        stack: &mut FrameStack,
        exception: ObjRef,
        services: &dyn VmServices,
    ) -> Result<DispatchOutcome, StubError> {
        let mut state = start;
        let mut transitions = vec![state];
        let mut unwound = Vec::new();
        let mut deoptimized = Vec::new();

        loop {
            let next = match state {
                DispatchState::Thrown => DispatchState::Searching,
                DispatchState::Rethrow => {
                    if let Some(frame) = stack.pop() {
                        unwound.push(frame.id);
                    }
                    DispatchState::Searching
                }
                DispatchState::Searching => {
                    let frame = match stack.top() {
                        Some(frame) => frame,
                        None => {
                            log::trace!("exception {} reached the bottom of the stack", exception);
                            return Err(StubError::UnhandledException { exception });
                        }
                    };
                    let handler = self
                        .code
                        .lookup(frame.pc)
                        .and_then(|method| method.handler_for(frame.pc));
                    match handler {
                        Some(handler_pc) => {
                            let frame_id = frame.id;
                            if let Some(top) = stack.top_mut() {
                                top.pc = handler_pc;
                            }
                            transitions.push(DispatchState::HandlerFound);
                            log::trace!(
                                "exception {} handled in {} at {:#x}",
                                exception,
                                frame_id,
                                handler_pc
                            );
                            return Ok(DispatchOutcome {
                                handler_pc,
                                frame: frame_id,
                                unwound,
                                deoptimized,
                                transitions,
                            });
                        }
                        None => DispatchState::Unwound,
                    }
                }
                DispatchState::Unwound => {
                    if let Some(frame) = stack.top().cloned() {
                        if frame.deopt_eligible && self.deoptimize_frame(stack, frame.id, services) {
                            deoptimized.push(frame.id);
                        }
                        stack.pop();
                        unwound.push(frame.id);
                    }
                    DispatchState::Searching
                }
                DispatchState::HandlerFound => unreachable!("HandlerFound is terminal"),
            };
            log::trace!("{:?} -> {:?}", state, next);
            transitions.push(next);
            state = next;
        }
    }
}
