//! VM collaborator interface
//!
//! Runtime stubs marshal arguments and handle control transfer; the actual
//! allocation, locking, copying and class bookkeeping belong to the VM. The
//! default native implementations forward to a `VmServices` object held by
//! the execution context. An `Err` carries the exception object to leave
//! pending.

use super::context::ObjRef;
use crate::exception::frames::{Frame, FrameId};
use crate::exception::ImplicitFault;

/// Result of a VM operation; `Err` is the exception to throw
pub type VmResult<T> = Result<T, ObjRef>;

/// Operations the runtime stubs delegate to the VM
pub trait VmServices: Send + Sync {
    /// Allocate an instance of `klass`; `larval` instances are value objects
    /// still under construction
    fn allocate_instance(&self, klass: ObjRef, larval: bool) -> VmResult<ObjRef>;

    /// Allocate a one-dimensional array
    fn allocate_array(&self, klass: ObjRef, length: i32, zeroed: bool) -> VmResult<ObjRef>;

    /// Allocate a multi-dimensional array, outermost dimension first
    fn allocate_multi_array(&self, klass: ObjRef, dims: &[i32]) -> VmResult<ObjRef>;

    /// Elements of an `int[]` (the dimension array of `multianewarrayN`)
    fn int_array_elements(&self, array: ObjRef) -> VmResult<Vec<i32>>;

    /// Slow-path monitor enter; `lock` is the compiled frame's lock record
    fn monitor_enter(&self, obj: ObjRef, lock: *mut u8);

    /// Slow-path monitor exit
    fn monitor_exit(&self, obj: ObjRef, lock: *mut u8);

    /// Wake one (`all == false`) or all waiters
    fn monitor_notify(&self, obj: ObjRef, all: bool) -> VmResult<()>;

    /// Fully checked array copy
    fn arraycopy(
        &self,
        src: ObjRef,
        src_pos: i32,
        dest: ObjRef,
        dest_pos: i32,
        length: i32,
    ) -> VmResult<()>;

    /// Register `obj` for finalization
    fn register_finalizer(&self, obj: ObjRef) -> VmResult<()>;

    /// Load an element of a flat array whose layout compiled code did not know
    #[cfg(feature = "inline-values")]
    fn load_inline_element(&self, array: ObjRef, index: i32) -> VmResult<ObjRef>;

    /// Store a buffered value into a flat array of unknown layout
    #[cfg(feature = "inline-values")]
    fn store_inline_element(&self, buffer: ObjRef, array: ObjRef, index: i32);

    /// Exception object for an implicit fault
    fn create_implicit_exception(&self, fault: ImplicitFault) -> ObjRef;

    /// Interpreter address that resumes `frame` at its bytecode index
    fn interpreter_resume_address(&self, frame: &Frame) -> usize;

    /// Rendezvous with the global pause mechanism before deoptimizing `frame`
    fn block_for_deoptimization(&self, frame: FrameId) {
        let _ = frame;
    }

    /// Task lifecycle event for tracing agents
    #[cfg(feature = "trace-stubs")]
    fn notify_task(&self, task: ObjRef, event: TaskEvent, hide: bool) {
        let _ = (task, event, hide);
    }
}

/// Task lifecycle event
#[cfg(feature = "trace-stubs")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// Task started
    Start,
    /// Task finished
    End,
    /// Task mounted on a carrier thread
    Mount,
    /// Task unmounted from its carrier thread
    Unmount,
}
