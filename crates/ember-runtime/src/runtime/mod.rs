//! Runtime side of the stub boundary
//!
//! - `context`: the per-thread `ExecutionContext` generated code passes to stubs
//! - `services`: the VM collaborator the default natives delegate to
//! - `natives`: default `extern "C"` implementations for every catalog stub

pub mod context;
pub mod natives;
pub mod services;

pub use context::{offsets, ExecutionContext, ObjRef};
pub use services::{VmResult, VmServices};

#[cfg(feature = "trace-stubs")]
pub use services::TaskEvent;

#[cfg(test)]
pub(crate) mod testing {
    //! Recording `VmServices` for unit tests

    use parking_lot::Mutex;

    use super::{ObjRef, VmResult, VmServices};
    use crate::exception::frames::{Frame, FrameId};
    use crate::exception::ImplicitFault;

    #[derive(Default)]
    pub(crate) struct RecordingServices {
        calls: Mutex<Vec<String>>,
        deopt_blocks: Mutex<Vec<FrameId>>,
    }

    impl RecordingServices {
        pub(crate) const ALLOCATED: ObjRef = ObjRef(0x5000);
        pub(crate) const NEGATIVE_SIZE: ObjRef = ObjRef(0xE1);

        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn implicit_exception(fault: ImplicitFault) -> ObjRef {
            match fault {
                ImplicitFault::NullDereference => ObjRef(0xF1),
                ImplicitFault::DivisionByZero => ObjRef(0xF2),
                ImplicitFault::StackOverflow => ObjRef(0xF3),
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub(crate) fn deopt_blocks(&self) -> Vec<FrameId> {
            self.deopt_blocks.lock().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }
    }

    impl VmServices for RecordingServices {
        fn allocate_instance(&self, klass: ObjRef, larval: bool) -> VmResult<ObjRef> {
            self.record(format!("allocate_instance({}, {})", klass, larval));
            Ok(Self::ALLOCATED)
        }

        fn allocate_array(&self, klass: ObjRef, length: i32, zeroed: bool) -> VmResult<ObjRef> {
            if length < 0 {
                return Err(Self::NEGATIVE_SIZE);
            }
            let zeroing = if zeroed { "zeroed" } else { "raw" };
            self.record(format!("allocate_array({}, {}, {})", klass, length, zeroing));
            Ok(Self::ALLOCATED)
        }

        fn allocate_multi_array(&self, klass: ObjRef, dims: &[i32]) -> VmResult<ObjRef> {
            self.record(format!("allocate_multi_array({}, {:?})", klass, dims));
            Ok(Self::ALLOCATED)
        }

        fn int_array_elements(&self, array: ObjRef) -> VmResult<Vec<i32>> {
            Ok(vec![array.0 as i32, 2])
        }

        fn monitor_enter(&self, obj: ObjRef, _lock: *mut u8) {
            self.record(format!("monitor_enter({})", obj));
        }

        fn monitor_exit(&self, obj: ObjRef, _lock: *mut u8) {
            self.record(format!("monitor_exit({})", obj));
        }

        fn monitor_notify(&self, obj: ObjRef, all: bool) -> VmResult<()> {
            self.record(format!("monitor_notify({}, {})", obj, all));
            Ok(())
        }

        fn arraycopy(
            &self,
            src: ObjRef,
            src_pos: i32,
            dest: ObjRef,
            dest_pos: i32,
            length: i32,
        ) -> VmResult<()> {
            self.record(format!(
                "arraycopy({}, {}, {}, {}, {})",
                src, src_pos, dest, dest_pos, length
            ));
            Ok(())
        }

        fn register_finalizer(&self, obj: ObjRef) -> VmResult<()> {
            self.record(format!("register_finalizer({})", obj));
            Ok(())
        }

        #[cfg(feature = "inline-values")]
        fn load_inline_element(&self, array: ObjRef, index: i32) -> VmResult<ObjRef> {
            self.record(format!("load_inline_element({}, {})", array, index));
            Ok(Self::ALLOCATED)
        }

        #[cfg(feature = "inline-values")]
        fn store_inline_element(&self, buffer: ObjRef, array: ObjRef, index: i32) {
            self.record(format!("store_inline_element({}, {}, {})", buffer, array, index));
        }

        fn create_implicit_exception(&self, fault: ImplicitFault) -> ObjRef {
            Self::implicit_exception(fault)
        }

        fn interpreter_resume_address(&self, frame: &Frame) -> usize {
            0x9000 + frame.bci as usize
        }

        fn block_for_deoptimization(&self, frame: FrameId) {
            self.deopt_blocks.lock().push(frame);
        }
    }
}
