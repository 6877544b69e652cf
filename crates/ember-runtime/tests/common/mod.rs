//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use ember_runtime::exception::{CodeTable, CompiledMethod, Frame, FrameId, HandlerTable};
use ember_runtime::runtime::VmResult;
use ember_runtime::{ExceptionDispatcher, ExecutionContext, ImplicitFault, ObjRef, VmServices};
use parking_lot::Mutex;

pub const ALLOCATED: ObjRef = ObjRef(0x5000);
pub const OUT_OF_MEMORY: ObjRef = ObjRef(0xE0E0);
pub const RESUME_BASE: usize = 0x7000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `VmServices` that records every call
#[derive(Default)]
pub struct TestServices {
    calls: Mutex<Vec<String>>,
    blocked: Mutex<Vec<FrameId>>,
}

impl TestServices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn blocked(&self) -> Vec<FrameId> {
        self.blocked.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

pub fn implicit_exception(fault: ImplicitFault) -> ObjRef {
    match fault {
        ImplicitFault::NullDereference => ObjRef(0xF1),
        ImplicitFault::DivisionByZero => ObjRef(0xF2),
        ImplicitFault::StackOverflow => ObjRef(0xF3),
    }
}

impl VmServices for TestServices {
    fn allocate_instance(&self, klass: ObjRef, larval: bool) -> VmResult<ObjRef> {
        self.record(format!("allocate_instance({}, {})", klass, larval));
        Ok(ALLOCATED)
    }

    fn allocate_array(&self, klass: ObjRef, length: i32, zeroed: bool) -> VmResult<ObjRef> {
        self.record(format!("allocate_array({}, {}, {})", klass, length, zeroed));
        if length < 0 {
            Err(OUT_OF_MEMORY)
        } else {
            Ok(ALLOCATED)
        }
    }

    fn allocate_multi_array(&self, klass: ObjRef, dims: &[i32]) -> VmResult<ObjRef> {
        self.record(format!("allocate_multi_array({}, {:?})", klass, dims));
        Ok(ALLOCATED)
    }

    fn int_array_elements(&self, _array: ObjRef) -> VmResult<Vec<i32>> {
        Ok(vec![2, 2])
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

    fn arraycopy(&self, src: ObjRef, src_pos: i32, dest: ObjRef, dest_pos: i32, length: i32) -> VmResult<()> {
        self.record(format!("arraycopy({}, {}, {}, {}, {})", src, src_pos, dest, dest_pos, length));
        Ok(())
    }

    fn register_finalizer(&self, obj: ObjRef) -> VmResult<()> {
        self.record(format!("register_finalizer({})", obj));
        Ok(())
    }

    #[cfg(feature = "inline-values")]
    fn load_inline_element(&self, array: ObjRef, index: i32) -> VmResult<ObjRef> {
        self.record(format!("load_inline_element({}, {})", array, index));
        Ok(ALLOCATED)
    }

    #[cfg(feature = "inline-values")]
    fn store_inline_element(&self, buffer: ObjRef, array: ObjRef, index: i32) {
        self.record(format!("store_inline_element({}, {}, {})", buffer, array, index));
    }

    fn create_implicit_exception(&self, fault: ImplicitFault) -> ObjRef {
        implicit_exception(fault)
    }

    fn interpreter_resume_address(&self, frame: &Frame) -> usize {
        RESUME_BASE + frame.bci as usize
    }

    fn block_for_deoptimization(&self, frame: FrameId) {
        self.blocked.lock().push(frame);
    }
}

/// Method covering `start..start + len` whose whole body is protected by a
/// handler at `start + handler`
pub fn catch_all(name: &str, start: usize, len: usize, handler: u32) -> CompiledMethod {
    let mut handlers = HandlerTable::new();
    handlers.add(0, len as u32, handler);
    CompiledMethod::new(name, start..start + len, handlers)
}

/// Method covering `start..start + len` without handlers
pub fn no_handlers(name: &str, start: usize, len: usize) -> CompiledMethod {
    CompiledMethod::new(name, start..start + len, HandlerTable::new())
}

pub fn dispatcher(methods: Vec<CompiledMethod>) -> Arc<ExceptionDispatcher> {
    let code = Arc::new(CodeTable::new());
    for method in methods {
        assert!(code.register(method), "overlapping test methods");
    }
    Arc::new(ExceptionDispatcher::new(code))
}

pub fn context(services: Arc<TestServices>, methods: Vec<CompiledMethod>) -> Box<ExecutionContext> {
    Box::new(ExecutionContext::new(services, dispatcher(methods)))
}
