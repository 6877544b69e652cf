//! Default native implementations of the runtime stubs
//!
//! Each function takes the stub's domain in order, followed by the execution
//! context when the stub needs one, exactly as the generated bridge passes
//! them. VM work is forwarded to the context's `VmServices`; a failed
//! operation leaves its exception pending for the bridge to forward.
//! Intrinsic fallbacks (math, CRC-32, digests, substring search) are computed
//! here directly and never touch the context.

#![allow(improper_ctypes_definitions)]

use sha2::digest::generic_array::GenericArray;

use super::context::{ExecutionContext, ObjRef};
use super::services::VmResult;
use crate::error::TrapError;
use crate::exception::deopt;
use crate::exception::ImplicitFault;

fn context<'a>(ctx: *mut ExecutionContext) -> &'a mut ExecutionContext {
    debug_assert!(!ctx.is_null(), "runtime stub called without an execution context");
    unsafe { &mut *ctx }
}

/// Unwrap a VM result, leaving the exception pending on failure
fn complete<T: Default>(ctx: &mut ExecutionContext, result: VmResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(exception) => {
            ctx.set_pending_exception(exception);
            T::default()
        }
    }
}

fn unhandled(exception: ObjRef) -> ! {
    log::error!("unhandled exception {} escaped the outermost compiled frame", exception);
    std::process::abort()
}

// ============================================================================
// Allocation
// ============================================================================

/// `new_instance(klass, is_larval)`
pub extern "C" fn new_instance(klass: u64, larval: i32, ctx: *mut ExecutionContext) -> u64 {
    let ctx = context(ctx);
    let result = ctx.services().allocate_instance(ObjRef(klass), larval != 0);
    complete(ctx, result).0
}

/// `new_array(klass, length)`
pub extern "C" fn new_array(klass: u64, length: i32, ctx: *mut ExecutionContext) -> u64 {
    let ctx = context(ctx);
    let result = ctx.services().allocate_array(ObjRef(klass), length, true);
    complete(ctx, result).0
}

/// `new_array_nozero(klass, length)`
pub extern "C" fn new_array_nozero(klass: u64, length: i32, ctx: *mut ExecutionContext) -> u64 {
    let ctx = context(ctx);
    let result = ctx.services().allocate_array(ObjRef(klass), length, false);
    complete(ctx, result).0
}

fn multi_new_array(klass: u64, dims: &[i32], ctx: *mut ExecutionContext) -> u64 {
    let ctx = context(ctx);
    let result = ctx.services().allocate_multi_array(ObjRef(klass), dims);
    complete(ctx, result).0
}

/// `multianewarray2(klass, d1, d2)`
pub extern "C" fn multi_new_array2(klass: u64, d1: i32, d2: i32, ctx: *mut ExecutionContext) -> u64 {
    multi_new_array(klass, &[d1, d2], ctx)
}

/// `multianewarray3(klass, d1, d2, d3)`
pub extern "C" fn multi_new_array3(
    klass: u64,
    d1: i32,
    d2: i32,
    d3: i32,
    ctx: *mut ExecutionContext,
) -> u64 {
    multi_new_array(klass, &[d1, d2, d3], ctx)
}

/// `multianewarray4(klass, d1, d2, d3, d4)`
pub extern "C" fn multi_new_array4(
    klass: u64,
    d1: i32,
    d2: i32,
    d3: i32,
    d4: i32,
    ctx: *mut ExecutionContext,
) -> u64 {
    multi_new_array(klass, &[d1, d2, d3, d4], ctx)
}

/// `multianewarray5(klass, d1, d2, d3, d4, d5)`
pub extern "C" fn multi_new_array5(
    klass: u64,
    d1: i32,
    d2: i32,
    d3: i32,
    d4: i32,
    d5: i32,
    ctx: *mut ExecutionContext,
) -> u64 {
    multi_new_array(klass, &[d1, d2, d3, d4, d5], ctx)
}

/// `multianewarrayN(klass, dims)` with the dimensions in an `int[]`
pub extern "C" fn multi_new_array_n(klass: u64, dims: u64, ctx: *mut ExecutionContext) -> u64 {
    let ctx = context(ctx);
    let services = ctx.services().clone();
    let result = services
        .int_array_elements(ObjRef(dims))
        .and_then(|dims| services.allocate_multi_array(ObjRef(klass), &dims));
    complete(ctx, result).0
}

// ============================================================================
// Monitors
// ============================================================================

/// `complete_monitor_locking(obj, lock)`
pub extern "C" fn complete_monitor_locking(obj: u64, lock: *mut u8, ctx: *mut ExecutionContext) {
    context(ctx).services().monitor_enter(ObjRef(obj), lock);
}

/// `complete_monitor_unlocking(obj, lock)`
pub extern "C" fn complete_monitor_unlocking(obj: u64, lock: *mut u8, ctx: *mut ExecutionContext) {
    context(ctx).services().monitor_exit(ObjRef(obj), lock);
}

/// `monitor_notify(obj)`
pub extern "C" fn monitor_notify(obj: u64, ctx: *mut ExecutionContext) {
    let ctx = context(ctx);
    let result = ctx.services().monitor_notify(ObjRef(obj), false);
    complete(ctx, result)
}

/// `monitor_notifyAll(obj)`
pub extern "C" fn monitor_notify_all(obj: u64, ctx: *mut ExecutionContext) {
    let ctx = context(ctx);
    let result = ctx.services().monitor_notify(ObjRef(obj), true);
    complete(ctx, result)
}

// ============================================================================
// Exceptions
// ============================================================================

/// `rethrow(exception)`: search from the caller of the handler frame and
/// return the handler entry the bridge transfers to
pub extern "C" fn rethrow(exception: u64, ctx: *mut ExecutionContext) -> usize {
    let ctx = context(ctx);
    let exception = ObjRef(exception);
    let dispatcher = ctx.dispatcher().clone();
    let services = ctx.services().clone();
    match dispatcher.rethrow(ctx.frames_mut(), exception, services.as_ref()) {
        Ok(outcome) => {
            ctx.set_handler(exception, outcome.handler_pc);
            outcome.handler_pc
        }
        Err(_) => unhandled(exception),
    }
}

/// Exception blob: dispatch the exception in the context's exception slot
/// and return the handler to resume at
pub extern "C" fn handle_exception(ctx: *mut ExecutionContext) -> usize {
    let ctx = context(ctx);
    let exception = ctx.exception_oop();
    let dispatcher = ctx.dispatcher().clone();
    let services = ctx.services().clone();
    match dispatcher.dispatch(ctx.frames_mut(), exception, services.as_ref()) {
        Ok(outcome) => {
            ctx.set_handler(exception, outcome.handler_pc);
            outcome.handler_pc
        }
        Err(_) => unhandled(exception),
    }
}

/// Exception continuation of every throwing bridge: dispatch the pending
/// exception, record it with the selected handler in the context and return
/// the handler for the bridge to enter
pub extern "C" fn forward_exception(ctx: *mut ExecutionContext) -> usize {
    let ctx = context(ctx);
    let Some(exception) = ctx.take_pending_exception() else {
        log::error!("exception continuation entered with nothing pending");
        std::process::abort()
    };
    let dispatcher = ctx.dispatcher().clone();
    let services = ctx.services().clone();
    match dispatcher.dispatch(ctx.frames_mut(), exception, services.as_ref()) {
        Ok(outcome) => {
            ctx.set_handler(exception, outcome.handler_pc);
            outcome.handler_pc
        }
        Err(_) => unhandled(exception),
    }
}

fn throw_implicit(fault: ImplicitFault, ctx: *mut ExecutionContext) {
    let ctx = context(ctx);
    let exception = ctx.services().create_implicit_exception(fault);
    log::debug!("implicit {} raised {}", fault, exception);
    ctx.set_pending_exception(exception);
}

/// `throw_null_exception()`
pub extern "C" fn throw_null_exception(ctx: *mut ExecutionContext) {
    throw_implicit(ImplicitFault::NullDereference, ctx)
}

/// `throw_div0_exception()`
pub extern "C" fn throw_div0_exception(ctx: *mut ExecutionContext) {
    throw_implicit(ImplicitFault::DivisionByZero, ctx)
}

/// `throw_stack_overflow_error()`
pub extern "C" fn throw_stack_overflow(ctx: *mut ExecutionContext) {
    throw_implicit(ImplicitFault::StackOverflow, ctx)
}

// ============================================================================
// Deoptimization
// ============================================================================

fn corrupt_trap(error: TrapError) -> ! {
    log::error!("{}", error);
    std::process::abort()
}

/// First call of the uncommon-trap blob
pub extern "C" fn fetch_unroll_info(trap_request: i32, ctx: *mut ExecutionContext) -> i64 {
    deopt::fetch_unroll_info(context(ctx), trap_request).unwrap_or_else(|e| corrupt_trap(e))
}

/// Second call of the uncommon-trap blob
pub extern "C" fn unpack_frames(frame_count: i64, ctx: *mut ExecutionContext) -> usize {
    deopt::unpack_frames(context(ctx), frame_count).unwrap_or_else(|e| corrupt_trap(e))
}

// ============================================================================
// Object helpers
// ============================================================================

/// `slow_arraycopy(src, src_pos, dest, dest_pos, length)`
pub extern "C" fn slow_arraycopy(
    src: u64,
    src_pos: i32,
    dest: u64,
    dest_pos: i32,
    length: i32,
    ctx: *mut ExecutionContext,
) {
    let ctx = context(ctx);
    let result = ctx
        .services()
        .arraycopy(ObjRef(src), src_pos, ObjRef(dest), dest_pos, length);
    complete(ctx, result)
}

/// `register_finalizer(obj)`
pub extern "C" fn register_finalizer(obj: u64, ctx: *mut ExecutionContext) {
    let ctx = context(ctx);
    let result = ctx.services().register_finalizer(ObjRef(obj));
    complete(ctx, result)
}

/// `load_unknown_inline(array, index)`
#[cfg(feature = "inline-values")]
pub extern "C" fn load_unknown_inline(array: u64, index: i32, ctx: *mut ExecutionContext) -> u64 {
    let ctx = context(ctx);
    let result = ctx.services().load_inline_element(ObjRef(array), index);
    complete(ctx, result).0
}

/// `store_unknown_inline(buffer, array, index)`
#[cfg(feature = "inline-values")]
pub extern "C" fn store_unknown_inline(
    buffer: u64,
    array: u64,
    index: i32,
    ctx: *mut ExecutionContext,
) {
    context(ctx)
        .services()
        .store_inline_element(ObjRef(buffer), ObjRef(array), index);
}

// ============================================================================
// Math
// ============================================================================

/// `dsin(x)`
pub extern "C" fn dsin(x: f64) -> f64 {
    x.sin()
}

/// `dcos(x)`
pub extern "C" fn dcos(x: f64) -> f64 {
    x.cos()
}

/// `dtan(x)`
pub extern "C" fn dtan(x: f64) -> f64 {
    x.tan()
}

/// `dlog(x)`
pub extern "C" fn dlog(x: f64) -> f64 {
    x.ln()
}

/// `dlog10(x)`
pub extern "C" fn dlog10(x: f64) -> f64 {
    x.log10()
}

/// `dexp(x)`
pub extern "C" fn dexp(x: f64) -> f64 {
    x.exp()
}

/// `dpow(x, y)`
pub extern "C" fn dpow(x: f64, y: f64) -> f64 {
    x.powf(y)
}

/// `drem(x, y)`: truncated remainder with the sign of `x`
pub extern "C" fn dmod(x: f64, y: f64) -> f64 {
    x % y
}

// ============================================================================
// Checksums, digests, strings
// ============================================================================

/// `updateBytesCRC32(crc, buf, len)`
pub extern "C" fn update_bytes_crc32(crc: i32, buf: *const u8, len: i32) -> i32 {
    if len <= 0 || buf.is_null() {
        return crc;
    }
    let bytes = unsafe { std::slice::from_raw_parts(buf, len as usize) };
    let mut hasher = crc32fast::Hasher::new_with_initial(crc as u32);
    hasher.update(bytes);
    hasher.finalize() as i32
}

/// `sha1_implCompress(block, state)`: one 64-byte block into a 5-word state
pub extern "C" fn sha1_compress(block: *const u8, state: *mut u32) {
    let block = unsafe { std::slice::from_raw_parts(block, 64) };
    let state = unsafe { &mut *(state as *mut [u32; 5]) };
    sha1::compress(state, &[GenericArray::clone_from_slice(block)]);
}

/// `sha256_implCompress(block, state)`: one 64-byte block into an 8-word state
pub extern "C" fn sha256_compress(block: *const u8, state: *mut u32) {
    let block = unsafe { std::slice::from_raw_parts(block, 64) };
    let state = unsafe { &mut *(state as *mut [u32; 8]) };
    sha2::compress256(state, &[GenericArray::clone_from_slice(block)]);
}

/// `sha512_implCompress(block, state)`: one 128-byte block into an 8-doubleword state
pub extern "C" fn sha512_compress(block: *const u8, state: *mut u64) {
    let block = unsafe { std::slice::from_raw_parts(block, 128) };
    let state = unsafe { &mut *(state as *mut [u64; 8]) };
    sha2::compress512(state, &[GenericArray::clone_from_slice(block)]);
}

/// `string_indexof(haystack, haystack_len, needle, needle_len)` over UTF-16
/// code units; -1 when absent
pub extern "C" fn string_index_of(
    haystack: *const u16,
    haystack_len: i32,
    needle: *const u16,
    needle_len: i32,
) -> i32 {
    if needle_len <= 0 {
        return 0;
    }
    if haystack_len < needle_len {
        return -1;
    }
    let haystack = unsafe { std::slice::from_raw_parts(haystack, haystack_len as usize) };
    let needle = unsafe { std::slice::from_raw_parts(needle, needle_len as usize) };
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i as i32)
        .unwrap_or(-1)
}

// ============================================================================
// Task tracing
// ============================================================================

#[cfg(feature = "trace-stubs")]
mod tracing {
    use super::*;
    use crate::runtime::services::TaskEvent;

    fn notify(task: u64, hide: i32, event: TaskEvent, ctx: *mut ExecutionContext) {
        context(ctx).services().notify_task(ObjRef(task), event, hide != 0);
    }

    /// `notify_task_start(task, hide)`
    pub extern "C" fn notify_task_start(task: u64, hide: i32, ctx: *mut ExecutionContext) {
        notify(task, hide, TaskEvent::Start, ctx)
    }

    /// `notify_task_end(task, hide)`
    pub extern "C" fn notify_task_end(task: u64, hide: i32, ctx: *mut ExecutionContext) {
        notify(task, hide, TaskEvent::End, ctx)
    }

    /// `notify_task_mount(task, hide)`
    pub extern "C" fn notify_task_mount(task: u64, hide: i32, ctx: *mut ExecutionContext) {
        notify(task, hide, TaskEvent::Mount, ctx)
    }

    /// `notify_task_unmount(task, hide)`
    pub extern "C" fn notify_task_unmount(task: u64, hide: i32, ctx: *mut ExecutionContext) {
        notify(task, hide, TaskEvent::Unmount, ctx)
    }
}

#[cfg(feature = "trace-stubs")]
pub use tracing::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::code_table::{CodeTable, CompiledMethod, HandlerTable};
    use crate::exception::dispatcher::ExceptionDispatcher;
    use crate::runtime::testing::RecordingServices;
    use std::sync::Arc;

    fn context_with(code: CodeTable) -> (Arc<RecordingServices>, ExecutionContext) {
        let services = Arc::new(RecordingServices::new());
        let ctx = ExecutionContext::new(
            services.clone(),
            Arc::new(ExceptionDispatcher::new(Arc::new(code))),
        );
        (services, ctx)
    }

    #[test]
    fn test_new_array_forwards_arguments() {
        let (services, mut ctx) = context_with(CodeTable::new());
        let array = new_array(0xA0, 7, ctx.as_ptr());
        assert_eq!(services.calls(), vec!["allocate_array(obj@0xa0, 7, zeroed)".to_string()]);
        assert_eq!(array, RecordingServices::ALLOCATED.0);
        assert_eq!(ctx.pending_exception(), None);
    }

    #[test]
    fn test_failed_allocation_leaves_exception_pending() {
        let (_services, mut ctx) = context_with(CodeTable::new());
        let array = new_array(0xA0, -1, ctx.as_ptr());
        assert_eq!(array, 0);
        assert_eq!(ctx.pending_exception(), Some(RecordingServices::NEGATIVE_SIZE));
    }

    #[test]
    fn test_multi_new_array_dimensions_in_order() {
        let (services, mut ctx) = context_with(CodeTable::new());
        multi_new_array3(0xB0, 2, 3, 4, ctx.as_ptr());
        assert_eq!(
            services.calls(),
            vec!["allocate_multi_array(obj@0xb0, [2, 3, 4])".to_string()]
        );
    }

    #[test]
    fn test_implicit_throw_sets_pending() {
        let (_services, mut ctx) = context_with(CodeTable::new());
        throw_div0_exception(ctx.as_ptr());
        assert_eq!(
            ctx.pending_exception(),
            Some(RecordingServices::implicit_exception(ImplicitFault::DivisionByZero))
        );
    }

    #[test]
    fn test_forward_exception_selects_handler() {
        let code = CodeTable::new();
        let mut handlers = HandlerTable::new();
        handlers.add(0, 0x100, 0x80);
        code.register(CompiledMethod::new("m", 0x1000..0x1100, handlers));
        let (_services, mut ctx) = context_with(code);
        ctx.frames_mut().push(0x1010, 0, false);
        ctx.set_pending_exception(ObjRef(0xE));

        assert_eq!(forward_exception(ctx.as_ptr()), 0x1080);
        assert_eq!(ctx.pending_exception(), None);
        assert_eq!(ctx.exception_oop(), ObjRef(0xE));
        assert_eq!(ctx.exception_handler_pc(), 0x1080);
    }

    #[test]
    fn test_math_fallbacks() {
        assert_eq!(dsin(0.0), 0.0);
        assert_eq!(dcos(0.0), 1.0);
        assert_eq!(dexp(0.0), 1.0);
        assert!((dlog10(1000.0) - 3.0).abs() < 1e-12);
        assert_eq!(dpow(2.0, 10.0), 1024.0);
        assert_eq!(dmod(-7.5, 2.0), -1.5);
        assert!(dlog(-1.0).is_nan());
    }

    #[test]
    fn test_crc32_matches_reference() {
        let data = b"123456789";
        assert_eq!(update_bytes_crc32(0, data.as_ptr(), 9) as u32, 0xCBF4_3926);
        // chaining over split input gives the same result
        let first = update_bytes_crc32(0, data.as_ptr(), 4);
        let chained = update_bytes_crc32(first, data[4..].as_ptr(), 5);
        assert_eq!(chained as u32, 0xCBF4_3926);
        assert_eq!(update_bytes_crc32(77, data.as_ptr(), 0), 77);
    }

    #[test]
    fn test_sha256_single_block() {
        // "abc" padded to one block
        let mut block = [0u8; 64];
        block[..3].copy_from_slice(b"abc");
        block[3] = 0x80;
        block[63] = 24;
        let mut state: [u32; 8] = [
            0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab,
            0x5be0cd19,
        ];
        sha256_compress(block.as_ptr(), state.as_mut_ptr());
        assert_eq!(state[0], 0xba7816bf);
        assert_eq!(state[7], 0xf20015ad);
    }

    #[test]
    fn test_sha1_single_block() {
        let mut block = [0u8; 64];
        block[..3].copy_from_slice(b"abc");
        block[3] = 0x80;
        block[63] = 24;
        let mut state: [u32; 5] = [0x67452301, 0xEFCDAB89, 0x98BADCFE, 0x10325476, 0xC3D2E1F0];
        sha1_compress(block.as_ptr(), state.as_mut_ptr());
        assert_eq!(state, [0xa9993e36, 0x4706816a, 0xba3e2571, 0x7850c26c, 0x9cd0d89d]);
    }

    #[test]
    fn test_string_index_of() {
        let hay: Vec<u16> = "hello world".encode_utf16().collect();
        let needle: Vec<u16> = "world".encode_utf16().collect();
        let missing: Vec<u16> = "xyz".encode_utf16().collect();
        let idx = |n: &[u16]| string_index_of(hay.as_ptr(), hay.len() as i32, n.as_ptr(), n.len() as i32);
        assert_eq!(idx(&needle), 6);
        assert_eq!(idx(&missing), -1);
        assert_eq!(idx(&[]), 0);
    }
}
