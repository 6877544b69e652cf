//! Dedicated generators for the multi-path blobs
//!
//! Both blobs are entered from arbitrary deoptimization or exception points,
//! so every call inside them is a return point the collector may stop at.

use cranelift_codegen::ir::{self, InstBuilder};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::FunctionBuilder;

use super::abi;

/// Uncommon-trap blob: `(ctx, trap_request) -> resume address`
///
/// ```text
/// frames = fetch_unroll_info(trap_request, ctx)   ; return point 1
/// addr   = unpack_frames(frames, ctx)             ; return point 2
/// return addr
/// ```
pub(crate) fn emit_uncommon_trap_blob(
    builder: &mut FunctionBuilder<'_>,
    fetch_unroll_info: usize,
    unpack_frames: usize,
    pointer: ir::Type,
    call_conv: CallConv,
) {
    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let params = builder.block_params(entry).to_vec();
    let (ctx, trap_request) = (params[0], params[1]);

    let fetch_sig = abi::routine_signature(&[ir::types::I32, pointer], &[ir::types::I64], call_conv);
    let frames = abi::emit_native_call(builder, fetch_sig, fetch_unroll_info, pointer, &[trap_request, ctx]);

    let unpack_sig = abi::routine_signature(&[ir::types::I64, pointer], &[pointer], call_conv);
    let resume = abi::emit_native_call(builder, unpack_sig, unpack_frames, pointer, &[frames[0], ctx]);

    builder.ins().return_(&resume);
}

/// Exception blob: `(ctx) -> handler address`, the exception in the
/// context's exception slot
pub(crate) fn emit_exception_blob(
    builder: &mut FunctionBuilder<'_>,
    handle_exception: usize,
    pointer: ir::Type,
    call_conv: CallConv,
) {
    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let ctx = builder.block_params(entry)[0];

    let handle_sig = abi::routine_signature(&[pointer], &[pointer], call_conv);
    let handler = abi::emit_native_call(builder, handle_sig, handle_exception, pointer, &[ctx]);

    builder.ins().return_(&handler);
}
