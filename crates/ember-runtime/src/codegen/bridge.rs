//! Bridging routine for single-path stubs
//!
//! ```text
//! entry(ctx, args...):
//!     [counter += 1]
//!     results = native(args..., [ctx])
//!     [if ctx.pending_exception != 0 {
//!         handler = forward_exception(ctx)
//!         return enter(handler, ctx.exception_oop)
//!     }]
//!     PlainReturn / ResumeAtAddress:  return results
//!     TailTransferToHandler:          return enter(results[0], args[0])
//!
//! enter(handler, exception):
//!     ctx.exception_oop = 0; ctx.exception_handler_pc = 0
//!     return handler(ctx, exception)
//! ```
//!
//! The handler finishes the call on behalf of the stub's caller, so its
//! results are the stub's results.

use cranelift_codegen::ir::{self, InstBuilder};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::FunctionBuilder;

use super::abi;
use crate::stubs::catalog::{Continuation, StubId};
use crate::stubs::signature::CallSignature;

/// Everything needed to emit one bridge
pub(crate) struct BridgeSpec<'a> {
    pub id: StubId,
    pub signature: &'a CallSignature,
    /// Native implementation address
    pub native: usize,
    /// `forward_exception` address, used when the stub may throw
    pub forward_exception: usize,
    /// Address of the call counter to bump on entry
    pub counter: Option<usize>,
    pub pointer: ir::Type,
    pub call_conv: CallConv,
}

pub(crate) fn emit_bridge(builder: &mut FunctionBuilder<'_>, spec: &BridgeSpec<'_>) {
    let info = spec.id.info();
    let pointer = spec.pointer;

    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    let params = builder.block_params(entry).to_vec();
    let (ctx, args) = (params[0], &params[1..]);

    if let Some(counter) = spec.counter {
        abi::emit_counter_increment(builder, counter, pointer);
    }

    let mut native_args = args.to_vec();
    if info.flags.needs_context {
        native_args.push(ctx);
    }
    let native_sig = abi::native_signature(
        spec.signature,
        info.flags,
        info.continuation,
        spec.call_conv,
        pointer,
    );
    let results = abi::emit_native_call(builder, native_sig, spec.native, pointer, &native_args);

    if info.flags.may_throw {
        let pending = abi::emit_load_pending_exception(builder, ctx);
        let exception_path = builder.create_block();
        let normal_path = builder.create_block();
        builder.ins().brif(pending, exception_path, &[], normal_path, &[]);
        builder.seal_block(exception_path);
        builder.seal_block(normal_path);

        builder.switch_to_block(exception_path);
        let forward_sig = abi::routine_signature(&[pointer], &[pointer], spec.call_conv);
        let handler = abi::emit_native_call(builder, forward_sig, spec.forward_exception, pointer, &[ctx]);
        let exception = abi::emit_load_exception_oop(builder, ctx);
        emit_enter_handler(builder, spec, ctx, handler[0], exception);

        builder.switch_to_block(normal_path);
    }

    match info.continuation {
        Continuation::PlainReturn | Continuation::ResumeAtAddress => {
            builder.ins().return_(&results);
        }
        Continuation::TailTransferToHandler => {
            // The exception travels as the first domain value
            emit_enter_handler(builder, spec, ctx, results[0], args[0]);
        }
    }
}

fn emit_enter_handler(
    builder: &mut FunctionBuilder<'_>,
    spec: &BridgeSpec<'_>,
    ctx: ir::Value,
    handler: ir::Value,
    exception: ir::Value,
) {
    abi::emit_consume_handler(builder, ctx, spec.pointer);
    let handler_sig = abi::handler_signature(spec.signature, spec.call_conv, spec.pointer);
    let sig_ref = builder.import_signature(handler_sig);
    let call = builder.ins().call_indirect(sig_ref, handler, &[ctx, exception]);
    let handled = builder.inst_results(call).to_vec();
    builder.ins().return_(&handled);
}
