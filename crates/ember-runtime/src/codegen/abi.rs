//! Calling-convention helpers for Cranelift IR generation
//!
//! Compiled code calls a stub as `(ctx, domain...) -> range`. The native side
//! takes `(domain..., ctx)` when the stub needs its context and returns either
//! the range or, for address-returning continuations, a code address.
//! An exception handler is entered as `(ctx, exception) -> range`: it
//! finishes the call the stub was made for.

use cranelift_codegen::ir::{self, types, AbiParam, InstBuilder, MemFlags, Signature};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::FunctionBuilder;

use crate::runtime::offsets;
use crate::stubs::catalog::{Continuation, StubFlags};
use crate::stubs::signature::CallSignature;
use crate::stubs::types::ValueKind;

/// Cranelift type a value of `kind` travels as
pub fn clif_type(kind: ValueKind, pointer: ir::Type) -> ir::Type {
    match kind {
        ValueKind::Ref | ValueKind::Long => types::I64,
        ValueKind::Int => types::I32,
        ValueKind::Float => types::F32,
        ValueKind::Double => types::F64,
        // Vectors are spilled by the caller and passed by address
        ValueKind::Ptr | ValueKind::Address | ValueKind::Vector(_) => pointer,
    }
}

/// Signature compiled code uses to call a stub entry
pub fn compiled_signature(sig: &CallSignature, call_conv: CallConv, pointer: ir::Type) -> Signature {
    let mut signature = Signature::new(call_conv);
    signature.params.push(AbiParam::new(pointer));
    for &kind in sig.domain() {
        signature.params.push(AbiParam::new(clif_type(kind, pointer)));
    }
    for &kind in sig.range() {
        signature.returns.push(AbiParam::new(clif_type(kind, pointer)));
    }
    signature
}

/// Signature of the native implementation behind a bridge
pub fn native_signature(
    sig: &CallSignature,
    flags: StubFlags,
    continuation: Continuation,
    call_conv: CallConv,
    pointer: ir::Type,
) -> Signature {
    let mut signature = Signature::new(call_conv);
    for &kind in sig.domain() {
        signature.params.push(AbiParam::new(clif_type(kind, pointer)));
    }
    if flags.needs_context {
        signature.params.push(AbiParam::new(pointer));
    }
    match continuation {
        Continuation::PlainReturn | Continuation::ResumeAtAddress => {
            for &kind in sig.range() {
                signature.returns.push(AbiParam::new(clif_type(kind, pointer)));
            }
        }
        Continuation::TailTransferToHandler => {
            signature.returns.push(AbiParam::new(pointer));
        }
    }
    signature
}

/// Signature a bridge uses to enter an exception handler on behalf of its
/// caller
pub fn handler_signature(sig: &CallSignature, call_conv: CallConv, pointer: ir::Type) -> Signature {
    let mut signature = Signature::new(call_conv);
    signature.params.push(AbiParam::new(pointer));
    signature.params.push(AbiParam::new(types::I64));
    for &kind in sig.range() {
        signature.returns.push(AbiParam::new(clif_type(kind, pointer)));
    }
    signature
}

/// Signature for a native routine taking `params` and returning `returns`
pub fn routine_signature(params: &[ir::Type], returns: &[ir::Type], call_conv: CallConv) -> Signature {
    let mut signature = Signature::new(call_conv);
    signature.params.extend(params.iter().map(|&t| AbiParam::new(t)));
    signature.returns.extend(returns.iter().map(|&t| AbiParam::new(t)));
    signature
}

/// Call a native routine at a fixed address
pub fn emit_native_call(
    builder: &mut FunctionBuilder<'_>,
    signature: Signature,
    address: usize,
    pointer: ir::Type,
    args: &[ir::Value],
) -> Vec<ir::Value> {
    let sig_ref = builder.import_signature(signature);
    let callee = builder.ins().iconst(pointer, address as i64);
    let call = builder.ins().call_indirect(sig_ref, callee, args);
    builder.inst_results(call).to_vec()
}

/// Load the context's pending-exception word (non-zero when pending)
pub fn emit_load_pending_exception(builder: &mut FunctionBuilder<'_>, ctx: ir::Value) -> ir::Value {
    builder
        .ins()
        .load(types::I64, MemFlags::trusted(), ctx, offsets::PENDING_EXCEPTION)
}

/// Load the exception the last dispatch selected a handler for
pub fn emit_load_exception_oop(builder: &mut FunctionBuilder<'_>, ctx: ir::Value) -> ir::Value {
    builder
        .ins()
        .load(types::I64, MemFlags::trusted(), ctx, offsets::EXCEPTION_OOP)
}

/// Zero the exception and handler slots once a handler has been chosen
pub fn emit_consume_handler(builder: &mut FunctionBuilder<'_>, ctx: ir::Value, pointer: ir::Type) {
    let oop = builder.ins().iconst(types::I64, 0);
    builder.ins().store(MemFlags::trusted(), oop, ctx, offsets::EXCEPTION_OOP);
    let pc = builder.ins().iconst(pointer, 0);
    builder
        .ins()
        .store(MemFlags::trusted(), pc, ctx, offsets::EXCEPTION_HANDLER_PC);
}

/// Unsynchronized `*counter += 1` on a 32-bit counter at a fixed address
pub fn emit_counter_increment(builder: &mut FunctionBuilder<'_>, counter: usize, pointer: ir::Type) {
    let addr = builder.ins().iconst(pointer, counter as i64);
    let count = builder.ins().load(types::I32, MemFlags::trusted(), addr, 0);
    let bumped = builder.ins().iadd_imm(count, 1);
    builder.ins().store(MemFlags::trusted(), bumped, addr, 0);
}
