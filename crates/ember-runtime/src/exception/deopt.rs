//! Uncommon traps and frame unrolling
//!
//! Compiled code hits an uncommon trap with a packed `TrapRequest`. The
//! uncommon-trap blob first fetches unroll information (deoptimizing the
//! trapping frame) and then unpacks it, resuming in the interpreter at the
//! address the VM supplies for the frame's bytecode index.

use super::frames::FrameId;
use crate::error::TrapError;
use crate::runtime::ExecutionContext;

/// Why compiled code gave up on an assumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptReason {
    /// No specific reason recorded
    None = 0,
    /// Saw an unexpected null
    NullCheck = 1,
    /// Saw a non-null where null was asserted
    NullAssert = 2,
    /// Index out of bounds
    RangeCheck = 3,
    /// Receiver class did not match the profile
    ClassCheck = 4,
    /// Array store type check failed
    ArrayCheck = 5,
    /// Intrinsic assumption failed
    Intrinsic = 6,
    /// A branch believed never taken was taken
    UnstableIf = 7,
    /// Referenced class not yet loaded
    Unloaded = 8,
    /// Class not yet initialized
    Uninitialized = 9,
    /// Code believed unreachable was reached
    Unreached = 10,
    /// Condition the compiler chose not to handle
    Unhandled = 11,
    /// Divisor was zero
    Div0Check = 12,
    /// Loop limit check failed
    LoopLimitCheck = 13,
}

impl DeoptReason {
    /// Decode from the 5-bit reason field
    pub fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => DeoptReason::None,
            1 => DeoptReason::NullCheck,
            2 => DeoptReason::NullAssert,
            3 => DeoptReason::RangeCheck,
            4 => DeoptReason::ClassCheck,
            5 => DeoptReason::ArrayCheck,
            6 => DeoptReason::Intrinsic,
            7 => DeoptReason::UnstableIf,
            8 => DeoptReason::Unloaded,
            9 => DeoptReason::Uninitialized,
            10 => DeoptReason::Unreached,
            11 => DeoptReason::Unhandled,
            12 => DeoptReason::Div0Check,
            13 => DeoptReason::LoopLimitCheck,
            _ => return None,
        })
    }
}

/// What to do with the compiled method after the trap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptAction {
    /// Just interpret, keep the method
    None = 0,
    /// Recompile if the trap keeps happening
    MaybeRecompile = 1,
    /// Reset profile and reinterpret
    Reinterpret = 2,
    /// Invalidate the method
    MakeNotEntrant = 3,
    /// Invalidate and never compile again
    MakeNotCompilable = 4,
}

impl DeoptAction {
    /// Decode from the 3-bit action field
    pub fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => DeoptAction::None,
            1 => DeoptAction::MaybeRecompile,
            2 => DeoptAction::Reinterpret,
            3 => DeoptAction::MakeNotEntrant,
            4 => DeoptAction::MakeNotCompilable,
            _ => return None,
        })
    }
}

const ACTION_BITS: u32 = 3;
const REASON_BITS: u32 = 5;
const REASON_SHIFT: u32 = ACTION_BITS;
const DEBUG_ID_SHIFT: u32 = REASON_SHIFT + REASON_BITS;
const DEBUG_ID_LIMIT: u32 = 1 << 23;

/// Decoded trap request
///
/// Packed requests are negative: `!(debug_id << 8 | reason << 3 | action)`.
/// A non-negative request is the constant-pool index of an unloaded class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapRequest {
    /// Why the trap fired
    pub reason: DeoptReason,
    /// What to do with the method
    pub action: DeoptAction,
    /// Debug id or constant-pool index
    pub index: u32,
}

impl TrapRequest {
    /// Create a request
    pub fn new(reason: DeoptReason, action: DeoptAction, index: u32) -> Self {
        TrapRequest { reason, action, index }
    }

    /// Pack into the `i32` compiled code passes to the uncommon-trap blob
    pub fn encode(&self) -> i32 {
        let index = self.index % DEBUG_ID_LIMIT;
        let packed = (index << DEBUG_ID_SHIFT)
            | ((self.reason as u32) << REASON_SHIFT)
            | self.action as u32;
        !(packed as i32)
    }

    /// Unpack a trap request; `None` for fields outside the known enums
    pub fn decode(request: i32) -> Option<Self> {
        if request >= 0 {
            return Some(TrapRequest::new(
                DeoptReason::Unloaded,
                DeoptAction::Reinterpret,
                request as u32,
            ));
        }
        let packed = (!request) as u32;
        let action = DeoptAction::from_bits(packed & ((1 << ACTION_BITS) - 1))?;
        let reason = DeoptReason::from_bits((packed >> REASON_SHIFT) & ((1 << REASON_BITS) - 1))?;
        Some(TrapRequest::new(reason, action, packed >> DEBUG_ID_SHIFT))
    }
}

/// Description of how to rebuild interpreter state for a trapped frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrollBlock {
    /// The compiled frame being replaced
    pub frame: FrameId,
    /// Decoded trap request
    pub request: TrapRequest,
    /// Bytecode index to resume at
    pub bci: i32,
    /// Interpreter address to resume at
    pub resume_address: usize,
}

/// First half of an uncommon trap: deoptimize the trapping frame and record
/// how to unroll it. Returns the number of frames to unpack.
pub fn fetch_unroll_info(ctx: &mut ExecutionContext, trap_request: i32) -> Result<i64, TrapError> {
    let request = TrapRequest::decode(trap_request).ok_or(TrapError::MalformedRequest(trap_request))?;
    let frame = ctx
        .frames()
        .top()
        .cloned()
        .ok_or(TrapError::NoCompiledFrame(trap_request))?;

    log::debug!(
        "uncommon trap in {} at bci {}: {:?} / {:?}",
        frame.id,
        frame.bci,
        request.reason,
        request.action
    );

    let dispatcher = ctx.dispatcher().clone();
    let services = ctx.services().clone();
    dispatcher.deoptimize_frame(ctx.frames_mut(), frame.id, services.as_ref());

    let resume_address = services.interpreter_resume_address(&frame);
    ctx.set_unroll(UnrollBlock {
        frame: frame.id,
        request,
        bci: frame.bci,
        resume_address,
    });
    Ok(1)
}

/// Second half of an uncommon trap: replace the compiled frame with its
/// interpreter continuation and return the address to resume at.
pub fn unpack_frames(ctx: &mut ExecutionContext, frame_count: i64) -> Result<usize, TrapError> {
    let unroll = match ctx.take_unroll() {
        Some(unroll) if frame_count > 0 => unroll,
        _ => return Err(TrapError::MissingUnrollInfo(frame_count)),
    };
    if ctx.frames().top().map(|f| f.id) == Some(unroll.frame) {
        ctx.frames_mut().pop();
    }
    Ok(unroll.resume_address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::code_table::CodeTable;
    use crate::exception::dispatcher::ExceptionDispatcher;
    use crate::runtime::testing::RecordingServices;
    use std::sync::Arc;

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(RecordingServices::new()),
            Arc::new(ExceptionDispatcher::new(Arc::new(CodeTable::new()))),
        )
    }

    #[test]
    fn test_trap_request_roundtrip() {
        let request = TrapRequest::new(DeoptReason::ClassCheck, DeoptAction::MaybeRecompile, 42);
        let encoded = request.encode();
        assert!(encoded < 0);
        assert_eq!(TrapRequest::decode(encoded), Some(request));
    }

    #[test]
    fn test_non_negative_request_is_unloaded_index() {
        let decoded = TrapRequest::decode(17).unwrap();
        assert_eq!(decoded.reason, DeoptReason::Unloaded);
        assert_eq!(decoded.action, DeoptAction::Reinterpret);
        assert_eq!(decoded.index, 17);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        // action field 7 is unassigned
        assert_eq!(TrapRequest::decode(!7), None);
        // reason field 31 is unassigned
        assert_eq!(TrapRequest::decode(!(31 << 3)), None);
    }

    #[test]
    fn test_uncommon_trap_deoptimizes_and_resumes() {
        let mut ctx = context();
        let caller = ctx.frames_mut().push(0x1000, 0, false);
        let trapping = ctx.frames_mut().push(0x2000, 12, false);
        let request = TrapRequest::new(DeoptReason::NullCheck, DeoptAction::MakeNotEntrant, 3);

        assert_eq!(fetch_unroll_info(&mut ctx, request.encode()), Ok(1));
        assert!(ctx.frames().is_deoptimized(trapping));
        assert!(!ctx.frames().is_deoptimized(caller));

        assert_eq!(unpack_frames(&mut ctx, 1), Ok(0x9000 + 12));
        assert_eq!(ctx.frames().top().unwrap().id, caller);
        // unroll info is consumed
        assert_eq!(unpack_frames(&mut ctx, 1), Err(TrapError::MissingUnrollInfo(1)));
    }

    #[test]
    fn test_malformed_request_leaves_frame_alone() {
        let mut ctx = context();
        let frame = ctx.frames_mut().push(0x2000, 4, false);

        assert_eq!(fetch_unroll_info(&mut ctx, !7), Err(TrapError::MalformedRequest(!7)));
        assert!(!ctx.frames().is_deoptimized(frame));
        assert_eq!(ctx.frames().depth(), 1);
        assert_eq!(unpack_frames(&mut ctx, 0), Err(TrapError::MissingUnrollInfo(0)));
    }

    #[test]
    fn test_uncommon_trap_without_frames() {
        let mut ctx = context();
        let request = TrapRequest::new(DeoptReason::RangeCheck, DeoptAction::None, 0).encode();
        assert_eq!(fetch_unroll_info(&mut ctx, request), Err(TrapError::NoCompiledFrame(request)));
        assert!(ctx.take_unroll().is_none());
    }
}
