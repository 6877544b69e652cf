//! Runtime stub catalog
//!
//! Every distinguished stub is declared once in the `runtime_stubs!` table
//! below. The macro expands to the closed `StubId` enum plus a parallel
//! static metadata table (name, signature shape, generation flags,
//! continuation kind, owning blob). Feature-gated families simply vanish
//! from the enum when their feature is off, keeping ids dense.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

use super::signature::{DigestVariant, SignatureShape};

/// Generation flags for a stub's bridging routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubFlags {
    /// Append the execution-context pointer as a trailing native argument
    pub needs_context: bool,
    /// Check for a pending exception after the native call returns
    pub may_throw: bool,
}

impl StubFlags {
    /// Pure leaf routine: no context, cannot throw
    pub const LEAF: StubFlags = StubFlags {
        needs_context: false,
        may_throw: false,
    };
    /// Needs the context but never leaves an exception pending
    pub const CONTEXT: StubFlags = StubFlags {
        needs_context: true,
        may_throw: false,
    };
    /// Needs the context and may leave an exception pending
    pub const THROWING: StubFlags = StubFlags {
        needs_context: true,
        may_throw: true,
    };
}

/// How a bridging routine hands control back once the native call is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Return the native result to the compiled caller
    PlainReturn,
    /// The native result is a code address; hand it back for the caller to resume at
    ResumeAtAddress,
    /// The native result is a handler entry; transfer to it with the first argument
    TailTransferToHandler,
}

/// Which code blob a stub's code lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// Shared blob packing all single-path stubs
    RuntimeStubs,
    /// Dedicated multi-path uncommon-trap blob
    UncommonTrap,
    /// Dedicated multi-path exception dispatch blob
    Exception,
}

impl BlobKind {
    /// Blob name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            BlobKind::RuntimeStubs => "runtime_stubs",
            BlobKind::UncommonTrap => "uncommon_trap_blob",
            BlobKind::Exception => "exception_blob",
        }
    }
}

/// Static metadata for one stub
#[derive(Debug)]
pub struct StubInfo {
    /// Unique, non-empty stub name
    pub name: &'static str,
    /// Signature family and parameters
    pub shape: SignatureShape,
    /// Bridge generation flags
    pub flags: StubFlags,
    /// Control transfer at the end of the bridge
    pub continuation: Continuation,
    /// Owning blob
    pub blob: BlobKind,
}

macro_rules! runtime_stubs {
    ($(
        $(#[cfg($cfg:meta)])?
        $variant:ident = $name:literal, $doc:literal,
            $shape:expr, $flags:expr, $cont:expr, $blob:expr;
    )*) => {
        /// Identifier of a distinguished runtime stub
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum StubId {
            $(
                #[doc = $doc]
                $(#[cfg($cfg)])?
                $variant,
            )*
        }

        #[allow(dead_code)]
        enum StubCount {
            $(
                $(#[cfg($cfg)])?
                $variant,
            )*
            Count,
        }

        impl StubId {
            /// Static metadata for this stub
            pub fn info(self) -> &'static StubInfo {
                match self {
                    $(
                        $(#[cfg($cfg)])?
                        StubId::$variant => &StubInfo {
                            name: $name,
                            shape: $shape,
                            flags: $flags,
                            continuation: $cont,
                            blob: $blob,
                        },
                    )*
                }
            }
        }

        fn all_ids() -> Vec<StubId> {
            let mut ids = Vec::with_capacity(StubId::COUNT);
            $(
                $(#[cfg($cfg)])?
                ids.push(StubId::$variant);
            )*
            ids
        }
    };
}

runtime_stubs! {
    UncommonTrap = "uncommon_trap", "Deoptimization trigger for violated compile-time assumptions",
        SignatureShape::UncommonTrap, StubFlags::CONTEXT, Continuation::ResumeAtAddress, BlobKind::UncommonTrap;
    ExceptionBlob = "exception", "Handler search entry for exceptions raised in compiled code",
        SignatureShape::ExceptionBlob, StubFlags::CONTEXT, Continuation::ResumeAtAddress, BlobKind::Exception;

    NewInstance = "new_instance", "Instance allocation slow path",
        SignatureShape::NewInstance, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    NewArray = "new_array", "Array allocation slow path",
        SignatureShape::NewArray, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    NewArrayNozero = "new_array_nozero", "Array allocation slow path without zeroing",
        SignatureShape::NewArray, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    MultiNewArray2 = "multianewarray2", "Two-dimensional array allocation",
        SignatureShape::MultiNewArray(2), StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    MultiNewArray3 = "multianewarray3", "Three-dimensional array allocation",
        SignatureShape::MultiNewArray(3), StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    MultiNewArray4 = "multianewarray4", "Four-dimensional array allocation",
        SignatureShape::MultiNewArray(4), StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    MultiNewArray5 = "multianewarray5", "Five-dimensional array allocation",
        SignatureShape::MultiNewArray(5), StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    MultiNewArrayN = "multianewarrayN", "Array allocation with dimensions passed in an int array",
        SignatureShape::MultiNewArrayN, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;

    CompleteMonitorLocking = "complete_monitor_locking", "Contended monitor enter",
        SignatureShape::MonitorEnter, StubFlags::CONTEXT, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    CompleteMonitorUnlocking = "complete_monitor_unlocking", "Contended monitor exit",
        SignatureShape::MonitorExit, StubFlags::CONTEXT, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    MonitorNotify = "monitor_notify", "Wake one waiter of a monitor",
        SignatureShape::MonitorNotify, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    MonitorNotifyAll = "monitor_notifyAll", "Wake all waiters of a monitor",
        SignatureShape::MonitorNotify, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;

    Rethrow = "rethrow", "Re-propagate an already matched exception to the caller",
        SignatureShape::Rethrow, StubFlags::CONTEXT, Continuation::TailTransferToHandler, BlobKind::RuntimeStubs;
    ThrowNullException = "throw_null_exception", "Implicit null dereference",
        SignatureShape::ImplicitThrow, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    ThrowDiv0Exception = "throw_div0_exception", "Implicit integer division by zero",
        SignatureShape::ImplicitThrow, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    ThrowStackOverflow = "throw_stack_overflow_error", "Stack guard page hit",
        SignatureShape::ImplicitThrow, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;

    SlowArraycopy = "slow_arraycopy", "Fully checked array copy fallback",
        SignatureShape::SlowArraycopy, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    RegisterFinalizer = "register_finalizer", "Register an object with a finalizer",
        SignatureShape::RegisterFinalizer, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;

    #[cfg(feature = "inline-values")]
    LoadUnknownInline = "load_unknown_inline", "Load an element of a flat array of unknown layout",
        SignatureShape::LoadUnknownInline, StubFlags::THROWING, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    #[cfg(feature = "inline-values")]
    StoreUnknownInline = "store_unknown_inline", "Store a buffered value into a flat array of unknown layout",
        SignatureShape::StoreUnknownInline, StubFlags::CONTEXT, Continuation::PlainReturn, BlobKind::RuntimeStubs;

    DSin = "dsin", "Math.sin fallback",
        SignatureShape::MathDD, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    DCos = "dcos", "Math.cos fallback",
        SignatureShape::MathDD, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    DTan = "dtan", "Math.tan fallback",
        SignatureShape::MathDD, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    DLog = "dlog", "Math.log fallback",
        SignatureShape::MathDD, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    DLog10 = "dlog10", "Math.log10 fallback",
        SignatureShape::MathDD, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    DExp = "dexp", "Math.exp fallback",
        SignatureShape::MathDD, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    DPow = "dpow", "Math.pow fallback",
        SignatureShape::MathDDD, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    DMod = "drem", "Floating-point remainder",
        SignatureShape::MathDDD, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;

    UpdateBytesCrc32 = "updateBytesCRC32", "CRC-32 over a byte range",
        SignatureShape::UpdateBytesCrc32, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    Sha1Compress = "sha1_implCompress", "SHA-1 single block compression",
        SignatureShape::Digest(DigestVariant::Sha1), StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    Sha256Compress = "sha256_implCompress", "SHA-256 single block compression",
        SignatureShape::Digest(DigestVariant::Sha256), StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    Sha512Compress = "sha512_implCompress", "SHA-512 single block compression",
        SignatureShape::Digest(DigestVariant::Sha512), StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    StringIndexOf = "string_indexof", "UTF-16 substring search",
        SignatureShape::StringIndexOf, StubFlags::LEAF, Continuation::PlainReturn, BlobKind::RuntimeStubs;

    #[cfg(feature = "trace-stubs")]
    NotifyTaskStart = "notify_task_start", "Task lifecycle event: started",
        SignatureShape::NotifyTask, StubFlags::CONTEXT, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    #[cfg(feature = "trace-stubs")]
    NotifyTaskEnd = "notify_task_end", "Task lifecycle event: finished",
        SignatureShape::NotifyTask, StubFlags::CONTEXT, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    #[cfg(feature = "trace-stubs")]
    NotifyTaskMount = "notify_task_mount", "Task lifecycle event: mounted on a carrier thread",
        SignatureShape::NotifyTask, StubFlags::CONTEXT, Continuation::PlainReturn, BlobKind::RuntimeStubs;
    #[cfg(feature = "trace-stubs")]
    NotifyTaskUnmount = "notify_task_unmount", "Task lifecycle event: unmounted from its carrier thread",
        SignatureShape::NotifyTask, StubFlags::CONTEXT, Continuation::PlainReturn, BlobKind::RuntimeStubs;
}

static ALL_STUBS: Lazy<Vec<StubId>> = Lazy::new(all_ids);

impl StubId {
    /// Sentinel below the valid range
    pub const NONE: i32 = -1;
    /// Number of stubs (sentinel above the valid range)
    pub const COUNT: usize = StubCount::Count as usize;

    /// All stub ids in index order
    pub fn all() -> &'static [StubId] {
        &ALL_STUBS
    }

    /// Dense index in `[0, COUNT)`
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stub for a dense index, `None` outside `[0, COUNT)`
    pub fn from_index(index: usize) -> Option<StubId> {
        ALL_STUBS.get(index).copied()
    }

    /// Stub name
    pub fn name(self) -> &'static str {
        self.info().name
    }
}

impl std::fmt::Display for StubId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of the stub with the given raw index.
///
/// # Panics
///
/// Panics if `index` is outside `[0, StubId::COUNT)`; asking for the name of
/// a sentinel is a VM bug.
pub fn stub_name(index: i32) -> &'static str {
    match usize::try_from(index).ok().and_then(StubId::from_index) {
        Some(id) => id.name(),
        None => panic!(
            "stub id {} out of range [0, {})",
            index,
            StubId::COUNT
        ),
    }
}

/// Problem found by catalog validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogIssue {
    /// A stub has an empty name
    EmptyName(StubId),
    /// Two stubs share a name
    DuplicateName(&'static str),
    /// A stub's signature shape is outside its family's range
    BadShape(StubId),
}

/// Check that names are unique and non-empty and every shape is buildable
pub fn validate_catalog() -> Result<(), CatalogIssue> {
    let mut seen = FxHashSet::default();
    for &id in StubId::all() {
        let info = id.info();
        if info.name.is_empty() {
            return Err(CatalogIssue::EmptyName(id));
        }
        if !seen.insert(info.name) {
            return Err(CatalogIssue::DuplicateName(info.name));
        }
        if info.shape.validate().is_err() {
            return Err(CatalogIssue::BadShape(id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_valid() {
        assert_eq!(validate_catalog(), Ok(()));
    }

    #[test]
    fn test_names_unique_and_non_empty() {
        let mut names = FxHashSet::default();
        for &id in StubId::all() {
            assert!(!id.name().is_empty(), "{:?} has an empty name", id);
            assert!(names.insert(id.name()), "duplicate name {}", id.name());
        }
        assert_eq!(names.len(), StubId::COUNT);
    }

    #[test]
    fn test_index_roundtrip_is_dense() {
        assert_eq!(StubId::all().len(), StubId::COUNT);
        for (i, &id) in StubId::all().iter().enumerate() {
            assert_eq!(id.index(), i);
            assert_eq!(StubId::from_index(i), Some(id));
        }
        assert_eq!(StubId::from_index(StubId::COUNT), None);
    }

    #[test]
    fn test_stub_name_by_index() {
        assert_eq!(stub_name(StubId::NewArray.index() as i32), "new_array");
        assert_eq!(stub_name(0), StubId::UncommonTrap.name());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_stub_name_rejects_none_sentinel() {
        stub_name(StubId::NONE);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_stub_name_rejects_count_sentinel() {
        stub_name(StubId::COUNT as i32);
    }

    #[test]
    fn test_multi_path_blobs_are_dedicated() {
        assert_eq!(StubId::UncommonTrap.info().blob, BlobKind::UncommonTrap);
        assert_eq!(StubId::ExceptionBlob.info().blob, BlobKind::Exception);
        let shared = StubId::all()
            .iter()
            .filter(|id| id.info().blob == BlobKind::RuntimeStubs)
            .count();
        assert_eq!(shared, StubId::COUNT - 2);
    }

    #[test]
    fn test_rethrow_transfers_to_handler() {
        assert_eq!(
            StubId::Rethrow.info().continuation,
            Continuation::TailTransferToHandler
        );
        assert_eq!(StubId::NewArray.info().continuation, Continuation::PlainReturn);
    }
}
