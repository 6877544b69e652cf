//! Code blobs: executable memory holding generated stubs
//!
//! A blob owns one `JITModule`. Single-path bridges all share the
//! `runtime_stubs` blob; the uncommon-trap and exception routines get a blob
//! each, with a reference map at every return point so the collector can scan
//! a thread stopped inside them.

use std::mem::ManuallyDrop;
use std::ops::Range;

use cranelift_codegen::ir::{Signature, UserFuncName};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use crate::error::StubError;
use crate::stubs::catalog::{BlobKind, StubId};

/// Where a live managed reference sits at a return point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefLocation {
    /// Word at this byte offset in the execution context
    ContextSlot(i32),
}

/// Live references at one return point inside a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMap {
    /// Absolute return address of the call this map describes
    pub return_address: usize,
    /// Locations holding live references
    pub live: Vec<RefLocation>,
}

/// One routine packed into a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRoutine {
    /// Stub the routine implements
    pub id: StubId,
    /// Absolute code range
    pub code: Range<usize>,
}

/// Frees the module's executable memory when dropped
struct CodeMemory(ManuallyDrop<JITModule>);

impl CodeMemory {
    fn module(&mut self) -> &mut JITModule {
        &mut self.0
    }
}

impl Drop for CodeMemory {
    fn drop(&mut self) {
        // SAFETY: the module is never used again and nothing points into its
        // code once the owning blob (or the failed builder) is gone
        unsafe {
            let module = ManuallyDrop::take(&mut self.0);
            module.free_memory();
        }
    }
}

// SAFETY: after finalization the module's memory is immutable executable code
unsafe impl Send for CodeMemory {}
unsafe impl Sync for CodeMemory {}

/// Finalized executable blob
pub struct CodeBlob {
    kind: BlobKind,
    routines: Vec<BlobRoutine>,
    reference_maps: Vec<ReferenceMap>,
    _memory: CodeMemory,
}

impl CodeBlob {
    /// Blob kind
    pub fn kind(&self) -> BlobKind {
        self.kind
    }

    /// Blob name
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Routines in the blob
    pub fn routines(&self) -> &[BlobRoutine] {
        &self.routines
    }

    /// Bytes of machine code in the blob
    pub fn code_size(&self) -> usize {
        self.routines.iter().map(|r| r.code.len()).sum()
    }

    /// Whether `pc` falls inside any routine of this blob
    pub fn contains(&self, pc: usize) -> bool {
        self.routine_at(pc).is_some()
    }

    /// Routine whose code covers `pc`
    pub fn routine_at(&self, pc: usize) -> Option<&BlobRoutine> {
        self.routines.iter().find(|r| r.code.contains(&pc))
    }

    /// All reference maps (empty for the shared runtime-stubs blob)
    pub fn reference_maps(&self) -> &[ReferenceMap] {
        &self.reference_maps
    }

    /// Reference map for the return point at `pc`
    pub fn reference_map_at(&self, pc: usize) -> Option<&ReferenceMap> {
        self.reference_maps.iter().find(|m| m.return_address == pc)
    }
}

impl std::fmt::Debug for CodeBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeBlob")
            .field("kind", &self.kind)
            .field("routines", &self.routines)
            .field("reference_maps", &self.reference_maps.len())
            .finish()
    }
}

struct DefinedRoutine {
    id: StubId,
    func: FuncId,
    size: usize,
    return_offsets: Vec<u32>,
    live: Vec<RefLocation>,
}

/// Accumulates routines into one blob, then finalizes it
pub(crate) struct BlobBuilder {
    kind: BlobKind,
    memory: CodeMemory,
    ctx: Context,
    func_ctx: FunctionBuilderContext,
    defined: Vec<DefinedRoutine>,
}

impl BlobBuilder {
    pub(crate) fn new(kind: BlobKind, isa: OwnedTargetIsa) -> Self {
        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        BlobBuilder {
            kind,
            memory: CodeMemory(ManuallyDrop::new(JITModule::new(builder))),
            ctx: Context::new(),
            func_ctx: FunctionBuilderContext::new(),
            defined: Vec::new(),
        }
    }

    /// Compile one routine into the blob and return its code size.
    ///
    /// `live` is recorded at every call return point when the blob carries
    /// reference maps.
    pub(crate) fn define<F>(
        &mut self,
        id: StubId,
        signature: Signature,
        live: &[RefLocation],
        emit: F,
    ) -> Result<usize, StubError>
    where
        F: FnOnce(&mut FunctionBuilder<'_>),
    {
        let name = id.name();
        let module = self.memory.module();
        let func = module
            .declare_function(name, Linkage::Local, &signature)
            .map_err(|e| StubError::generation(name, e.to_string()))?;

        self.ctx.func.signature = signature;
        self.ctx.func.name = UserFuncName::user(0, func.as_u32());
        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.func_ctx);
            emit(&mut builder);
            builder.finalize();
        }

        module
            .define_function(func, &mut self.ctx)
            .map_err(|e| StubError::generation(name, format!("{:?}", e)))?;

        let compiled = self
            .ctx
            .compiled_code()
            .ok_or_else(|| StubError::generation(name, "backend produced no code"))?;
        let size = compiled.code_buffer().len();
        let return_offsets = if self.kind == BlobKind::RuntimeStubs {
            Vec::new()
        } else {
            compiled
                .buffer
                .call_sites()
                .into_iter()
                .map(|site| site.ret_addr)
                .collect()
        };
        module.clear_context(&mut self.ctx);

        self.defined.push(DefinedRoutine {
            id,
            func,
            size,
            return_offsets,
            live: live.to_vec(),
        });
        Ok(size)
    }

    /// Make the blob executable and resolve absolute addresses
    pub(crate) fn finish(mut self) -> Result<CodeBlob, StubError> {
        let kind = self.kind;
        let module = self.memory.module();
        module
            .finalize_definitions()
            .map_err(|e| StubError::generation(kind.name(), e.to_string()))?;

        let mut routines = Vec::with_capacity(self.defined.len());
        let mut reference_maps = Vec::new();
        for routine in &self.defined {
            let start = module.get_finalized_function(routine.func) as usize;
            routines.push(BlobRoutine {
                id: routine.id,
                code: start..start + routine.size,
            });
            reference_maps.extend(routine.return_offsets.iter().map(|&offset| ReferenceMap {
                return_address: start + offset as usize,
                live: routine.live.clone(),
            }));
            log::debug!(
                "{}: {} at {:#x} ({} bytes)",
                kind.name(),
                routine.id,
                start,
                routine.size
            );
        }

        Ok(CodeBlob {
            kind,
            routines,
            reference_maps,
            _memory: self.memory,
        })
    }
}
