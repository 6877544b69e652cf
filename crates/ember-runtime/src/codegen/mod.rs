//! Cranelift stub generator
//!
//! Builds every catalog stub into executable memory once, at startup:
//! the uncommon-trap and exception routines each get a dedicated blob with
//! reference maps, all other stubs are bridges packed into the shared
//! `runtime_stubs` blob. Generation is all-or-nothing; on any failure the
//! blobs built so far are freed and no entry table exists.

pub mod abi;
pub mod blob;
mod blobs;
mod bridge;

use std::sync::Arc;

use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use rustc_hash::FxHashMap;
use target_lexicon::PointerWidth;

use self::blob::{BlobBuilder, RefLocation};
use self::bridge::BridgeSpec;
use crate::config::GeneratorConfig;
use crate::entry_table::EntryTable;
use crate::error::StubError;
use crate::profiling::counters::{named_counters, CounterTag, NamedCounter, NamedCounterRegistry};
use crate::runtime::offsets;
use crate::stubs::catalog::{validate_catalog, BlobKind, StubId};
use crate::stubs::natives::{NativeImplTable, RuntimeRoutine};
use crate::stubs::signature::SignatureRegistry;

pub use self::blob::{BlobRoutine, CodeBlob, ReferenceMap};

/// One-time generator of the runtime stub set
pub struct StubGenerator<'r> {
    config: GeneratorConfig,
    signatures: &'r SignatureRegistry,
    counters: &'r NamedCounterRegistry,
}

impl StubGenerator<'static> {
    /// Generator using the process-wide signature and counter registries
    pub fn new(config: GeneratorConfig) -> Self {
        StubGenerator::with_registries(config, SignatureRegistry::global(), named_counters())
    }
}

impl<'r> StubGenerator<'r> {
    /// Generator using the given registries
    pub fn with_registries(
        config: GeneratorConfig,
        signatures: &'r SignatureRegistry,
        counters: &'r NamedCounterRegistry,
    ) -> Self {
        StubGenerator {
            config,
            signatures,
            counters,
        }
    }

    /// Generator configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate every catalog stub against `natives`
    pub fn generate(&self, natives: &NativeImplTable) -> Result<EntryTable, StubError> {
        validate_catalog()
            .map_err(|issue| StubError::generation("stub_catalog", format!("{:?}", issue)))?;

        let isa = self.host_isa()?;
        let pointer = isa.pointer_type();
        let call_conv = isa.default_call_conv();
        let mut budget = CodeBudget::new(self.config.code_buffer_size);

        let forward_exception = routine_address(natives, RuntimeRoutine::ForwardException)?;
        let unpack_frames = routine_address(natives, RuntimeRoutine::UnpackFrames)?;

        // Uncommon trap
        let id = StubId::UncommonTrap;
        let fetch_unroll_info = native_address(natives, id)?;
        let signature = abi::compiled_signature(&self.signatures.signature(id), call_conv, pointer);
        let mut builder = BlobBuilder::new(BlobKind::UncommonTrap, isa.clone());
        let size = builder.define(id, signature, &[], |b| {
            blobs::emit_uncommon_trap_blob(b, fetch_unroll_info, unpack_frames, pointer, call_conv)
        })?;
        budget.charge(id, size)?;
        let uncommon_trap = Arc::new(builder.finish()?);

        // Exception dispatch; the exception oop is live across the search
        let id = StubId::ExceptionBlob;
        let handle_exception = native_address(natives, id)?;
        let signature = abi::compiled_signature(&self.signatures.signature(id), call_conv, pointer);
        let mut builder = BlobBuilder::new(BlobKind::Exception, isa.clone());
        let live = [RefLocation::ContextSlot(offsets::EXCEPTION_OOP)];
        let size = builder.define(id, signature, &live, |b| {
            blobs::emit_exception_blob(b, handle_exception, pointer, call_conv)
        })?;
        budget.charge(id, size)?;
        let exception = Arc::new(builder.finish()?);

        // Single-path bridges
        let mut counters: FxHashMap<StubId, Arc<NamedCounter>> = FxHashMap::default();
        let mut builder = BlobBuilder::new(BlobKind::RuntimeStubs, isa);
        for &id in StubId::all() {
            if id.info().blob != BlobKind::RuntimeStubs {
                continue;
            }
            let native = native_address(natives, id)?;
            let signature = self.signatures.signature(id);
            let counter = self
                .config
                .count_stub_calls
                .then(|| self.counters.new_counter(format!("stub {}", id.name()), CounterTag::None));
            let spec = BridgeSpec {
                id,
                signature: &signature,
                native,
                forward_exception,
                counter: counter.as_ref().map(|c| c.count_addr()),
                pointer,
                call_conv,
            };
            let compiled = abi::compiled_signature(&signature, call_conv, pointer);
            let size = builder.define(id, compiled, &[], |b| bridge::emit_bridge(b, &spec))?;
            budget.charge(id, size)?;
            if let Some(counter) = counter {
                counters.insert(id, counter);
            }
        }
        let shared = Arc::new(builder.finish()?);

        log::debug!(
            "generated {} runtime stubs ({} of {} code bytes)",
            StubId::COUNT,
            budget.used,
            budget.limit
        );
        EntryTable::from_blobs(
            vec![uncommon_trap, exception, shared],
            natives,
            self.signatures,
            counters,
        )
    }

    /// Host ISA, adapted to the configured optimization level
    fn host_isa(&self) -> Result<OwnedTargetIsa, StubError> {
        const STUB: &str = "host_isa";

        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", self.config.opt_level.as_setting())
            .map_err(|e| StubError::generation(STUB, format!("Failed to set opt_level: {}", e)))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| StubError::generation(STUB, format!("Failed to set is_pic: {}", e)))?;
        let verify = if self.config.verify { "true" } else { "false" };
        flag_builder
            .set("enable_verifier", verify)
            .map_err(|e| StubError::generation(STUB, format!("Failed to set enable_verifier: {}", e)))?;

        let flags = settings::Flags::new(flag_builder);
        let isa = cranelift_native::builder()
            .map_err(|e| StubError::generation(STUB, format!("Failed to create native ISA builder: {}", e)))?
            .finish(flags)
            .map_err(|e| StubError::generation(STUB, format!("Failed to finish ISA: {}", e)))?;

        // References and the context layout assume 64-bit words
        match isa.triple().pointer_width() {
            Ok(PointerWidth::U64) => {}
            _ => {
                return Err(StubError::generation(
                    STUB,
                    format!("unsupported target {}: 64-bit pointers required", isa.triple()),
                ))
            }
        }
        log::debug!("generating runtime stubs for {}", isa.triple().architecture);
        Ok(isa)
    }
}

fn native_address(natives: &NativeImplTable, id: StubId) -> Result<usize, StubError> {
    natives
        .stub(id)
        .ok_or_else(|| StubError::generation(id.name(), "no native implementation registered"))
}

fn routine_address(natives: &NativeImplTable, routine: RuntimeRoutine) -> Result<usize, StubError> {
    natives
        .routine(routine)
        .ok_or_else(|| StubError::generation(routine.name(), "runtime routine not registered"))
}

/// Running total against `GeneratorConfig::code_buffer_size`
struct CodeBudget {
    limit: usize,
    used: usize,
}

impl CodeBudget {
    fn new(limit: usize) -> Self {
        CodeBudget { limit, used: 0 }
    }

    fn charge(&mut self, id: StubId, size: usize) -> Result<(), StubError> {
        self.used += size;
        if self.used > self.limit {
            return Err(StubError::generation(
                id.name(),
                format!(
                    "code buffer exhausted ({} bytes needed, {} available)",
                    self.used, self.limit
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_budget_names_overflowing_stub() {
        let mut budget = CodeBudget::new(100);
        assert!(budget.charge(StubId::NewArray, 60).is_ok());
        let err = budget.charge(StubId::DSin, 60).unwrap_err();
        assert_eq!(err.failed_stub(), Some("dsin"));
        assert!(err.to_string().contains("code buffer exhausted"));
    }

    #[test]
    fn test_missing_native_names_stub() {
        let mut natives = NativeImplTable::runtime_defaults();
        natives.remove(StubId::MonitorNotify);
        let err = native_address(&natives, StubId::MonitorNotify).unwrap_err();
        assert_eq!(err.failed_stub(), Some("monitor_notify"));
    }
}
