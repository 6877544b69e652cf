//! Native implementation addresses handed to the stub generator
//!
//! Every catalog stub needs exactly one native address; the two multi-path
//! blobs and every throwing bridge additionally call the runtime routines
//! listed in [`RuntimeRoutine`]. The generator fails, naming the stub, if
//! any address it needs is missing.

use rustc_hash::FxHashMap;

use super::catalog::StubId;
use crate::runtime::natives as rt;

/// Runtime routines called from generated code that are not stubs themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeRoutine {
    /// Exception continuation of throwing bridges: `(ctx) -> ()`
    ForwardException,
    /// Second call of the uncommon-trap blob: `(frame_count, ctx) -> address`
    UnpackFrames,
}

impl RuntimeRoutine {
    /// All routines
    pub const ALL: [RuntimeRoutine; 2] = [RuntimeRoutine::ForwardException, RuntimeRoutine::UnpackFrames];

    /// Routine name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            RuntimeRoutine::ForwardException => "forward_exception",
            RuntimeRoutine::UnpackFrames => "unpack_frames",
        }
    }
}

/// Stub id and runtime routine to native address mapping
#[derive(Debug, Clone, Default)]
pub struct NativeImplTable {
    stubs: FxHashMap<StubId, usize>,
    routines: FxHashMap<RuntimeRoutine, usize>,
}

impl NativeImplTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pointing every stub and routine at the defaults in
    /// `runtime::natives`
    pub fn runtime_defaults() -> Self {
        let mut table = NativeImplTable::new();
        for &id in StubId::all() {
            table.set(id, default_native(id));
        }
        table.set_routine(RuntimeRoutine::ForwardException, rt::forward_exception as *const () as usize);
        table.set_routine(RuntimeRoutine::UnpackFrames, rt::unpack_frames as *const () as usize);
        table
    }

    /// Point `id` at `address`
    pub fn set(&mut self, id: StubId, address: usize) -> &mut Self {
        self.stubs.insert(id, address);
        self
    }

    /// Drop the address for `id`
    pub fn remove(&mut self, id: StubId) -> Option<usize> {
        self.stubs.remove(&id)
    }

    /// Native address for `id`
    pub fn stub(&self, id: StubId) -> Option<usize> {
        self.stubs.get(&id).copied()
    }

    /// Point `routine` at `address`
    pub fn set_routine(&mut self, routine: RuntimeRoutine, address: usize) -> &mut Self {
        self.routines.insert(routine, address);
        self
    }

    /// Drop the address for `routine`
    pub fn remove_routine(&mut self, routine: RuntimeRoutine) -> Option<usize> {
        self.routines.remove(&routine)
    }

    /// Address of `routine`
    pub fn routine(&self, routine: RuntimeRoutine) -> Option<usize> {
        self.routines.get(&routine).copied()
    }
}

fn default_native(id: StubId) -> usize {
    match id {
        StubId::UncommonTrap => rt::fetch_unroll_info as *const () as usize,
        StubId::ExceptionBlob => rt::handle_exception as *const () as usize,
        StubId::NewInstance => rt::new_instance as *const () as usize,
        StubId::NewArray => rt::new_array as *const () as usize,
        StubId::NewArrayNozero => rt::new_array_nozero as *const () as usize,
        StubId::MultiNewArray2 => rt::multi_new_array2 as *const () as usize,
        StubId::MultiNewArray3 => rt::multi_new_array3 as *const () as usize,
        StubId::MultiNewArray4 => rt::multi_new_array4 as *const () as usize,
        StubId::MultiNewArray5 => rt::multi_new_array5 as *const () as usize,
        StubId::MultiNewArrayN => rt::multi_new_array_n as *const () as usize,
        StubId::CompleteMonitorLocking => rt::complete_monitor_locking as *const () as usize,
        StubId::CompleteMonitorUnlocking => rt::complete_monitor_unlocking as *const () as usize,
        StubId::MonitorNotify => rt::monitor_notify as *const () as usize,
        StubId::MonitorNotifyAll => rt::monitor_notify_all as *const () as usize,
        StubId::Rethrow => rt::rethrow as *const () as usize,
        StubId::ThrowNullException => rt::throw_null_exception as *const () as usize,
        StubId::ThrowDiv0Exception => rt::throw_div0_exception as *const () as usize,
        StubId::ThrowStackOverflow => rt::throw_stack_overflow as *const () as usize,
        StubId::SlowArraycopy => rt::slow_arraycopy as *const () as usize,
        StubId::RegisterFinalizer => rt::register_finalizer as *const () as usize,
        #[cfg(feature = "inline-values")]
        StubId::LoadUnknownInline => rt::load_unknown_inline as *const () as usize,
        #[cfg(feature = "inline-values")]
        StubId::StoreUnknownInline => rt::store_unknown_inline as *const () as usize,
        StubId::DSin => rt::dsin as *const () as usize,
        StubId::DCos => rt::dcos as *const () as usize,
        StubId::DTan => rt::dtan as *const () as usize,
        StubId::DLog => rt::dlog as *const () as usize,
        StubId::DLog10 => rt::dlog10 as *const () as usize,
        StubId::DExp => rt::dexp as *const () as usize,
        StubId::DPow => rt::dpow as *const () as usize,
        StubId::DMod => rt::dmod as *const () as usize,
        StubId::UpdateBytesCrc32 => rt::update_bytes_crc32 as *const () as usize,
        StubId::Sha1Compress => rt::sha1_compress as *const () as usize,
        StubId::Sha256Compress => rt::sha256_compress as *const () as usize,
        StubId::Sha512Compress => rt::sha512_compress as *const () as usize,
        StubId::StringIndexOf => rt::string_index_of as *const () as usize,
        #[cfg(feature = "trace-stubs")]
        StubId::NotifyTaskStart => rt::notify_task_start as *const () as usize,
        #[cfg(feature = "trace-stubs")]
        StubId::NotifyTaskEnd => rt::notify_task_end as *const () as usize,
        #[cfg(feature = "trace-stubs")]
        StubId::NotifyTaskMount => rt::notify_task_mount as *const () as usize,
        #[cfg(feature = "trace-stubs")]
        StubId::NotifyTaskUnmount => rt::notify_task_unmount as *const () as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_catalog() {
        let table = NativeImplTable::runtime_defaults();
        for &id in StubId::all() {
            let address = table.stub(id);
            assert!(matches!(address, Some(a) if a != 0), "{} has no native", id);
        }
        for routine in RuntimeRoutine::ALL {
            assert!(table.routine(routine).is_some(), "{} missing", routine.name());
        }
    }

    #[test]
    fn test_remove_single_stub() {
        let mut table = NativeImplTable::runtime_defaults();
        assert!(table.remove(StubId::DSin).is_some());
        assert_eq!(table.stub(StubId::DSin), None);
        assert!(table.stub(StubId::DCos).is_some());
    }
}
