//! Table of generated stub entry points
//!
//! Built once by the generator and then read without synchronization from any
//! number of compiler and execution threads. Entries are indexed densely by
//! `StubId`; the blobs that own the code are kept alive by the table.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

use crate::codegen::blob::CodeBlob;
use crate::error::StubError;
use crate::profiling::counters::NamedCounter;
use crate::stubs::catalog::{Continuation, StubFlags, StubId};
use crate::stubs::natives::NativeImplTable;
use crate::stubs::signature::{CallSignature, SignatureRegistry};

/// Generated entry of one stub
#[derive(Debug)]
pub struct StubEntry {
    /// Stub identity
    pub id: StubId,
    /// Address compiled code calls
    pub entry: usize,
    /// Native implementation the bridge calls
    pub native: usize,
    /// Calling-convention signature at the entry
    pub signature: Arc<CallSignature>,
    /// Generation flags
    pub flags: StubFlags,
    /// Control transfer at the end of the bridge
    pub continuation: Continuation,
    /// Call counter bumped on entry, when enabled
    pub counter: Option<Arc<NamedCounter>>,
    blob: Arc<CodeBlob>,
}

impl StubEntry {
    /// Entry address
    pub fn entry_address(&self) -> usize {
        self.entry
    }

    /// Blob holding this stub's code
    pub fn blob(&self) -> &Arc<CodeBlob> {
        &self.blob
    }

    /// Stub name
    pub fn name(&self) -> &'static str {
        self.id.name()
    }
}

/// Read-only map from stub id to generated entry
#[derive(Debug)]
pub struct EntryTable {
    entries: Vec<StubEntry>,
    blobs: Vec<Arc<CodeBlob>>,
}

static INSTALLED: OnceCell<EntryTable> = OnceCell::new();

impl EntryTable {
    /// Assemble the table from finalized blobs; every catalog stub must be
    /// present in exactly one blob
    pub(crate) fn from_blobs(
        blobs: Vec<Arc<CodeBlob>>,
        natives: &NativeImplTable,
        signatures: &SignatureRegistry,
        mut counters: FxHashMap<StubId, Arc<NamedCounter>>,
    ) -> Result<Self, StubError> {
        let mut located: FxHashMap<StubId, (usize, Arc<CodeBlob>)> = FxHashMap::default();
        for blob in &blobs {
            for routine in blob.routines() {
                located.insert(routine.id, (routine.code.start, blob.clone()));
            }
        }

        let mut entries = Vec::with_capacity(StubId::COUNT);
        for &id in StubId::all() {
            let (entry, blob) = located
                .remove(&id)
                .ok_or_else(|| StubError::generation(id.name(), "missing from generated blobs"))?;
            let info = id.info();
            entries.push(StubEntry {
                id,
                entry,
                native: natives.stub(id).unwrap_or(0),
                signature: signatures.signature(id),
                flags: info.flags,
                continuation: info.continuation,
                counter: counters.remove(&id),
                blob,
            });
        }
        Ok(EntryTable { entries, blobs })
    }

    /// The installed process-wide table, if startup has run
    pub fn installed() -> Option<&'static EntryTable> {
        INSTALLED.get()
    }

    /// Install the process-wide table; hands it back if one is already installed
    pub(crate) fn install(table: EntryTable) -> Result<&'static EntryTable, EntryTable> {
        INSTALLED.try_insert(table).map_err(|(_, table)| table)
    }

    /// Entry for `id`
    pub fn lookup(&self, id: StubId) -> &StubEntry {
        &self.entries[id.index()]
    }

    /// Entry address for `id`
    pub fn entry_address(&self, id: StubId) -> usize {
        self.lookup(id).entry
    }

    /// Entry for a raw index, `None` outside `[0, COUNT)`
    pub fn get(&self, index: i32) -> Option<&StubEntry> {
        usize::try_from(index).ok().and_then(|i| self.entries.get(i))
    }

    /// Blob whose code covers `pc`
    pub fn find_blob(&self, pc: usize) -> Option<&Arc<CodeBlob>> {
        self.blobs.iter().find(|b| b.contains(pc))
    }

    /// Name of the stub whose entry is exactly `address`
    pub fn stub_name_for(&self, address: usize) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|e| e.entry == address)
            .map(|e| e.id.name())
    }

    /// All blobs
    pub fn blobs(&self) -> &[Arc<CodeBlob>] {
        &self.blobs
    }

    /// Number of entries (always `StubId::COUNT`)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty (never, once built)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in index order
    pub fn iter(&self) -> impl Iterator<Item = &StubEntry> {
        self.entries.iter()
    }
}
