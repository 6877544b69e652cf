//! Startup sequencing
//!
//! Stub generation runs exactly once, before any compiled code executes.
//! Failure is fatal: compiled code cannot run without the complete stub set.

use crate::codegen::StubGenerator;
use crate::config::GeneratorConfig;
use crate::entry_table::EntryTable;
use crate::error::StubError;
use crate::stubs::natives::NativeImplTable;

/// Generate every stub and install the process-wide entry table.
///
/// Nothing is installed on failure. Returns `AlreadyInitialized` if a table
/// is already installed.
pub fn initialize(
    natives: &NativeImplTable,
    config: GeneratorConfig,
) -> Result<&'static EntryTable, StubError> {
    if EntryTable::installed().is_some() {
        return Err(StubError::AlreadyInitialized);
    }
    let table = StubGenerator::new(config).generate(natives)?;
    let installed = EntryTable::install(table).map_err(|_| StubError::AlreadyInitialized)?;
    log::info!("installed {} runtime stubs", installed.len());
    Ok(installed)
}

/// [`initialize`], terminating the process with a diagnostic naming the
/// failed stub on error
pub fn initialize_or_exit(natives: &NativeImplTable, config: GeneratorConfig) -> &'static EntryTable {
    match initialize(natives, config) {
        Ok(table) => table,
        Err(e) => {
            log::error!("runtime stub initialization failed: {}", e);
            match e.failed_stub() {
                Some(stub) => eprintln!("fatal: could not generate runtime stub '{}': {}", stub, e),
                None => eprintln!("fatal: {}", e),
            }
            std::process::exit(1);
        }
    }
}
