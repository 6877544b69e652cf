//! Runtime stub catalog and calling conventions
//!
//! - `catalog`: the closed `StubId` set with per-stub metadata
//! - `types`: value kinds crossing the stub boundary
//! - `signature`: memoized `CallSignature`s per signature family
//! - `natives`: native implementation addresses the generator links against

pub mod catalog;
pub mod natives;
pub mod signature;
pub mod types;

pub use catalog::{stub_name, validate_catalog, BlobKind, CatalogIssue, StubInfo};
pub use signature::{DigestVariant, SignatureShape};
pub use types::LaneType;
