//! Local store bookkeeping

pub mod organize;
pub mod registry;

pub use registry::{CustomMetadata, StoreError, StoreRegistry, StoreSummary, StoredFile};
