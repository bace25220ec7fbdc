// Persisted workflow state: the per-database record and its store.

pub mod record;
pub mod store;

pub use record::{IdList, StateRecord, WorkflowState};
pub use store::{FileStateStore, StateStore, StateStoreError};
