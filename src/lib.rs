// dbsnap-verify - Automated RDS Snapshot Restore Verification
// This exposes the core components for testing and integration

pub mod config;
pub mod dispatcher;
pub mod rds;
pub mod state;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use crate::config::{StateConfig, VerifierConfig, WatchConfig};
pub use crate::dispatcher::{DispatchError, DispatchOutcome, Dispatcher, SessionProvider};
pub use crate::rds::{
    InstanceDescriptor, InstanceEndpoint, InstanceStatus, RdsActions, RdsError, SnapshotDescriptor,
};
pub use crate::state::record::{IdList, StateRecord, WorkflowState};
pub use crate::state::store::{FileStateStore, StateStore, StateStoreError};
pub use crate::telemetry::init_telemetry;
pub use crate::workflow::checks::{CheckError, NoChecks, Verdict, VerificationSuite};
pub use crate::workflow::{Step, Workflow, WorkflowError};
