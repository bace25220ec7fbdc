use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::rds::InstanceDescriptor;

/// The checks themselves failed to execute (connection refused, bad check
/// config). Distinct from a check that ran and judged the data bad.
#[derive(Debug, Error)]
#[error("verification checks could not run: {reason}")]
pub struct CheckError {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { reason: String },
}

/// Pluggable verification step run against the restored instance once it is
/// reachable. Implementations connect to `instance.endpoint` and run whatever
/// queries `checks` configures; the workflow only cares about the verdict.
#[async_trait]
pub trait VerificationSuite: Send + Sync {
    async fn run_checks(
        &self,
        instance: &InstanceDescriptor,
        checks: Option<&serde_json::Value>,
    ) -> Result<Verdict, CheckError>;
}

/// Default suite: no SQL checks are wired in yet, so a reachable instance
/// counts as verified.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChecks;

#[async_trait]
impl VerificationSuite for NoChecks {
    async fn run_checks(
        &self,
        instance: &InstanceDescriptor,
        checks: Option<&serde_json::Value>,
    ) -> Result<Verdict, CheckError> {
        if checks.is_some() {
            warn!(
                instance = %instance.id,
                "verification checks are configured but no check suite is wired in, treating as passed"
            );
        } else {
            info!(
                instance = %instance.id,
                "no verification checks configured, treating as passed"
            );
        }
        Ok(Verdict::Pass)
    }
}
