// Abstracted RDS collaborator: the workflow core observes and pokes the cloud
// exclusively through the `RdsActions` trait.

#[cfg(feature = "aws")]
pub mod aws;
pub mod mock;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distr::{Alphanumeric, SampleString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RdsError {
    #[error("RDS {operation} call failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("RDS {operation} returned a malformed response: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },
}

impl RdsError {
    pub fn api(operation: &'static str, err: impl fmt::Display) -> Self {
        RdsError::Api {
            operation,
            message: err.to_string(),
        }
    }
}

/// Most recent point-in-time backup of a source database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDescriptor {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Available,
    Creating,
    Modifying,
    Deleting,
    Other(String),
}

impl InstanceStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, InstanceStatus::Available)
    }
}

impl From<&str> for InstanceStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "available" => InstanceStatus::Available,
            "creating" => InstanceStatus::Creating,
            "modifying" => InstanceStatus::Modifying,
            "deleting" => InstanceStatus::Deleting,
            other => InstanceStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Available => f.write_str("available"),
            InstanceStatus::Creating => f.write_str("creating"),
            InstanceStatus::Modifying => f.write_str("modifying"),
            InstanceStatus::Deleting => f.write_str("deleting"),
            InstanceStatus::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEndpoint {
    pub address: String,
    pub port: u16,
}

/// Current shape of a database instance as the cloud reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub id: String,
    pub arn: String,
    pub status: InstanceStatus,
    pub endpoint: Option<InstanceEndpoint>,
}

/// The cloud RDS operations the workflow needs. Sessions handed to the core
/// are already scoped to a region and carry their own retry policy.
#[async_trait]
pub trait RdsActions: Send + Sync {
    /// Most recent snapshot of the source database, `None` if it has none.
    async fn latest_snapshot(
        &self,
        database: &str,
    ) -> Result<Option<SnapshotDescriptor>, RdsError>;

    /// Describe an instance, `None` if it does not exist.
    async fn describe_instance(
        &self,
        instance: &str,
    ) -> Result<Option<InstanceDescriptor>, RdsError>;

    /// Begin an async restore of `snapshot` into `target_instance`.
    async fn restore_from_snapshot(
        &self,
        snapshot: &str,
        target_instance: &str,
        subnet_ids: &[String],
    ) -> Result<(), RdsError>;

    /// Begin async reconfiguration: reset the master password and attach the
    /// given security groups.
    async fn modify_instance(
        &self,
        instance: &str,
        new_password: &str,
        security_group_ids: &[String],
    ) -> Result<(), RdsError>;

    /// Recent lifecycle event messages for an instance.
    async fn recent_event_messages(&self, instance: &str) -> Result<Vec<String>, RdsError>;

    /// Begin async teardown of an instance.
    async fn destroy_instance(&self, instance: &str, arn: &str) -> Result<(), RdsError>;

    /// Remove the scratch subnet group created for a restore.
    async fn destroy_subnet_group(&self, group: &str) -> Result<(), RdsError>;
}

/// Fresh master password for the scratch instance. Held only transiently in
/// the state record between `modify` and `cleanup`.
pub fn generate_master_password() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 32)
}
