// Live RDS collaborator built on the AWS SDK. The session owns everything
// the workflow is not allowed to care about: credentials, retries, and the
// subnet-group-before-restore mechanics.

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_rds::error::DisplayErrorContext;
use aws_sdk_rds::types::SourceType;
use aws_sdk_rds::Client;
use chrono::DateTime;
use tracing::{debug, info};

use crate::dispatcher::SessionProvider;
use crate::rds::{
    InstanceDescriptor, InstanceEndpoint, InstanceStatus, RdsActions, RdsError, SnapshotDescriptor,
};

/// Events from the last hour are enough to catch the credential-reset marker.
const EVENT_WINDOW_MINUTES: i32 = 60;

/// Region-scoped RDS session with a 3-attempt retry policy, matching what the
/// workflow expects from its collaborator: transient API failures are retried
/// here, never inside handlers.
#[derive(Debug, Clone)]
pub struct AwsRdsActions {
    client: Client,
}

impl AwsRdsActions {
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .retry_config(RetryConfig::standard().with_max_attempts(3))
            .load()
            .await;
        Self {
            client: Client::new(&config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RdsActions for AwsRdsActions {
    async fn latest_snapshot(
        &self,
        database: &str,
    ) -> Result<Option<SnapshotDescriptor>, RdsError> {
        // A database with no snapshots (or no database at all) comes back as
        // an empty list, not an error.
        let resp = self
            .client
            .describe_db_snapshots()
            .db_instance_identifier(database)
            .send()
            .await
            .map_err(|err| RdsError::api("DescribeDBSnapshots", DisplayErrorContext(err)))?;
        let latest = resp
            .db_snapshots()
            .iter()
            .filter(|snap| snap.db_snapshot_identifier().is_some())
            .max_by_key(|snap| {
                snap.snapshot_create_time()
                    .map(|time| (time.secs(), time.subsec_nanos()))
            });
        Ok(latest.map(|snap| SnapshotDescriptor {
            id: snap
                .db_snapshot_identifier()
                .unwrap_or_default()
                .to_string(),
            created_at: snap.snapshot_create_time().and_then(|time| {
                DateTime::from_timestamp(time.secs(), time.subsec_nanos())
            }),
        }))
    }

    async fn describe_instance(
        &self,
        instance: &str,
    ) -> Result<Option<InstanceDescriptor>, RdsError> {
        let resp = match self
            .client
            .describe_db_instances()
            .db_instance_identifier(instance)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_db_instance_not_found_fault() {
                    return Ok(None);
                }
                return Err(RdsError::api(
                    "DescribeDBInstances",
                    DisplayErrorContext(service_err),
                ));
            }
        };
        let Some(inst) = resp.db_instances().first() else {
            return Ok(None);
        };
        let id = inst.db_instance_identifier().ok_or_else(|| {
            RdsError::MalformedResponse {
                operation: "DescribeDBInstances",
                reason: "instance entry without an identifier".to_string(),
            }
        })?;
        let status = inst
            .db_instance_status()
            .map(InstanceStatus::from)
            .unwrap_or_else(|| InstanceStatus::Other("unknown".to_string()));
        Ok(Some(InstanceDescriptor {
            id: id.to_string(),
            arn: inst.db_instance_arn().unwrap_or_default().to_string(),
            status,
            endpoint: inst.endpoint().and_then(|endpoint| {
                Some(InstanceEndpoint {
                    address: endpoint.address()?.to_string(),
                    port: u16::try_from(endpoint.port()?).ok()?,
                })
            }),
        }))
    }

    async fn restore_from_snapshot(
        &self,
        snapshot: &str,
        target_instance: &str,
        subnet_ids: &[String],
    ) -> Result<(), RdsError> {
        // The scratch instance needs its own subnet group; name it after the
        // instance so cleanup can find it. Tolerate already-exists so a
        // re-issued restore stays idempotent.
        let created = self
            .client
            .create_db_subnet_group()
            .db_subnet_group_name(target_instance)
            .db_subnet_group_description(format!("scratch subnet group for {target_instance}"))
            .set_subnet_ids(Some(subnet_ids.to_vec()))
            .send()
            .await;
        if let Err(err) = created {
            let service_err = err.into_service_error();
            if !service_err.is_db_subnet_group_already_exists_fault() {
                return Err(RdsError::api(
                    "CreateDBSubnetGroup",
                    DisplayErrorContext(service_err),
                ));
            }
            debug!(
                subnet_group = %target_instance,
                "subnet group already exists, reusing it"
            );
        }

        info!(
            snapshot = %snapshot,
            target_instance = %target_instance,
            "starting restore from snapshot"
        );
        self.client
            .restore_db_instance_from_db_snapshot()
            .db_instance_identifier(target_instance)
            .db_snapshot_identifier(snapshot)
            .db_subnet_group_name(target_instance)
            .send()
            .await
            .map_err(|err| {
                RdsError::api("RestoreDBInstanceFromDBSnapshot", DisplayErrorContext(err))
            })?;
        Ok(())
    }

    async fn modify_instance(
        &self,
        instance: &str,
        new_password: &str,
        security_group_ids: &[String],
    ) -> Result<(), RdsError> {
        self.client
            .modify_db_instance()
            .db_instance_identifier(instance)
            .master_user_password(new_password)
            .set_vpc_security_group_ids(Some(security_group_ids.to_vec()))
            .apply_immediately(true)
            .send()
            .await
            .map_err(|err| RdsError::api("ModifyDBInstance", DisplayErrorContext(err)))?;
        Ok(())
    }

    async fn recent_event_messages(&self, instance: &str) -> Result<Vec<String>, RdsError> {
        let resp = self
            .client
            .describe_events()
            .source_identifier(instance)
            .source_type(SourceType::DbInstance)
            .duration(EVENT_WINDOW_MINUTES)
            .send()
            .await
            .map_err(|err| RdsError::api("DescribeEvents", DisplayErrorContext(err)))?;
        Ok(resp
            .events()
            .iter()
            .filter_map(|event| event.message().map(String::from))
            .collect())
    }

    async fn destroy_instance(&self, instance: &str, arn: &str) -> Result<(), RdsError> {
        info!(instance = %instance, arn = %arn, "destroying temporary instance");
        let deleted = self
            .client
            .delete_db_instance()
            .db_instance_identifier(instance)
            .skip_final_snapshot(true)
            .delete_automated_backups(true)
            .send()
            .await;
        if let Err(err) = deleted {
            let service_err = err.into_service_error();
            // Already gone counts as done.
            if !service_err.is_db_instance_not_found_fault() {
                return Err(RdsError::api(
                    "DeleteDBInstance",
                    DisplayErrorContext(service_err),
                ));
            }
        }
        Ok(())
    }

    async fn destroy_subnet_group(&self, group: &str) -> Result<(), RdsError> {
        let deleted = self
            .client
            .delete_db_subnet_group()
            .db_subnet_group_name(group)
            .send()
            .await;
        if let Err(err) = deleted {
            let service_err = err.into_service_error();
            if !service_err.is_db_subnet_group_not_found_fault() {
                return Err(RdsError::api(
                    "DeleteDBSubnetGroup",
                    DisplayErrorContext(service_err),
                ));
            }
        }
        Ok(())
    }
}

/// Opens one live session per region on demand.
#[derive(Debug, Default, Clone, Copy)]
pub struct AwsSessionProvider;

#[async_trait]
impl SessionProvider for AwsSessionProvider {
    type Session = AwsRdsActions;

    async fn open(&self, region: &str) -> Result<Self::Session, RdsError> {
        debug!(region = %region, "opening RDS session");
        Ok(AwsRdsActions::connect(region).await)
    }
}
