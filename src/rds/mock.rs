// Mock implementations for testing - no side effects

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dispatcher::SessionProvider;
use crate::rds::{
    InstanceDescriptor, InstanceStatus, RdsActions, RdsError, SnapshotDescriptor,
};

/// Every mutating or observing call a workflow issued, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RdsCall {
    LatestSnapshot {
        database: String,
    },
    DescribeInstance {
        instance: String,
    },
    RestoreFromSnapshot {
        snapshot: String,
        target_instance: String,
        subnet_ids: Vec<String>,
    },
    ModifyInstance {
        instance: String,
        new_password: String,
        security_group_ids: Vec<String>,
    },
    RecentEventMessages {
        instance: String,
    },
    DestroyInstance {
        instance: String,
        arn: String,
    },
    DestroySubnetGroup {
        group: String,
    },
}

/// Scriptable RDS stand-in that records every issued call.
#[derive(Debug, Default)]
pub struct MockRdsActions {
    latest_snapshots: Mutex<HashMap<String, SnapshotDescriptor>>,
    instances: Mutex<HashMap<String, InstanceDescriptor>>,
    event_messages: Mutex<HashMap<String, Vec<String>>>,
    issued_calls: Mutex<Vec<RdsCall>>,
    fail_with: Mutex<Option<String>>,
}

impl MockRdsActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest_snapshot(&self, database: &str, snapshot_id: &str) {
        self.latest_snapshots.lock().unwrap().insert(
            database.to_string(),
            SnapshotDescriptor {
                id: snapshot_id.to_string(),
                created_at: None,
            },
        );
    }

    pub fn clear_latest_snapshot(&self, database: &str) {
        self.latest_snapshots.lock().unwrap().remove(database);
    }

    pub fn set_instance(&self, instance: &str, status: InstanceStatus) {
        self.instances.lock().unwrap().insert(
            instance.to_string(),
            InstanceDescriptor {
                id: instance.to_string(),
                arn: format!("arn:aws:rds:mock:000000000000:db:{instance}"),
                status,
                endpoint: None,
            },
        );
    }

    pub fn remove_instance(&self, instance: &str) {
        self.instances.lock().unwrap().remove(instance);
    }

    pub fn set_event_messages(&self, instance: &str, messages: Vec<String>) {
        self.event_messages
            .lock()
            .unwrap()
            .insert(instance.to_string(), messages);
    }

    /// Make every subsequent call fail, simulating an API outage.
    pub fn fail_all(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    /// End a simulated outage.
    pub fn clear_fail(&self) {
        *self.fail_with.lock().unwrap() = None;
    }

    pub fn issued_calls(&self) -> Vec<RdsCall> {
        self.issued_calls.lock().unwrap().clone()
    }

    pub fn clear_issued_calls(&self) {
        self.issued_calls.lock().unwrap().clear();
    }

    fn record(&self, call: RdsCall) -> Result<(), RdsError> {
        self.issued_calls.lock().unwrap().push(call);
        match self.fail_with.lock().unwrap().as_ref() {
            Some(message) => Err(RdsError::Api {
                operation: "Mock",
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RdsActions for MockRdsActions {
    async fn latest_snapshot(
        &self,
        database: &str,
    ) -> Result<Option<SnapshotDescriptor>, RdsError> {
        self.record(RdsCall::LatestSnapshot {
            database: database.to_string(),
        })?;
        Ok(self.latest_snapshots.lock().unwrap().get(database).cloned())
    }

    async fn describe_instance(
        &self,
        instance: &str,
    ) -> Result<Option<InstanceDescriptor>, RdsError> {
        self.record(RdsCall::DescribeInstance {
            instance: instance.to_string(),
        })?;
        Ok(self.instances.lock().unwrap().get(instance).cloned())
    }

    async fn restore_from_snapshot(
        &self,
        snapshot: &str,
        target_instance: &str,
        subnet_ids: &[String],
    ) -> Result<(), RdsError> {
        self.record(RdsCall::RestoreFromSnapshot {
            snapshot: snapshot.to_string(),
            target_instance: target_instance.to_string(),
            subnet_ids: subnet_ids.to_vec(),
        })
    }

    async fn modify_instance(
        &self,
        instance: &str,
        new_password: &str,
        security_group_ids: &[String],
    ) -> Result<(), RdsError> {
        self.record(RdsCall::ModifyInstance {
            instance: instance.to_string(),
            new_password: new_password.to_string(),
            security_group_ids: security_group_ids.to_vec(),
        })
    }

    async fn recent_event_messages(&self, instance: &str) -> Result<Vec<String>, RdsError> {
        self.record(RdsCall::RecentEventMessages {
            instance: instance.to_string(),
        })?;
        Ok(self
            .event_messages
            .lock()
            .unwrap()
            .get(instance)
            .cloned()
            .unwrap_or_default())
    }

    async fn destroy_instance(&self, instance: &str, arn: &str) -> Result<(), RdsError> {
        self.record(RdsCall::DestroyInstance {
            instance: instance.to_string(),
            arn: arn.to_string(),
        })
    }

    async fn destroy_subnet_group(&self, group: &str) -> Result<(), RdsError> {
        self.record(RdsCall::DestroySubnetGroup {
            group: group.to_string(),
        })
    }
}

#[async_trait]
impl RdsActions for Arc<MockRdsActions> {
    async fn latest_snapshot(
        &self,
        database: &str,
    ) -> Result<Option<SnapshotDescriptor>, RdsError> {
        MockRdsActions::latest_snapshot(self, database).await
    }

    async fn describe_instance(
        &self,
        instance: &str,
    ) -> Result<Option<InstanceDescriptor>, RdsError> {
        MockRdsActions::describe_instance(self, instance).await
    }

    async fn restore_from_snapshot(
        &self,
        snapshot: &str,
        target_instance: &str,
        subnet_ids: &[String],
    ) -> Result<(), RdsError> {
        MockRdsActions::restore_from_snapshot(self, snapshot, target_instance, subnet_ids).await
    }

    async fn modify_instance(
        &self,
        instance: &str,
        new_password: &str,
        security_group_ids: &[String],
    ) -> Result<(), RdsError> {
        MockRdsActions::modify_instance(self, instance, new_password, security_group_ids).await
    }

    async fn recent_event_messages(&self, instance: &str) -> Result<Vec<String>, RdsError> {
        MockRdsActions::recent_event_messages(self, instance).await
    }

    async fn destroy_instance(&self, instance: &str, arn: &str) -> Result<(), RdsError> {
        MockRdsActions::destroy_instance(self, instance, arn).await
    }

    async fn destroy_subnet_group(&self, group: &str) -> Result<(), RdsError> {
        MockRdsActions::destroy_subnet_group(self, group).await
    }
}

/// Session provider that hands out clones of one shared mock session and
/// records which regions were requested.
#[derive(Debug, Default)]
pub struct MockSessionProvider {
    session: Arc<MockRdsActions>,
    opened_regions: Mutex<Vec<String>>,
}

impl MockSessionProvider {
    pub fn new(session: Arc<MockRdsActions>) -> Self {
        Self {
            session,
            opened_regions: Mutex::new(Vec::new()),
        }
    }

    pub fn opened_regions(&self) -> Vec<String> {
        self.opened_regions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionProvider for MockSessionProvider {
    type Session = Arc<MockRdsActions>;

    async fn open(&self, region: &str) -> Result<Self::Session, RdsError> {
        self.opened_regions.lock().unwrap().push(region.to_string());
        Ok(self.session.clone())
    }
}
