// Workflow state machine: one handler per state, driven one step per
// invocation. Handlers observe the cloud through `RdsActions`, mutate the
// record, and say whether the next handler's precondition is already met.

pub mod checks;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::rds::{self, RdsActions, RdsError};
use crate::state::record::{StateRecord, WorkflowState};
use crate::workflow::checks::{CheckError, Verdict, VerificationSuite};

/// Event-log marker proving the master-credential reset landed. Instance
/// status alone can read `available` before the modification takes effect.
pub const RESET_CREDENTIALS_MARKER: &str = "Reset master credentials";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Rds(#[from] RdsError),

    #[error(transparent)]
    Checks(#[from] CheckError),

    #[error("record for {database} is in state {state} without an in-flight snapshot")]
    MissingInFlightSnapshot {
        database: String,
        state: WorkflowState,
    },
}

/// What a handler decided about the rest of this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing further can happen until the next trigger event.
    Hold,
    /// The record moved to a state whose handler should run right now.
    Cascade,
}

/// Transition logic for one state record, bound to an already-configured RDS
/// session. Owns no state of its own; everything lives on the record.
pub struct Workflow<'a> {
    rds: &'a dyn RdsActions,
    checks: &'a dyn VerificationSuite,
}

impl<'a> Workflow<'a> {
    pub fn new(rds: &'a dyn RdsActions, checks: &'a dyn VerificationSuite) -> Self {
        Self { rds, checks }
    }

    /// Advance the record as far as current cloud facts allow.
    ///
    /// This is the explicit form of the handler-calls-next-handler trampoline:
    /// run the handler for `current_state`, and keep going while handlers
    /// cascade. The iteration bound is the number of defined states, so each
    /// handler runs at most once per invocation and termination is structural
    /// rather than a property of handler behavior.
    pub async fn step(&self, record: &mut StateRecord) -> Result<(), WorkflowError> {
        for _ in 0..WorkflowState::ALL.len() {
            // Every in-flight state carries the snapshot it is working on; a
            // record that lost it is corrupt and must not touch the cloud.
            if record.current_state.has_snapshot_in_flight()
                && record.snapshot_verifying.is_none()
            {
                return Err(WorkflowError::MissingInFlightSnapshot {
                    database: record.database.clone(),
                    state: record.current_state,
                });
            }
            let step = match record.current_state {
                WorkflowState::Wait => self.wait(record).await?,
                WorkflowState::Restore => self.restore(record).await?,
                WorkflowState::Modify => self.modify(record).await?,
                WorkflowState::Verify => self.verify(record).await?,
                WorkflowState::Cleanup => self.cleanup(record).await?,
                WorkflowState::Alarm => self.alarm(record).await?,
            };
            if step == Step::Hold {
                break;
            }
        }
        Ok(())
    }

    /// wait: watching for a snapshot we have not verified yet.
    async fn wait(&self, record: &mut StateRecord) -> Result<Step, WorkflowError> {
        let newer_than = record.snapshot_verified.as_deref().unwrap_or("any snapshot");
        info!(
            database = %record.database,
            newer_than = %newer_than,
            "looking for a new snapshot"
        );
        let Some(snapshot) = self.rds.latest_snapshot(&record.database).await? else {
            debug!(database = %record.database, "database has no snapshots yet, going back to sleep");
            return Ok(Step::Hold);
        };
        // "Newer" is pure identifier inequality against the last verified
        // snapshot; the event source is trusted for ordering, not the clock.
        if record.snapshot_verified.as_deref() == Some(snapshot.id.as_str()) {
            info!(
                database = %record.database,
                snapshot = %snapshot.id,
                "latest snapshot is already verified, going back to sleep"
            );
            return Ok(Step::Hold);
        }
        info!(
            database = %record.database,
            snapshot = %snapshot.id,
            created_at = ?snapshot.created_at,
            "found a snapshot to verify"
        );
        record.snapshot_verifying = Some(snapshot.id);
        record.transition(WorkflowState::Restore);
        Ok(Step::Cascade)
    }

    /// restore: a copy of the snapshot is being restored into the scratch
    /// instance. The restore call is fire-and-forget; progress comes from
    /// re-invocation, never from polling here.
    async fn restore(&self, record: &mut StateRecord) -> Result<Step, WorkflowError> {
        match self.rds.describe_instance(&record.temporary_database).await? {
            None => {
                let snapshot = self.snapshot_in_flight(record)?;
                info!(
                    database = %record.database,
                    snapshot = %snapshot,
                    temporary_database = %record.temporary_database,
                    "restoring snapshot into temporary instance"
                );
                self.rds
                    .restore_from_snapshot(
                        &snapshot,
                        &record.temporary_database,
                        record.subnet_ids.as_slice(),
                    )
                    .await?;
                Ok(Step::Hold)
            }
            Some(desc) if desc.status.is_available() => {
                record.transition(WorkflowState::Modify);
                Ok(Step::Cascade)
            }
            Some(desc) => {
                debug!(
                    temporary_database = %record.temporary_database,
                    status = %desc.status,
                    "temporary instance is not ready yet"
                );
                Ok(Step::Hold)
            }
        }
    }

    /// modify: reconfigure the scratch instance so the verifier can reach it.
    async fn modify(&self, record: &mut StateRecord) -> Result<Step, WorkflowError> {
        info!(
            temporary_database = %record.temporary_database,
            "resetting master password and attaching security groups"
        );
        let password = rds::generate_master_password();
        self.rds
            .modify_instance(
                &record.temporary_database,
                &password,
                record.security_group_ids.as_slice(),
            )
            .await?;
        record.temporary_password = Some(password);
        record.transition(WorkflowState::Verify);
        Ok(Step::Cascade)
    }

    /// verify: run checks once the credential reset has demonstrably landed.
    async fn verify(&self, record: &mut StateRecord) -> Result<Step, WorkflowError> {
        let Some(desc) = self.rds.describe_instance(&record.temporary_database).await? else {
            warn!(
                temporary_database = %record.temporary_database,
                "temporary instance disappeared while waiting to verify"
            );
            return Ok(Step::Hold);
        };
        let messages = self
            .rds
            .recent_event_messages(&record.temporary_database)
            .await?;
        let reset_landed = messages
            .iter()
            .any(|message| message.contains(RESET_CREDENTIALS_MARKER));
        if !(reset_landed && desc.status.is_available()) {
            debug!(
                temporary_database = %record.temporary_database,
                status = %desc.status,
                reset_landed = reset_landed,
                "temporary instance is not ready for verification yet"
            );
            return Ok(Step::Hold);
        }
        match self
            .checks
            .run_checks(&desc, record.verification_checks.as_ref())
            .await?
        {
            Verdict::Pass => {
                info!(
                    database = %record.database,
                    snapshot = ?record.snapshot_verifying,
                    "verification passed"
                );
                record.transition(WorkflowState::Cleanup);
                Ok(Step::Cascade)
            }
            Verdict::Fail { reason } => {
                error!(
                    database = %record.database,
                    snapshot = ?record.snapshot_verifying,
                    reason = %reason,
                    "verification failed"
                );
                record.transition(WorkflowState::Alarm);
                Ok(Step::Cascade)
            }
        }
    }

    /// cleanup: tear down the scratch instance and everything created for it.
    /// The subnet group goes only after the instance is confirmed gone, so a
    /// full teardown takes two visits.
    async fn cleanup(&self, record: &mut StateRecord) -> Result<Step, WorkflowError> {
        match self.rds.describe_instance(&record.temporary_database).await? {
            None => {
                info!(
                    temporary_database = %record.temporary_database,
                    "cleaning subnet group and temporary credentials"
                );
                self.rds
                    .destroy_subnet_group(&record.temporary_database)
                    .await?;
                record.complete_cycle();
                record.transition(WorkflowState::Wait);
                // The next snapshot could appear tomorrow; wait for its event.
                Ok(Step::Hold)
            }
            Some(desc) if desc.status.is_available() => {
                info!(
                    temporary_database = %record.temporary_database,
                    "destroying temporary instance"
                );
                self.rds.destroy_instance(&desc.id, &desc.arn).await?;
                Ok(Step::Hold)
            }
            Some(desc) => {
                debug!(
                    temporary_database = %record.temporary_database,
                    status = %desc.status,
                    "temporary instance is still changing state, waiting to clean up"
                );
                Ok(Step::Hold)
            }
        }
    }

    /// alarm: a verification failed. Hold here until an operator acknowledges;
    /// a failed snapshot must never be torn down silently.
    async fn alarm(&self, record: &mut StateRecord) -> Result<Step, WorkflowError> {
        error!(
            database = %record.database,
            snapshot = ?record.snapshot_verifying,
            "verification failed, waiting for operator acknowledgment"
        );
        // TODO: page through CloudWatch alarms once an alerting channel exists.
        Ok(Step::Hold)
    }

    fn snapshot_in_flight(&self, record: &StateRecord) -> Result<String, WorkflowError> {
        record.snapshot_verifying.clone().ok_or_else(|| {
            WorkflowError::MissingInFlightSnapshot {
                database: record.database.clone(),
                state: record.current_state,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use crate::rds::mock::{MockRdsActions, RdsCall};
    use crate::rds::{InstanceDescriptor, InstanceStatus};
    use async_trait::async_trait;
    use super::checks::NoChecks;

    const TMP: &str = "dbsnap-verify-prod-db";

    fn record() -> StateRecord {
        let watch: WatchConfig = serde_json::from_value(serde_json::json!({
            "database": "prod-db",
            "region": "us-east-1",
            "subnet_ids": "subnet-a,subnet-b",
            "security_group_ids": "sg-1,sg-2",
        }))
        .unwrap();
        StateRecord::for_watch(&watch)
    }

    struct RejectEverything;

    #[async_trait]
    impl VerificationSuite for RejectEverything {
        async fn run_checks(
            &self,
            _instance: &InstanceDescriptor,
            _checks: Option<&serde_json::Value>,
        ) -> Result<Verdict, CheckError> {
            Ok(Verdict::Fail {
                reason: "row counts diverged".to_string(),
            })
        }
    }

    async fn step(rds: &MockRdsActions, record: &mut StateRecord) {
        Workflow::new(rds, &NoChecks).step(record).await.unwrap();
    }

    #[tokio::test]
    async fn wait_holds_when_no_snapshot_exists() {
        let rds = MockRdsActions::new();
        let mut record = record();
        step(&rds, &mut record).await;
        assert_eq!(record.current_state, WorkflowState::Wait);
        assert!(record.snapshot_verifying.is_none());
    }

    #[tokio::test]
    async fn wait_holds_when_latest_snapshot_is_already_verified() {
        let rds = MockRdsActions::new();
        rds.set_latest_snapshot("prod-db", "snap-1");
        let mut record = record();
        record.snapshot_verified = Some("snap-1".to_string());
        step(&rds, &mut record).await;
        assert_eq!(record.current_state, WorkflowState::Wait);
        assert!(record.snapshot_verifying.is_none());
    }

    #[tokio::test]
    async fn wait_chains_into_restore_for_a_new_snapshot() {
        let rds = MockRdsActions::new();
        rds.set_latest_snapshot("prod-db", "snap-2");
        let mut record = record();
        record.snapshot_verified = Some("snap-1".to_string());
        step(&rds, &mut record).await;

        assert_eq!(record.current_state, WorkflowState::Restore);
        assert_eq!(record.snapshot_verifying.as_deref(), Some("snap-2"));
        // The chained restore handler saw no instance and issued exactly one
        // restore with the normalized subnet list.
        let restores: Vec<_> = rds
            .issued_calls()
            .into_iter()
            .filter(|call| matches!(call, RdsCall::RestoreFromSnapshot { .. }))
            .collect();
        assert_eq!(
            restores,
            vec![RdsCall::RestoreFromSnapshot {
                snapshot: "snap-2".to_string(),
                target_instance: TMP.to_string(),
                subnet_ids: vec!["subnet-a".to_string(), "subnet-b".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn restore_is_idempotent_while_instance_is_creating() {
        let rds = MockRdsActions::new();
        rds.set_instance(TMP, InstanceStatus::Creating);
        let mut record = record();
        record.snapshot_verifying = Some("snap-2".to_string());
        record.current_state = WorkflowState::Restore;

        step(&rds, &mut record).await;
        let first = record.clone();
        step(&rds, &mut record).await;

        assert_eq!(record.current_state, WorkflowState::Restore);
        assert_eq!(record, first);
        assert!(rds
            .issued_calls()
            .iter()
            .all(|call| matches!(call, RdsCall::DescribeInstance { .. })));
    }

    #[tokio::test]
    async fn restore_chains_through_modify_once_instance_is_available() {
        let rds = MockRdsActions::new();
        rds.set_instance(TMP, InstanceStatus::Available);
        let mut record = record();
        record.snapshot_verifying = Some("snap-2".to_string());
        record.current_state = WorkflowState::Restore;

        step(&rds, &mut record).await;

        // restore -> modify -> verify; verify holds because the credential
        // reset has not shown up in the event log yet.
        assert_eq!(record.current_state, WorkflowState::Verify);
        let password = record.temporary_password.clone().expect("password persisted");
        assert!(rds.issued_calls().contains(&RdsCall::ModifyInstance {
            instance: TMP.to_string(),
            new_password: password,
            security_group_ids: vec!["sg-1".to_string(), "sg-2".to_string()],
        }));
    }

    #[tokio::test]
    async fn verify_requires_the_reset_marker_not_just_available_status() {
        let rds = MockRdsActions::new();
        rds.set_instance(TMP, InstanceStatus::Available);
        rds.set_event_messages(TMP, vec!["Backing up DB instance".to_string()]);
        let mut record = record();
        record.snapshot_verifying = Some("snap-2".to_string());
        record.temporary_password = Some("pw".to_string());
        record.current_state = WorkflowState::Verify;

        step(&rds, &mut record).await;

        assert_eq!(record.current_state, WorkflowState::Verify);
    }

    #[tokio::test]
    async fn verify_chains_into_cleanup_once_ready() {
        let rds = MockRdsActions::new();
        rds.set_instance(TMP, InstanceStatus::Available);
        rds.set_event_messages(TMP, vec!["Reset master credentials.".to_string()]);
        let mut record = record();
        record.snapshot_verifying = Some("snap-2".to_string());
        record.temporary_password = Some("pw".to_string());
        record.current_state = WorkflowState::Verify;

        step(&rds, &mut record).await;

        // Chained cleanup found the instance still available and issued its
        // destruction; the cycle finishes on a later visit.
        assert_eq!(record.current_state, WorkflowState::Cleanup);
        assert!(rds
            .issued_calls()
            .iter()
            .any(|call| matches!(call, RdsCall::DestroyInstance { .. })));
        assert!(record.temporary_password.is_some());
    }

    #[tokio::test]
    async fn failed_checks_route_to_alarm_and_hold_there() {
        let rds = MockRdsActions::new();
        rds.set_instance(TMP, InstanceStatus::Available);
        rds.set_event_messages(TMP, vec!["Reset master credentials.".to_string()]);
        let mut record = record();
        record.snapshot_verifying = Some("snap-2".to_string());
        record.current_state = WorkflowState::Verify;

        let suite = RejectEverything;
        let workflow = Workflow::new(&rds, &suite);
        workflow.step(&mut record).await.unwrap();
        assert_eq!(record.current_state, WorkflowState::Alarm);

        // A later invocation stays in alarm; nothing is torn down silently.
        workflow.step(&mut record).await.unwrap();
        assert_eq!(record.current_state, WorkflowState::Alarm);
        assert!(!rds
            .issued_calls()
            .iter()
            .any(|call| matches!(call, RdsCall::DestroyInstance { .. })));
    }

    #[tokio::test]
    async fn cleanup_completes_the_cycle_once_the_instance_is_gone() {
        let rds = MockRdsActions::new();
        let mut record = record();
        record.snapshot_verified = Some("snap-1".to_string());
        record.snapshot_verifying = Some("snap-2".to_string());
        record.temporary_password = Some("pw".to_string());
        record.current_state = WorkflowState::Cleanup;

        step(&rds, &mut record).await;

        assert_eq!(record.current_state, WorkflowState::Wait);
        assert_eq!(record.snapshot_verified.as_deref(), Some("snap-2"));
        assert!(record.snapshot_verifying.is_none());
        assert!(record.temporary_password.is_none());
        assert!(rds.issued_calls().contains(&RdsCall::DestroySubnetGroup {
            group: TMP.to_string(),
        }));
    }

    #[tokio::test]
    async fn cleanup_waits_while_the_instance_is_deleting() {
        let rds = MockRdsActions::new();
        rds.set_instance(TMP, InstanceStatus::Deleting);
        let mut record = record();
        record.snapshot_verifying = Some("snap-2".to_string());
        record.current_state = WorkflowState::Cleanup;

        step(&rds, &mut record).await;

        assert_eq!(record.current_state, WorkflowState::Cleanup);
        assert!(record.snapshot_verifying.is_some());
    }

    #[tokio::test]
    async fn restore_without_in_flight_snapshot_is_a_loud_error() {
        let rds = MockRdsActions::new();
        let mut record = record();
        record.current_state = WorkflowState::Restore;
        let err = Workflow::new(&rds, &NoChecks)
            .step(&mut record)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::MissingInFlightSnapshot { .. }
        ));
    }

    #[tokio::test]
    async fn api_failures_surface_instead_of_being_swallowed() {
        let rds = MockRdsActions::new();
        rds.fail_all("throttled");
        let mut record = record();
        let err = Workflow::new(&rds, &NoChecks)
            .step(&mut record)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Rds(_)));
    }
}
