// End-to-end walk of one verification cycle, driven the way production drives
// it: repeated dispatches against a file-backed store while the mocked cloud
// catches up between events.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use dbsnap_verify::rds::mock::{MockRdsActions, MockSessionProvider, RdsCall};
use dbsnap_verify::rds::InstanceStatus;
use dbsnap_verify::{
    DispatchOutcome, Dispatcher, FileStateStore, StateStore, VerifierConfig, WorkflowState,
};

const TMP: &str = "dbsnap-verify-prod-db";

fn config(state_dir: &Path) -> VerifierConfig {
    serde_json::from_value(json!({
        "state": { "directory": state_dir.to_str().unwrap() },
        "watch": [{
            "database": "prod-db",
            "region": "us-east-1",
            "subnet_ids": "subnet-a,subnet-b",
            "security_group_ids": ["sg-1", "sg-2"],
        }]
    }))
    .unwrap()
}

fn restore_calls(rds: &MockRdsActions) -> Vec<RdsCall> {
    rds.issued_calls()
        .into_iter()
        .filter(|call| matches!(call, RdsCall::RestoreFromSnapshot { .. }))
        .collect()
}

#[tokio::test]
async fn a_new_snapshot_is_restored_verified_and_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let store = FileStateStore::new(&config.state.directory);

    // The watch has already verified snap-1 in an earlier cycle.
    let mut record = store.load_or_create(&config.watch[0]).await.unwrap();
    record.snapshot_verified = Some("snap-1".to_string());
    store.save(&record).await.unwrap();

    let rds = Arc::new(MockRdsActions::new());
    rds.set_latest_snapshot("prod-db", "snap-2");
    let sessions = MockSessionProvider::new(rds.clone());
    let dispatcher = Dispatcher::new(&config, &store, &sessions);
    let tick = json!({ "database": "prod-db" });

    // Event 1: wait chains into restore and issues exactly one restore call
    // with the normalized subnet list.
    let outcome = dispatcher.dispatch(&tick).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Handled {
            database: "prod-db".to_string(),
            state: WorkflowState::Restore,
        }
    );
    assert_eq!(
        restore_calls(&rds),
        vec![RdsCall::RestoreFromSnapshot {
            snapshot: "snap-2".to_string(),
            target_instance: TMP.to_string(),
            subnet_ids: vec!["subnet-a".to_string(), "subnet-b".to_string()],
        }]
    );
    let persisted = store.peek("prod-db").unwrap().unwrap();
    assert_eq!(persisted.current_state, WorkflowState::Restore);
    assert_eq!(persisted.snapshot_verifying.as_deref(), Some("snap-2"));

    // Event 2: the restore is still running; nothing changes and no second
    // restore is issued.
    rds.set_instance(TMP, InstanceStatus::Creating);
    dispatcher.dispatch(&tick).await.unwrap();
    assert_eq!(restore_calls(&rds).len(), 1);
    assert_eq!(
        store.peek("prod-db").unwrap().unwrap().current_state,
        WorkflowState::Restore
    );

    // Event 3: the instance came up; restore chains through modify and parks
    // at verify until the credential reset shows up in the event log.
    rds.set_instance(TMP, InstanceStatus::Available);
    dispatcher.dispatch(&tick).await.unwrap();
    let persisted = store.peek("prod-db").unwrap().unwrap();
    assert_eq!(persisted.current_state, WorkflowState::Verify);
    let password = persisted.temporary_password.clone().expect("password persisted");
    assert!(rds.issued_calls().contains(&RdsCall::ModifyInstance {
        instance: TMP.to_string(),
        new_password: password,
        security_group_ids: vec!["sg-1".to_string(), "sg-2".to_string()],
    }));

    // Event 4: status alone is not enough.
    dispatcher.dispatch(&tick).await.unwrap();
    assert_eq!(
        store.peek("prod-db").unwrap().unwrap().current_state,
        WorkflowState::Verify
    );

    // Event 5: the reset marker landed; verification passes and cleanup
    // issues the instance destruction.
    rds.set_event_messages(TMP, vec!["Reset master credentials.".to_string()]);
    dispatcher.dispatch(&tick).await.unwrap();
    assert_eq!(
        store.peek("prod-db").unwrap().unwrap().current_state,
        WorkflowState::Cleanup
    );
    assert!(rds
        .issued_calls()
        .iter()
        .any(|call| matches!(call, RdsCall::DestroyInstance { .. })));

    // Event 6: the instance is gone; the cycle completes and the record is
    // back to waiting with the new snapshot verified and the password erased.
    rds.remove_instance(TMP);
    dispatcher.dispatch(&tick).await.unwrap();
    let persisted = store.peek("prod-db").unwrap().unwrap();
    assert_eq!(persisted.current_state, WorkflowState::Wait);
    assert_eq!(persisted.snapshot_verified.as_deref(), Some("snap-2"));
    assert!(persisted.snapshot_verifying.is_none());
    assert!(persisted.temporary_password.is_none());
    assert!(rds.issued_calls().contains(&RdsCall::DestroySubnetGroup {
        group: TMP.to_string(),
    }));

    // Event 7: snap-2 is now the verified snapshot, so the watch sleeps.
    dispatcher.dispatch(&tick).await.unwrap();
    assert_eq!(
        store.peek("prod-db").unwrap().unwrap().current_state,
        WorkflowState::Wait
    );
    assert_eq!(restore_calls(&rds).len(), 1);
}

#[tokio::test]
async fn the_first_sighting_verifies_whatever_snapshot_exists() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let store = FileStateStore::new(&config.state.directory);

    let rds = Arc::new(MockRdsActions::new());
    rds.set_latest_snapshot("prod-db", "snap-1");
    let sessions = MockSessionProvider::new(rds.clone());
    let dispatcher = Dispatcher::new(&config, &store, &sessions);

    // No record exists yet; the dispatch creates one and, with nothing ever
    // verified, any snapshot counts as new.
    let outcome = dispatcher
        .dispatch(&json!({ "database": "prod-db" }))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Handled {
            database: "prod-db".to_string(),
            state: WorkflowState::Restore,
        }
    );
    assert_eq!(restore_calls(&rds).len(), 1);
}
