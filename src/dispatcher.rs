// Entrypoint wiring: one inbound event advances one workflow by one step.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn, Instrument};

use crate::config::{VerifierConfig, WatchConfig};
use crate::rds::{RdsActions, RdsError};
use crate::state::record::WorkflowState;
use crate::state::store::{StateStore, StateStoreError};
use crate::telemetry::create_workflow_span;
use crate::workflow::checks::{NoChecks, VerificationSuite};
use crate::workflow::{Workflow, WorkflowError};

/// SNS wraps the actual notification in a JSON-encoded string; unwrap at most
/// this many nested envelopes before giving up.
const MAX_ENVELOPE_DEPTH: usize = 2;

static NO_CHECKS: NoChecks = NoChecks;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StateStoreError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("failed to open an RDS session for region {region}: {source}")]
    Session {
        region: String,
        #[source]
        source: RdsError,
    },
}

/// Opens an already-configured, region-scoped RDS session for the core.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: RdsActions + 'static;

    async fn open(&self, region: &str) -> Result<Self::Session, RdsError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Malformed or unrelated event; logged and dropped, never an error.
    Ignored { reason: String },
    /// The workflow for `database` ran and settled in `state`.
    Handled {
        database: String,
        state: WorkflowState,
    },
}

pub struct Dispatcher<'a, S, P> {
    config: &'a VerifierConfig,
    store: &'a S,
    sessions: &'a P,
    checks: &'a dyn VerificationSuite,
}

impl<'a, S, P> Dispatcher<'a, S, P>
where
    S: StateStore,
    P: SessionProvider,
{
    pub fn new(config: &'a VerifierConfig, store: &'a S, sessions: &'a P) -> Self {
        Self {
            config,
            store,
            sessions,
            checks: &NO_CHECKS,
        }
    }

    /// Swap in a real verification suite for the default pass-through.
    pub fn with_checks(mut self, checks: &'a dyn VerificationSuite) -> Self {
        self.checks = checks;
        self
    }

    /// Process one inbound trigger event end to end: resolve the watch it
    /// concerns, load or create its record, run the handler chain, save once
    /// after the chain settles.
    pub async fn dispatch(&self, event: &Value) -> Result<DispatchOutcome, DispatchError> {
        let Some(identifier) = source_identifier(event, MAX_ENVELOPE_DEPTH) else {
            info!("ignoring event with no recognizable source identifier");
            return Ok(DispatchOutcome::Ignored {
                reason: "no source identifier".to_string(),
            });
        };
        let Some(watch) = self.config.find_watch(&identifier) else {
            info!(
                identifier = %identifier,
                "ignoring event about an unwatched database"
            );
            return Ok(DispatchOutcome::Ignored {
                reason: format!("{identifier} is not watched"),
            });
        };
        self.run(watch).await
    }

    async fn run(&self, watch: &WatchConfig) -> Result<DispatchOutcome, DispatchError> {
        let span = create_workflow_span("dispatch", &watch.database);
        self.run_in_span(watch).instrument(span).await
    }

    async fn run_in_span(&self, watch: &WatchConfig) -> Result<DispatchOutcome, DispatchError> {
        let mut record = self.store.load_or_create(watch).await?;
        let session = self.sessions.open(&record.region).await.map_err(|source| {
            DispatchError::Session {
                region: record.region.clone(),
                source,
            }
        })?;
        Workflow::new(&session, self.checks).step(&mut record).await?;
        self.store.save(&record).await?;
        Ok(DispatchOutcome::Handled {
            database: record.database,
            state: record.current_state,
        })
    }
}

/// Pull a database identifier out of an opaque trigger event.
///
/// Recognized shapes: a bare `{"database": ...}` tick, the CloudWatch RDS
/// event `detail.SourceIdentifier`, and an SNS envelope whose
/// `Records[0].Sns.Message` string holds one of the above as JSON.
fn source_identifier(event: &Value, depth: usize) -> Option<String> {
    if let Some(database) = event.get("database").and_then(Value::as_str) {
        return Some(database.to_string());
    }
    if let Some(identifier) = event
        .pointer("/detail/SourceIdentifier")
        .and_then(Value::as_str)
    {
        return Some(identifier.to_string());
    }
    if depth > 0 {
        if let Some(message) = event
            .pointer("/Records/0/Sns/Message")
            .and_then(Value::as_str)
        {
            match serde_json::from_str::<Value>(message) {
                Ok(inner) => return source_identifier(&inner, depth - 1),
                Err(err) => {
                    warn!(error = %err, "SNS message payload is not JSON");
                    return None;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_a_manual_tick() {
        let event = json!({"database": "prod-db"});
        assert_eq!(
            source_identifier(&event, MAX_ENVELOPE_DEPTH).as_deref(),
            Some("prod-db")
        );
    }

    #[test]
    fn resolves_a_cloudwatch_rds_event() {
        let event = json!({
            "source": "aws.rds",
            "detail": {"SourceIdentifier": "prod-db", "Message": "Backup complete"}
        });
        assert_eq!(
            source_identifier(&event, MAX_ENVELOPE_DEPTH).as_deref(),
            Some("prod-db")
        );
    }

    #[test]
    fn resolves_an_sns_envelope() {
        let inner = json!({"detail": {"SourceIdentifier": "prod-db"}}).to_string();
        let event = json!({"Records": [{"Sns": {"Message": inner}}]});
        assert_eq!(
            source_identifier(&event, MAX_ENVELOPE_DEPTH).as_deref(),
            Some("prod-db")
        );
    }

    #[test]
    fn unrecognizable_events_resolve_to_nothing() {
        assert_eq!(source_identifier(&json!({"foo": "bar"}), MAX_ENVELOPE_DEPTH), None);
        assert_eq!(
            source_identifier(&json!({"Records": [{"Sns": {"Message": "not json"}}]}), MAX_ENVELOPE_DEPTH),
            None
        );
    }
}
