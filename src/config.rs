use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::state::record::IdList;

/// RDS imposes a 63-character limit on instance identifiers.
const MAX_INSTANCE_ID_LEN: usize = 63;

/// Main configuration structure for dbsnap-verify
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifierConfig {
    /// Where workflow state records live
    #[serde(default)]
    pub state: StateConfig,
    /// The databases being watched
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default = "default_state_directory")]
    pub directory: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            directory: default_state_directory(),
        }
    }
}

fn default_state_directory() -> PathBuf {
    PathBuf::from(".dbsnap-verify/state")
}

/// One monitored database and the network the scratch restore lands in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Source database identifier
    pub database: String,
    /// Scratch instance identifier; derived from `database` when omitted
    #[serde(default)]
    pub temporary_database: Option<String>,
    /// Region the snapshots and scratch instance live in
    pub region: String,
    /// Subnets for the scratch instance (list or comma-delimited string)
    pub subnet_ids: IdList,
    /// Security groups granting the verifier access (same flexible encoding)
    pub security_group_ids: IdList,
    /// Opaque verification-check configuration passed through to the suite
    #[serde(default)]
    pub verification_checks: Option<serde_json::Value>,
}

impl WatchConfig {
    pub fn temporary_database_name(&self) -> String {
        match &self.temporary_database {
            Some(name) => name.clone(),
            None => {
                let mut name = format!("dbsnap-verify-{}", self.database);
                name.truncate(MAX_INSTANCE_ID_LEN);
                while name.ends_with('-') {
                    name.pop();
                }
                name
            }
        }
    }

    /// Whether an event source identifier concerns this watch. Events about
    /// the scratch instance wake the same workflow as events about the source.
    pub fn concerns(&self, identifier: &str) -> bool {
        self.database == identifier || self.temporary_database_name() == identifier
    }
}

impl VerifierConfig {
    /// Load configuration with precedence:
    /// 1. Configuration file (when present)
    /// 2. Environment variables (prefixed with DBSNAP_VERIFY_)
    pub fn load(path: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("DBSNAP_VERIFY")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn find_watch(&self, identifier: &str) -> Option<&WatchConfig> {
        self.watch.iter().find(|watch| watch.concerns(identifier))
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::debug!("loaded environment variables from .env file");
        }
        Ok(())
    }
}
