use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::WatchConfig;
use crate::state::record::StateRecord;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state record at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state record for {database}: {source}")]
    Serialize {
        database: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("state record for {database} is locked by another invocation")]
    Locked { database: String },

    #[error("state record for {database} was not loaded by this store")]
    LockNotHeld { database: String },
}

/// Load/create/save of workflow state records, keyed by source database.
///
/// Implementations must make load-then-save effectively exclusive per key:
/// two invocations racing on the same database's read-modify-write cycle is a
/// correctness hazard, not a throughput feature.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the record for a watched database, creating (and persisting) a
    /// fresh `wait` record on first sighting.
    async fn load_or_create(&self, watch: &WatchConfig) -> Result<StateRecord, StateStoreError>;

    /// Persist the record. Only valid after `load_or_create` on this store.
    async fn save(&self, record: &StateRecord) -> Result<(), StateStoreError>;
}

/// One pretty-printed JSON document per database under a state directory.
///
/// Exclusivity comes from a non-blocking OS advisory lock on a per-database
/// lock file, taken at `load_or_create` and held until the store is dropped.
/// A concurrent invocation fails fast with [`StateStoreError::Locked`] and
/// leaves retrying to the trigger mechanism.
#[derive(Debug)]
pub struct FileStateStore {
    directory: PathBuf,
    locks: Mutex<HashMap<String, File>>,
}

impl FileStateStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn record_path(&self, database: &str) -> PathBuf {
        self.directory.join(format!("{database}.state.json"))
    }

    fn lock_path(&self, database: &str) -> PathBuf {
        self.directory.join(format!("{database}.lock"))
    }

    fn acquire_lock(&self, database: &str) -> Result<(), StateStoreError> {
        let mut locks = self.locks.lock().expect("state store lock poisoned");
        if locks.contains_key(database) {
            return Ok(());
        }
        fs::create_dir_all(&self.directory)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path(database))?;
        file.try_lock_exclusive().map_err(|err| {
            if err.kind() == ErrorKind::WouldBlock {
                StateStoreError::Locked {
                    database: database.to_string(),
                }
            } else {
                StateStoreError::Io(err)
            }
        })?;
        debug!(database = %database, "acquired state record lock");
        locks.insert(database.to_string(), file);
        Ok(())
    }

    fn holds_lock(&self, database: &str) -> bool {
        self.locks
            .lock()
            .expect("state store lock poisoned")
            .contains_key(database)
    }

    fn write_record(&self, record: &StateRecord) -> Result<(), StateStoreError> {
        let raw =
            serde_json::to_string_pretty(record).map_err(|source| StateStoreError::Serialize {
                database: record.database.clone(),
                source,
            })?;
        let path = self.record_path(&record.database);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_record(&self, path: &Path) -> Result<Option<StateRecord>, StateStoreError> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StateStoreError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Read a record without taking the lock. For status display only; never
    /// use the result for a read-modify-write cycle.
    pub fn peek(&self, database: &str) -> Result<Option<StateRecord>, StateStoreError> {
        self.read_record(&self.record_path(database))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_or_create(&self, watch: &WatchConfig) -> Result<StateRecord, StateStoreError> {
        self.acquire_lock(&watch.database)?;
        match self.read_record(&self.record_path(&watch.database))? {
            Some(record) => Ok(record),
            None => {
                let record = StateRecord::for_watch(watch);
                info!(
                    database = %watch.database,
                    temporary_database = %record.temporary_database,
                    "first sighting of database, creating state record"
                );
                self.write_record(&record)?;
                Ok(record)
            }
        }
    }

    async fn save(&self, record: &StateRecord) -> Result<(), StateStoreError> {
        if !self.holds_lock(&record.database) {
            return Err(StateStoreError::LockNotHeld {
                database: record.database.clone(),
            });
        }
        self.write_record(record)
    }
}
