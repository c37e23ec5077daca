//! Assignment and state storage
//!
//! The assignment store is the authority on which variant a subject saw.
//! Every backend must implement `insert_if_absent` atomically so that two
//! racing first-time enrollments of the same subject resolve to one
//! canonical record.
//!
//! A [`StateStore`] keeps a durable copy of experiments, segments and
//! counted events so the registry and aggregator can be rebuilt on startup.
//!
//! ## Backends
//!
//! - [`MemoryAssignmentStore`]: DashMap entry API, process-local
//! - [`SledStore`]: embedded sled database, one key prefix per record kind,
//!   compare-and-swap for assignments; survives restarts

use abtest_types::{Assignment, Experiment, MetricEvent, Segment};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use sled::Db;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::errors::{DecisionError, Result};

/// Storage for immutable assignment records
pub trait AssignmentStore: Send + Sync {
    /// Look up the assignment for a subject, if one was persisted
    fn get(&self, experiment_id: &Uuid, subject_id: &str) -> Result<Option<Assignment>>;

    /// Persist `assignment` unless a record already exists for its
    /// (experiment, subject) pair
    ///
    /// Returns the canonical record: the one just written, or the one that
    /// won an earlier or concurrent insert.
    fn insert_if_absent(&self, assignment: Assignment) -> Result<Assignment>;

    /// Number of subjects enrolled in an experiment
    fn count(&self, experiment_id: &Uuid) -> Result<usize>;
}

/// Durable copy of experiment definitions, segments and counted events
pub trait StateStore: Send + Sync {
    /// Insert or overwrite an experiment record
    fn save_experiment(&self, experiment: &Experiment) -> Result<()>;

    fn load_experiments(&self) -> Result<Vec<Experiment>>;

    fn save_segment(&self, segment: &Segment) -> Result<()>;

    fn load_segments(&self) -> Result<Vec<Segment>>;

    /// Append an event that changed the tallies
    fn append_event(&self, event: &MetricEvent) -> Result<()>;

    /// Every appended event, oldest first
    fn load_events(&self) -> Result<Vec<MetricEvent>>;
}

/// In-memory assignment store
pub struct MemoryAssignmentStore {
    data: DashMap<(Uuid, String), Assignment>,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

impl Default for MemoryAssignmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignmentStore for MemoryAssignmentStore {
    fn get(&self, experiment_id: &Uuid, subject_id: &str) -> Result<Option<Assignment>> {
        Ok(self
            .data
            .get(&(*experiment_id, subject_id.to_string()))
            .map(|a| a.clone()))
    }

    fn insert_if_absent(&self, assignment: Assignment) -> Result<Assignment> {
        let key = (assignment.experiment_id, assignment.subject_id.clone());
        let proposed = assignment.variant_id;

        // The entry guard holds the shard lock for the whole check-and-insert
        let canonical = self.data.entry(key).or_insert(assignment).clone();
        if canonical.variant_id != proposed {
            debug!(
                experiment_id = %canonical.experiment_id,
                subject_id = %canonical.subject_id,
                "Concurrent enrollment resolved to existing assignment"
            );
        }
        Ok(canonical)
    }

    fn count(&self, experiment_id: &Uuid) -> Result<usize> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().0 == *experiment_id)
            .count())
    }
}

const ASSIGNMENT_PREFIX: &str = "assignment:";
const EXPERIMENT_PREFIX: &str = "experiment:";
const SEGMENT_PREFIX: &str = "segment:";
const EVENT_PREFIX: &str = "event:";

/// Sled-backed persistent store for assignments and engine state
pub struct SledStore {
    db: Db,
    path: PathBuf,
}

impl SledStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening sled store at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DecisionError::Storage(format!("Failed to create directory: {e}"))
            })?;
        }

        let db = sled::Config::new().path(&path).open()?;
        info!("Sled store opened, {} records", db.len());

        Ok(Self { db, path })
    }

    /// Store in a fresh temporary directory, for tests
    pub fn temporary() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("abtest_store_{}", Uuid::new_v4()));
        Self::open(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn key(experiment_id: &Uuid, subject_id: &str) -> Vec<u8> {
        format!("{ASSIGNMENT_PREFIX}{experiment_id}:{subject_id}").into_bytes()
    }

    fn prefix(experiment_id: &Uuid) -> Vec<u8> {
        format!("{ASSIGNMENT_PREFIX}{experiment_id}:").into_bytes()
    }

    fn load_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(|item| -> Result<T> {
                let (_, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }
}

impl AssignmentStore for SledStore {
    fn get(&self, experiment_id: &Uuid, subject_id: &str) -> Result<Option<Assignment>> {
        match self.db.get(Self::key(experiment_id, subject_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_if_absent(&self, assignment: Assignment) -> Result<Assignment> {
        let key = Self::key(&assignment.experiment_id, &assignment.subject_id);
        let value = serde_json::to_vec(&assignment)?;

        match self.db.compare_and_swap(key, None::<&[u8]>, Some(value))? {
            Ok(()) => Ok(assignment),
            Err(conflict) => {
                debug!(
                    experiment_id = %assignment.experiment_id,
                    subject_id = %assignment.subject_id,
                    "Concurrent enrollment resolved to existing assignment"
                );
                let current = conflict.current.ok_or_else(|| {
                    DecisionError::Storage("compare-and-swap conflict without a value".to_string())
                })?;
                Ok(serde_json::from_slice(&current)?)
            }
        }
    }

    fn count(&self, experiment_id: &Uuid) -> Result<usize> {
        let mut count = 0;
        for item in self.db.scan_prefix(Self::prefix(experiment_id)) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

impl StateStore for SledStore {
    fn save_experiment(&self, experiment: &Experiment) -> Result<()> {
        let key = format!("{EXPERIMENT_PREFIX}{}", experiment.id);
        self.db.insert(key.as_bytes(), serde_json::to_vec(experiment)?)?;
        Ok(())
    }

    fn load_experiments(&self) -> Result<Vec<Experiment>> {
        self.load_prefix(EXPERIMENT_PREFIX)
    }

    fn save_segment(&self, segment: &Segment) -> Result<()> {
        let key = format!("{SEGMENT_PREFIX}{}", segment.id);
        self.db.insert(key.as_bytes(), serde_json::to_vec(segment)?)?;
        Ok(())
    }

    fn load_segments(&self) -> Result<Vec<Segment>> {
        self.load_prefix(SEGMENT_PREFIX)
    }

    fn append_event(&self, event: &MetricEvent) -> Result<()> {
        // Big-endian sequence numbers keep the log in append order under scan
        let mut key = EVENT_PREFIX.as_bytes().to_vec();
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        self.db.insert(key, serde_json::to_vec(event)?)?;
        Ok(())
    }

    fn load_events(&self) -> Result<Vec<MetricEvent>> {
        self.load_prefix(EVENT_PREFIX)
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush sled store on drop: {}", e);
        }
    }
}
