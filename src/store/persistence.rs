//! Sled-backed [`StateStore`].
//!
//! Layout:
//!   jobs        job id -> bincode Job
//!   runs        run id -> bincode Run
//!   pending     u64 BE sequence -> job id string
//!   versions    "resource\0action" -> u64 BE counter
//!   containers  "resource\0action" -> container id string
//!   artifacts   "resource\0artifact_id" -> bincode ArtifactRecord
//!
//! The pending tree doubles as the FIFO: sled iterates keys in order,
//! and monotonic sequence numbers come from the database id generator.

use crate::error::StorageError;
use crate::store::{ArtifactRecord, Job, Run, RunCompletion, StateStore};
use crate::types::{ActionType, ApprovalStatus, JobId, JobStatus, ResourceId, RunId};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

pub struct SledStateStore {
    db: sled::Db,
    jobs: sled::Tree,
    runs: sled::Tree,
    pending: sled::Tree,
    versions: sled::Tree,
    containers: sled::Tree,
    artifacts: sled::Tree,
}

fn composite_key(resource: &ResourceId, suffix: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(resource.as_str().len() + 1 + suffix.len());
    key.extend_from_slice(resource.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(suffix.as_bytes());
    key
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::Corrupt(e.to_string()))
}

impl SledStateStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            jobs: db.open_tree("jobs")?,
            runs: db.open_tree("runs")?,
            pending: db.open_tree("pending")?,
            versions: db.open_tree("versions")?,
            containers: db.open_tree("containers")?,
            artifacts: db.open_tree("artifacts")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl StateStore for SledStateStore {
    fn put_job(&self, job: &Job) -> Result<(), StorageError> {
        self.jobs
            .insert(job.id.to_string().as_bytes(), encode(job)?)?;
        Ok(())
    }

    fn get_job(&self, id: &JobId) -> Result<Job, StorageError> {
        let bytes = self
            .jobs
            .get(id.to_string().as_bytes())?
            .ok_or_else(|| StorageError::JobNotFound(id.to_string()))?;
        decode(&bytes)
    }

    fn jobs(&self) -> Result<Vec<Job>, StorageError> {
        let mut out = Vec::new();
        for entry in self.jobs.iter() {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, StorageError> {
        Ok(self
            .jobs()?
            .into_iter()
            .filter(|job| job.status == status)
            .collect())
    }

    fn push_pending(&self, id: &JobId) -> Result<u64, StorageError> {
        let wanted = id.to_string();
        for entry in self.pending.iter() {
            let (key, value) = entry?;
            if value.as_ref() == wanted.as_bytes() {
                return Ok(decode_seq(&key)?);
            }
        }
        let seq = self.db.generate_id()?;
        self.pending
            .insert(seq.to_be_bytes(), wanted.as_bytes())?;
        Ok(seq)
    }

    fn pending(&self) -> Result<Vec<(u64, JobId)>, StorageError> {
        let mut out = Vec::new();
        for entry in self.pending.iter() {
            let (key, value) = entry?;
            let seq = decode_seq(&key)?;
            let text = std::str::from_utf8(&value)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            let id = JobId::from_str(text).map_err(|e| StorageError::Corrupt(e.to_string()))?;
            out.push((seq, id));
        }
        Ok(out)
    }

    fn remove_pending(&self, seq: u64) -> Result<(), StorageError> {
        self.pending.remove(seq.to_be_bytes())?;
        Ok(())
    }

    fn append_run(&self, run: &Run) -> Result<(), StorageError> {
        self.runs
            .insert(run.id.to_string().as_bytes(), encode(run)?)?;
        Ok(())
    }

    fn get_run(&self, id: &RunId) -> Result<Run, StorageError> {
        let bytes = self
            .runs
            .get(id.to_string().as_bytes())?
            .ok_or_else(|| StorageError::RunNotFound(id.to_string()))?;
        decode(&bytes)
    }

    fn finish_run(&self, id: &RunId, completion: RunCompletion) -> Result<Run, StorageError> {
        let mut run = self.get_run(id)?;
        if run.status.is_terminal() {
            return Err(StorageError::RunAlreadyTerminal(id.to_string()));
        }
        run.status = completion.status;
        run.input_tokens = completion.input_tokens;
        run.output_tokens = completion.output_tokens;
        run.error = completion.error;
        run.output_snapshot = completion.output_snapshot;
        run.ended_at = Some(Utc::now());
        self.append_run(&run)?;
        Ok(run)
    }

    fn runs(&self) -> Result<Vec<Run>, StorageError> {
        let mut out = Vec::new();
        for entry in self.runs.iter() {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    fn next_version(&self, resource: &ResourceId, action: ActionType) -> Result<u64, StorageError> {
        let key = composite_key(resource, action.as_str());
        let bytes = self.versions.update_and_fetch(key, |old| {
            let current = old.map(decode_counter).unwrap_or(0);
            Some(current.saturating_add(1).to_be_bytes().to_vec())
        })?;
        match bytes {
            Some(bytes) => Ok(decode_counter(&bytes)),
            None => Err(StorageError::Corrupt("version counter vanished".to_string())),
        }
    }

    fn versions(&self, resource: &ResourceId) -> Result<BTreeMap<ActionType, u64>, StorageError> {
        let mut out = BTreeMap::new();
        for action in ActionType::GENERATIVE {
            let key = composite_key(resource, action.as_str());
            let version = self
                .versions
                .get(key)?
                .map(|bytes| decode_counter(&bytes))
                .unwrap_or(0);
            out.insert(action, version);
        }
        Ok(out)
    }

    fn container_ref(
        &self,
        resource: &ResourceId,
        action: ActionType,
    ) -> Result<Option<String>, StorageError> {
        let key = composite_key(resource, action.as_str());
        match self.containers.get(key)? {
            Some(bytes) => {
                let text = std::str::from_utf8(&bytes)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                Ok(Some(text.to_string()))
            }
            None => Ok(None),
        }
    }

    fn set_container_ref(
        &self,
        resource: &ResourceId,
        action: ActionType,
        container_id: &str,
    ) -> Result<(), StorageError> {
        let key = composite_key(resource, action.as_str());
        self.containers.insert(key, container_id.as_bytes())?;
        Ok(())
    }

    fn upsert_artifact(&self, record: &ArtifactRecord) -> Result<(), StorageError> {
        let key = composite_key(&record.resource_id, &record.artifact_id);
        self.artifacts.insert(key, encode(record)?)?;
        Ok(())
    }

    fn artifacts_for(&self, resource: &ResourceId) -> Result<Vec<ArtifactRecord>, StorageError> {
        let mut prefix = resource.as_str().as_bytes().to_vec();
        prefix.push(0);
        let mut out = Vec::new();
        for entry in self.artifacts.scan_prefix(prefix) {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    fn set_artifact_status(
        &self,
        resource: &ResourceId,
        artifact_id: &str,
        status: ApprovalStatus,
    ) -> Result<(), StorageError> {
        let key = composite_key(resource, artifact_id);
        let bytes = self
            .artifacts
            .get(&key)?
            .ok_or_else(|| StorageError::Corrupt(format!("unknown artifact {artifact_id}")))?;
        let mut record: ArtifactRecord = decode(&bytes)?;
        record.status = status;
        self.artifacts.insert(key, encode(&record)?)?;
        Ok(())
    }
}

fn decode_seq(bytes: &[u8]) -> Result<u64, StorageError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corrupt("pending key is not a u64".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

fn decode_counter(bytes: &[u8]) -> u64 {
    let mut array = [0u8; 8];
    let len = bytes.len().min(8);
    array[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(array)
}
