//! Background training jobs and their observable status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use polarity_classifiers::error::ErrorReport;
use polarity_classifiers::models::sentiment_model::EpochReport;
use polarity_classifiers::{PolarityError, Result};

use crate::orchestrator::TrainingRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub model_type: String,
    pub status: JobStatus,
    /// Free-form progress text, e.g. `epoch 2/5`.
    pub detail: String,
    pub result: Option<TrainingRun>,
    pub error: Option<ErrorReport>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Token of the worker that owns this record.
    #[serde(skip)]
    run: u64,
}

/// Thread-safe map from job id to its latest record. Clones share state.
///
/// Every submission gets a fresh run token, and a worker only writes to a
/// record carrying its own token. A worker orphaned by [`JobStore::reset`]
/// therefore never touches a later job that reuses its id.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    inner: Arc<Mutex<HashMap<String, JobRecord>>>,
    next_run: Arc<AtomicU64>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create(&self, job_id: &str, model_type: &str) -> Result<u64> {
        let mut records = self.records();
        if let Some(existing) = records.get(job_id) {
            return Err(PolarityError::Validation(format!(
                "job '{}' already exists ({:?})",
                job_id, existing.status
            )));
        }
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        records.insert(
            job_id.to_string(),
            JobRecord {
                job_id: job_id.to_string(),
                model_type: model_type.to_string(),
                status: JobStatus::Queued,
                detail: "queued".to_string(),
                result: None,
                error: None,
                submitted_at: now,
                updated_at: now,
                run,
            },
        );
        Ok(run)
    }

    fn update(&self, job_id: &str, run: u64, apply: impl FnOnce(&mut JobRecord)) {
        match self.records().get_mut(job_id) {
            Some(record) if record.run == run => {
                apply(record);
                record.updated_at = Utc::now();
            }
            _ => log::debug!("Dropping update for job {} from a reset run", job_id),
        }
    }

    /// Run `work` on a new thread, tracking it under `job_id`.
    ///
    /// `work` receives an epoch observer that keeps the record's detail current.
    /// Ids are single use: submitting an id that already has a record, finished
    /// or not, is rejected until [`JobStore::reset`] clears it.
    pub fn submit<F>(&self, job_id: &str, model_type: &str, work: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(&mut dyn FnMut(&EpochReport)) -> Result<TrainingRun> + Send + 'static,
    {
        let run = self.create(job_id, model_type)?;
        let store = self.clone();
        let id = job_id.to_string();

        let spawned = thread::Builder::new()
            .name(format!("job-{}", id))
            .spawn(move || {
                store.update(&id, run, |r| {
                    r.status = JobStatus::Running;
                    r.detail = "training".to_string();
                });

                let progress = store.clone();
                let progress_id = id.clone();
                let mut observer = move |report: &EpochReport| {
                    progress.update(&progress_id, run, |r| {
                        r.detail = match report.mean_loss {
                            Some(loss) => format!(
                                "epoch {}/{} (loss {:.4})",
                                report.epoch, report.total_epochs, loss
                            ),
                            None => format!("epoch {}/{}", report.epoch, report.total_epochs),
                        };
                    });
                };

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut observer)))
                    .unwrap_or_else(|_| {
                        Err(PolarityError::TrainingFailed(
                            "training thread panicked".to_string(),
                        ))
                    });

                match outcome {
                    Ok(training) => {
                        log::info!("Job {} completed", id);
                        store.update(&id, run, |r| {
                            r.status = JobStatus::Completed;
                            r.detail = format!("accuracy {:.4}", training.metrics.accuracy);
                            r.result = Some(training);
                        });
                    }
                    Err(e) => {
                        log::error!("Job {} failed: {}", id, e);
                        store.update(&id, run, |r| {
                            r.status = JobStatus::Failed;
                            r.detail = e.to_string();
                            r.error = Some(e.report());
                        });
                    }
                }
            });

        spawned.map_err(|e| {
            self.update(job_id, run, |r| {
                r.status = JobStatus::Failed;
                r.detail = e.to_string();
            });
            PolarityError::Io(e)
        })
    }

    /// Latest record for a job, or `None` for unknown ids.
    pub fn get_status(&self, job_id: &str) -> Option<JobRecord> {
        self.records().get(job_id).cloned()
    }

    /// All records, oldest submission first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut all: Vec<JobRecord> = self.records().values().cloned().collect();
        all.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        all
    }

    /// Poll until every listed job is finished, logging detail changes.
    ///
    /// Unknown ids are skipped.
    pub fn wait_all(&self, job_ids: &[String], poll: Duration) -> Vec<JobRecord> {
        let mut last_detail: HashMap<String, String> = HashMap::new();
        loop {
            let current: Vec<JobRecord> = job_ids
                .iter()
                .filter_map(|id| self.get_status(id))
                .collect();
            for record in &current {
                if last_detail.get(&record.job_id) != Some(&record.detail) {
                    log::info!("[{}] {:?}: {}", record.job_id, record.status, record.detail);
                    last_detail.insert(record.job_id.clone(), record.detail.clone());
                }
            }
            if current.iter().all(|r| r.status.is_terminal()) {
                return current;
            }
            thread::sleep(poll);
        }
    }

    /// Forget every job record. Workers still running keep going, but their
    /// updates are dropped, even if the id is submitted again.
    pub fn reset(&self) {
        self.records().clear();
    }
}
