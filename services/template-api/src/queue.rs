//! Registry of batch-production runs started through the API.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::dto::BatchReport;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Finished jobs kept for `/queue/jobs/{id}` lookups.
const DEFAULT_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub last_report: Option<BatchReport>,
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<Uuid, Job>,
    /// Finished job ids, oldest first.
    finished: VecDeque<Uuid>,
    last_report: Option<BatchReport>,
}

impl Jobs {
    fn finish(&mut self, id: Uuid, history: usize) {
        self.finished.push_back(id);
        while self.finished.len() > history {
            if let Some(old) = self.finished.pop_front() {
                self.by_id.remove(&old);
            }
        }
    }
}

pub struct JobRegistry {
    jobs: RwLock<Jobs>,
    history: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: usize) -> Self {
        Self {
            jobs: RwLock::new(Jobs::default()),
            history: history.max(1),
        }
    }

    pub async fn start(&self, dry_run: bool) -> Uuid {
        let id = Uuid::new_v4();
        let job = Job {
            id,
            state: JobState::Running,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            report: None,
            error: None,
        };
        self.jobs.write().await.by_id.insert(id, job);
        id
    }

    /// Like [`start`](Self::start), but the returned guard fails the job if
    /// it is dropped before `complete` or `fail` is called.
    pub async fn start_guarded(self: &Arc<Self>, dry_run: bool) -> JobGuard {
        let id = self.start(dry_run).await;
        JobGuard {
            registry: self.clone(),
            id,
            armed: true,
        }
    }

    pub async fn complete(&self, id: Uuid, report: BatchReport) {
        let mut jobs = self.jobs.write().await;
        jobs.last_report = Some(report.clone());
        let Some(job) = jobs.by_id.get_mut(&id) else {
            return;
        };
        if job.state != JobState::Running {
            return;
        }
        job.state = JobState::Completed;
        job.report = Some(report);
        job.finished_at = Some(Utc::now());
        jobs.finish(id, self.history);
    }

    pub async fn fail(&self, id: Uuid, error: String) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.by_id.get_mut(&id) else {
            return;
        };
        if job.state != JobState::Running {
            return;
        }
        job.state = JobState::Failed;
        job.error = Some(error);
        job.finished_at = Some(Utc::now());
        jobs.finish(id, self.history);
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.by_id.get(&id).cloned()
    }

    pub async fn status(&self) -> QueueStatus {
        let jobs = self.jobs.read().await;
        let count = |state| jobs.by_id.values().filter(|j| j.state == state).count();
        QueueStatus {
            running: count(JobState::Running),
            completed: count(JobState::Completed),
            failed: count(JobState::Failed),
            last_report: jobs.last_report.clone(),
        }
    }
}

/// A running job tied to the request that started it.
pub struct JobGuard {
    registry: Arc<JobRegistry>,
    id: Uuid,
    armed: bool,
}

impl JobGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn complete(mut self, report: BatchReport) {
        self.armed = false;
        self.registry.complete(self.id, report).await;
    }

    pub async fn fail(mut self, error: String) {
        self.armed = false;
        self.registry.fail(self.id, error).await;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let registry = self.registry.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    registry
                        .fail(id, "request dropped before the run finished".into())
                        .await;
                });
            }
            Err(_) => warn!(job_id = %id, "job dropped outside a runtime; left running"),
        }
    }
}
