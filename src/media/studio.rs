//! Creative studio job board
//!
//! A flat list of media jobs, independent of any conversation. Each job is
//! polled with a geometric backoff until it reaches a terminal status, is
//! cancelled or removed, or the board is disposed.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::dispatch::{submit_job, MediaDispatch};
use super::models::{JobStatusReport, MediaParams, RemoteJobStatus, StudioJob};
use super::task_guard::TaskGuard;
use crate::conversation::MediaKind;
use crate::error::Result;
use crate::metrics::METRICS;

/// Studio polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioPollConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_status_errors")]
    pub max_status_errors: u32,
}

fn default_initial_interval_ms() -> u64 { 1_000 }
fn default_max_interval_ms() -> u64 { 15_000 }
fn default_backoff_factor() -> f64 { 1.5 }
fn default_max_status_errors() -> u32 { 5 }

impl Default for StudioPollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            backoff_factor: default_backoff_factor(),
            max_status_errors: default_max_status_errors(),
        }
    }
}

impl StudioPollConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms.max(1))
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms).max(self.initial_interval())
    }

    /// Interval after `current`, capped at `max_interval`
    pub fn next_interval(&self, current: Duration) -> Duration {
        let max = self.max_interval();
        let factor = if self.backoff_factor.is_finite() {
            self.backoff_factor.max(1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .unwrap_or(max)
            .min(max)
    }
}

struct BoardState {
    jobs: Mutex<IndexMap<String, StudioJob>>,
    frames: watch::Sender<Vec<StudioJob>>,
    polls: DashMap<String, TaskGuard>,
}

impl BoardState {
    fn lock(&self) -> MutexGuard<'_, IndexMap<String, StudioJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, jobs: &IndexMap<String, StudioJob>) {
        self.frames.send_replace(jobs.values().cloned().collect());
    }

    /// Update a live job; returns false if it is gone or already terminal
    fn update<F>(&self, job_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut StudioJob),
    {
        let mut jobs = self.lock();
        let updated = match jobs.get_mut(job_id) {
            Some(job) if !job.is_terminal() => {
                mutate(job);
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        };
        if updated {
            self.publish(&jobs);
        }
        updated
    }

    /// Fold a status report in; returns true once polling should stop
    fn apply_report(&self, job_id: &str, report: &JobStatusReport) -> bool {
        let mut terminal = true;
        let updated = self.update(job_id, |job| {
            match report.status {
                RemoteJobStatus::Completed => {
                    let locators = report.locators(job.kind);
                    if locators.is_empty() {
                        job.status = RemoteJobStatus::Failed;
                        job.error = Some("completed without a result".to_string());
                    } else {
                        job.status = RemoteJobStatus::Completed;
                        job.result = locators;
                    }
                }
                RemoteJobStatus::Failed | RemoteJobStatus::Cancelled => {
                    job.status = report.status;
                    job.error = Some(report.failure_reason());
                }
                status => {
                    job.status = status;
                    terminal = false;
                }
            }
            if terminal {
                METRICS.record_media_job(job.kind.as_str(), job.status.as_str());
            }
        });

        !updated || terminal
    }

    fn deregister(&self, job_id: &str) {
        if let Some((_, guard)) = self.polls.remove(job_id) {
            guard.detach();
        }
    }
}

pub struct StudioBoard {
    dispatch: Arc<dyn MediaDispatch>,
    config: StudioPollConfig,
    state: Arc<BoardState>,
}

impl StudioBoard {
    pub fn new(dispatch: Arc<dyn MediaDispatch>, config: StudioPollConfig) -> Self {
        let (frames, _) = watch::channel(Vec::new());
        Self {
            dispatch,
            config,
            state: Arc::new(BoardState {
                jobs: Mutex::new(IndexMap::new()),
                frames,
                polls: DashMap::new(),
            }),
        }
    }

    /// Submit a new job and put it on the board
    pub async fn enqueue(
        &self,
        kind: MediaKind,
        prompt: &str,
        model_id: &str,
        params: &MediaParams,
    ) -> Result<String> {
        let job_id = submit_job(self.dispatch.as_ref(), kind, prompt, model_id, params)
            .await
            .map_err(|e| {
                error!(kind = kind.as_str(), model_id, "Failed to dispatch studio job: {}", e);
                METRICS.record_media_job(kind.as_str(), "dispatch_failed");
                e
            })?;

        info!(job_id = %job_id, kind = kind.as_str(), "Studio job queued");
        METRICS.record_media_job(kind.as_str(), "submitted");
        self.track(StudioJob::new(job_id.clone(), kind, prompt, model_id));

        Ok(job_id)
    }

    /// Put an existing job on the board and poll it
    ///
    /// Returns false if the id is already being polled.
    pub fn track(&self, job: StudioJob) -> bool {
        let job_id = job.id.clone();
        let terminal = job.is_terminal();

        {
            let mut jobs = self.state.lock();
            jobs.entry(job_id.clone()).or_insert(job);
            self.state.publish(&jobs);
        }

        if terminal {
            return false;
        }

        match self.state.polls.entry(job_id.clone()) {
            Entry::Occupied(_) => {
                debug!(job_id = %job_id, "Studio job already polled, ignoring");
                false
            }
            Entry::Vacant(slot) => {
                let poll = StudioPoll {
                    dispatch: self.dispatch.clone(),
                    config: self.config.clone(),
                    state: self.state.clone(),
                    job_id,
                };
                slot.insert(TaskGuard::spawn(poll.run()));
                true
            }
        }
    }

    /// Stop polling a live job and mark it cancelled
    pub fn cancel(&self, job_id: &str) -> bool {
        self.state.polls.remove(job_id);
        let cancelled = self.state.update(job_id, |job| {
            job.status = RemoteJobStatus::Cancelled;
        });
        if cancelled {
            info!(job_id, "Studio job cancelled");
        }
        cancelled
    }

    /// Drop a job from the board, stopping its poll loop
    pub fn remove(&self, job_id: &str) -> Option<StudioJob> {
        self.state.polls.remove(job_id);
        let mut jobs = self.state.lock();
        let removed = jobs.shift_remove(job_id);
        if removed.is_some() {
            self.state.publish(&jobs);
        }
        removed
    }

    pub fn jobs(&self) -> Vec<StudioJob> {
        self.state.lock().values().cloned().collect()
    }

    pub fn job(&self, job_id: &str) -> Option<StudioJob> {
        self.state.lock().get(job_id).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<StudioJob>> {
        self.state.frames.subscribe()
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.state.polls.contains_key(job_id)
    }

    /// Tear down every poll loop; jobs stay on the board
    pub fn dispose(&self) {
        self.state.polls.clear();
    }
}

impl Drop for StudioBoard {
    fn drop(&mut self) {
        self.state.polls.clear();
    }
}

struct StudioPoll {
    dispatch: Arc<dyn MediaDispatch>,
    config: StudioPollConfig,
    state: Arc<BoardState>,
    job_id: String,
}

impl StudioPoll {
    async fn run(self) {
        let mut delay = self.config.initial_interval();
        let mut status_errors = 0u32;

        loop {
            tokio::time::sleep(delay).await;
            delay = self.config.next_interval(delay);

            METRICS.record_media_poll("studio");
            match self.dispatch.status_of(&self.job_id).await {
                Ok(report) => {
                    status_errors = 0;
                    debug!(job_id = %self.job_id, status = report.status.as_str(), "Studio job status");
                    if self.state.apply_report(&self.job_id, &report) {
                        break;
                    }
                }
                Err(e) => {
                    status_errors += 1;
                    warn!(job_id = %self.job_id, attempt = status_errors, "Studio status query failed: {}", e);
                    if status_errors >= self.config.max_status_errors {
                        self.state.update(&self.job_id, |job| {
                            job.status = RemoteJobStatus::Failed;
                            job.error = Some(format!("status unavailable: {}", e));
                        });
                        break;
                    }
                }
            }
        }

        self.state.deregister(&self.job_id);
    }
}
