//! Chat-inline media job tracker
//!
//! A submitted job shows up as a placeholder turn right away. A poll loop
//! per job then queries its status on a fixed interval and replaces the
//! placeholder with a completion or failure turn. Loops are torn down on a
//! terminal status, when the view moves on, or when the tracker is disposed.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::dispatch::{submit_job, MediaDispatch};
use super::models::{MediaJob, MediaJobStatus, MediaParams, RemoteJobStatus};
use super::task_guard::TaskGuard;
use crate::conversation::{MediaKind, MediaLocator, Role, Turn};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::persistence::{append_logged, Persistence};
use crate::session::view::{ChatView, ViewToken};

/// Chat tracker polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive status query failures tolerated before the job fails
    #[serde(default = "default_max_status_errors")]
    pub max_status_errors: u32,
}

fn default_poll_interval_ms() -> u64 { 2_000 }
fn default_max_status_errors() -> u32 { 3 }

impl Default for MediaPollConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_status_errors: default_max_status_errors(),
        }
    }
}

impl MediaPollConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

pub struct MediaJobTracker {
    dispatch: Arc<dyn MediaDispatch>,
    persistence: Arc<dyn Persistence>,
    view: Arc<ChatView>,
    config: MediaPollConfig,
    polls: Arc<DashMap<String, TaskGuard>>,
}

impl MediaJobTracker {
    pub fn new(
        dispatch: Arc<dyn MediaDispatch>,
        persistence: Arc<dyn Persistence>,
        view: Arc<ChatView>,
        config: MediaPollConfig,
    ) -> Self {
        Self {
            dispatch,
            persistence,
            view,
            config,
            polls: Arc::new(DashMap::new()),
        }
    }

    /// Submit a job and start polling it
    ///
    /// The placeholder turn is in the transcript before the dispatch call
    /// returns. A dispatch failure turns it into a failure turn and is
    /// returned; it is never retried automatically.
    pub async fn submit(
        &self,
        token: &ViewToken,
        kind: MediaKind,
        prompt: &str,
        model_id: &str,
        params: &MediaParams,
    ) -> Result<String> {
        let placeholder = Turn::media_placeholder(kind, prompt, model_id);
        let placeholder_turn_id = placeholder.id.clone();
        self.view.apply(token, |v| v.turns.push(placeholder));

        let job_id = match submit_job(self.dispatch.as_ref(), kind, prompt, model_id, params).await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                error!(kind = kind.as_str(), model_id, "Failed to dispatch media job: {}", e);
                METRICS.record_media_job(kind.as_str(), "dispatch_failed");
                let failed = Turn::media_failed(kind, model_id, &e.to_string());
                self.view.apply(token, |v| {
                    v.replace_turn(&placeholder_turn_id, failed);
                });
                return Err(e.into());
            }
        };

        info!(job_id = %job_id, kind = kind.as_str(), model_id, "Media job submitted");
        METRICS.record_media_job(kind.as_str(), "submitted");

        let tracked = self.track(
            token.clone(),
            MediaJob {
                id: job_id.clone(),
                kind,
                prompt: prompt.to_string(),
                model_id: model_id.to_string(),
                placeholder_turn_id: placeholder_turn_id.clone(),
                status: MediaJobStatus::Pending,
                result: Vec::new(),
            },
        );
        if !tracked {
            // The existing poll owns its own placeholder
            warn!(job_id = %job_id, "Dispatch returned a job id already tracked");
            self.view.apply(token, |v| {
                v.turns.retain(|t| t.id != placeholder_turn_id);
            });
        }

        Ok(job_id)
    }

    /// Poll an already submitted job; a job id already tracked is ignored
    pub fn track(&self, token: ViewToken, job: MediaJob) -> bool {
        match self.polls.entry(job.id.clone()) {
            Entry::Occupied(_) => {
                debug!(job_id = %job.id, "Job already tracked, ignoring");
                false
            }
            Entry::Vacant(slot) => {
                let poll = JobPoll {
                    dispatch: self.dispatch.clone(),
                    persistence: self.persistence.clone(),
                    view: self.view.clone(),
                    polls: self.polls.clone(),
                    interval: self.config.poll_interval(),
                    max_status_errors: self.config.max_status_errors,
                    token,
                    job,
                };
                slot.insert(TaskGuard::spawn(poll.run()));
                true
            }
        }
    }

    pub fn is_tracking(&self, job_id: &str) -> bool {
        self.polls.contains_key(job_id)
    }

    pub fn tracked_jobs(&self) -> Vec<String> {
        self.polls.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Tear down every poll loop
    pub fn dispose(&self) {
        let active = self.polls.len();
        if active > 0 {
            debug!(active, "Disposing media poll loops");
        }
        self.polls.clear();
    }
}

impl Drop for MediaJobTracker {
    fn drop(&mut self) {
        self.polls.clear();
    }
}

struct JobPoll {
    dispatch: Arc<dyn MediaDispatch>,
    persistence: Arc<dyn Persistence>,
    view: Arc<ChatView>,
    polls: Arc<DashMap<String, TaskGuard>>,
    interval: Duration,
    max_status_errors: u32,
    token: ViewToken,
    job: MediaJob,
}

impl JobPoll {
    async fn run(mut self) {
        let resolution = self.poll_until_terminal().await;

        match resolution {
            Some(Ok(locators)) => self.complete(locators).await,
            Some(Err(reason)) => self.fail(&reason),
            None => {}
        }

        if let Some((_, guard)) = self.polls.remove(&self.job.id) {
            guard.detach();
        }
    }

    /// `None` when polling stopped because the view moved on
    async fn poll_until_terminal(&self) -> Option<std::result::Result<Vec<MediaLocator>, String>> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_errors = 0u32;

        loop {
            ticker.tick().await;

            if !self.view.is_current(&self.token) {
                debug!(job_id = %self.job.id, "Conversation no longer displayed, stopping poll");
                return None;
            }

            METRICS.record_media_poll("chat");
            match self.dispatch.status_of(&self.job.id).await {
                Ok(report) => {
                    status_errors = 0;
                    match report.status {
                        RemoteJobStatus::Completed => {
                            let locators = report.locators(self.job.kind);
                            if locators.is_empty() {
                                return Some(Err("completed without a result".to_string()));
                            }
                            return Some(Ok(locators));
                        }
                        RemoteJobStatus::Failed | RemoteJobStatus::Cancelled => {
                            return Some(Err(report.failure_reason()));
                        }
                        status => {
                            debug!(job_id = %self.job.id, status = status.as_str(), "Media job in progress");
                        }
                    }
                }
                Err(e) => {
                    status_errors += 1;
                    warn!(
                        job_id = %self.job.id,
                        attempt = status_errors,
                        "Media status query failed: {}", e
                    );
                    if status_errors >= self.max_status_errors {
                        return Some(Err(format!("status unavailable: {}", e)));
                    }
                }
            }
        }
    }

    async fn complete(&mut self, locators: Vec<MediaLocator>) {
        self.job.status = MediaJobStatus::Completed;
        self.job.result = locators.clone();
        METRICS.record_media_job(self.job.kind.as_str(), "completed");
        info!(job_id = %self.job.id, results = locators.len(), "Media job completed");

        let turn = Turn::media_result(&self.job.prompt, &self.job.model_id, locators);
        let persisted_id = append_logged(
            self.persistence.as_ref(),
            self.token.conversation_id(),
            Role::Assistant,
            &turn.durable_text(),
        )
        .await;
        let turn = turn.with_persisted_id(persisted_id);

        let placeholder = self.job.placeholder_turn_id.clone();
        self.view.apply(&self.token, |v| {
            v.replace_turn(&placeholder, turn);
        });
    }

    fn fail(&mut self, reason: &str) {
        self.job.status = MediaJobStatus::Failed;
        METRICS.record_media_job(self.job.kind.as_str(), "failed");
        warn!(job_id = %self.job.id, "Media job failed: {}", reason);

        let turn = Turn::media_failed(self.job.kind, &self.job.model_id, reason);
        let placeholder = self.job.placeholder_turn_id.clone();
        self.view.apply(&self.token, |v| {
            v.replace_turn(&placeholder, turn);
        });
    }
}
