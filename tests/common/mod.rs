//! Shared test doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chat_engine::config::Config;
use chat_engine::context::summarizer::{Summarizer, SummarizerError};
use chat_engine::context::ContextTurn;
use chat_engine::conversation::{MediaKind, Role};
use chat_engine::engine::{ChatEngine, EngineDeps};
use chat_engine::media::dispatch::{DispatchError, MediaDispatch};
use chat_engine::media::models::{JobStatusReport, MediaParams, RemoteJobStatus};
use chat_engine::persistence::{Persistence, PersistenceError};
use chat_engine::registry::{ModelInfo, ModelKind};
use chat_engine::session::transport::{
    GenerationEvent, GenerationRequest, GenerationStream, GenerationTransport, TransportError,
};
use chat_engine::session::view::GenerationFailure;
use chat_engine::session::SessionCallbacks;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const STOPPED_MARKER: &str = "_(stopped marker)_";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.models = vec![
        ModelInfo::new("gpt", "GPT", 8_192, ModelKind::Chat),
        ModelInfo::new("painter", "Painter", 4_096, ModelKind::Image),
        ModelInfo::new("director", "Director", 4_096, ModelKind::Video),
    ];
    config.default_model = "gpt".to_string();
    config.session.stopped_marker = STOPPED_MARKER.to_string();
    config.session.reveal_tick_ms = 10;
    config.session.finalize_settle_ms = 50;
    config.media.poll_interval_ms = 1_000;
    config.media.max_status_errors = 3;
    config
}

/// Give spawned tasks a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ---------------------------------------------------------------------------
// Generation transport
// ---------------------------------------------------------------------------

type Event = Result<GenerationEvent, TransportError>;

/// Transport whose streams are fed by the test
#[derive(Default)]
pub struct ChannelTransport {
    senders: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    cancels: Mutex<Vec<CancellationToken>>,
    fail_open: Mutex<Option<TransportError>>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_open(&self, error: TransportError) {
        *self.fail_open.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> GenerationRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    pub fn cancel_token(&self, index: usize) -> CancellationToken {
        self.cancels.lock().unwrap()[index].clone()
    }

    /// Wait until `generate` has been called `count` times
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls() < count {
            settle().await;
        }
    }

    /// Push an event into the stream opened by call `index`
    pub fn emit(&self, index: usize, event: Event) {
        let senders = self.senders.lock().unwrap();
        let _ = senders[index].send(event);
    }

    pub fn delta(&self, index: usize, text: &str) {
        self.emit(index, Ok(GenerationEvent::Delta(text.to_string())));
    }

    pub fn done(&self, index: usize, full_text: &str) {
        self.emit(
            index,
            Ok(GenerationEvent::Done {
                full_text: full_text.to_string(),
                persisted_id: None,
            }),
        );
    }
}

#[async_trait]
impl GenerationTransport for ChannelTransport {
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationStream, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.cancels.lock().unwrap().push(cancel);

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);

        if let Some(error) = self.fail_open.lock().unwrap().take() {
            return Err(error);
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPersistence {
    appended: Mutex<Vec<(String, Role, String)>>,
    truncations: Mutex<Vec<(String, usize)>>,
    failing: AtomicBool,
}

impl RecordingPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let persistence = Self::default();
        persistence.failing.store(true, Ordering::SeqCst);
        Arc::new(persistence)
    }

    pub fn appended(&self) -> Vec<(String, Role, String)> {
        self.appended.lock().unwrap().clone()
    }

    pub fn texts(&self, role: Role) -> Vec<String> {
        self.appended()
            .into_iter()
            .filter(|(_, r, _)| *r == role)
            .map(|(_, _, text)| text)
            .collect()
    }

    pub fn truncations(&self) -> Vec<(String, usize)> {
        self.truncations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Persistence for RecordingPersistence {
    async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> Result<String, PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("database offline".to_string()));
        }
        let mut appended = self.appended.lock().unwrap();
        appended.push((conversation_id.to_string(), role, text.to_string()));
        Ok(format!("row-{}", appended.len()))
    }

    async fn truncate(&self, conversation_id: &str, keep: usize) -> Result<(), PersistenceError> {
        self.truncations
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), keep));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Media dispatch
// ---------------------------------------------------------------------------

type StatusResult = Result<JobStatusReport, DispatchError>;

/// Dispatch with scripted submit ids and status sequences
///
/// A job whose script is exhausted keeps reporting `generating`.
#[derive(Default)]
pub struct ScriptedDispatch {
    job_ids: Mutex<VecDeque<Result<String, DispatchError>>>,
    scripts: Mutex<HashMap<String, VecDeque<StatusResult>>>,
    submitted: Mutex<Vec<(MediaKind, String, String)>>,
    status_calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedDispatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn next_job(&self, result: Result<String, DispatchError>) {
        self.job_ids.lock().unwrap().push_back(result);
    }

    pub fn script(&self, job_id: &str, statuses: Vec<StatusResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), statuses.into());
    }

    pub fn submitted(&self) -> Vec<(MediaKind, String, String)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .count()
    }

    pub fn status_instants(&self, job_id: &str) -> Vec<Instant> {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, at)| *at)
            .collect()
    }

    fn submit(&self, kind: MediaKind, prompt: &str, model_id: &str) -> Result<String, DispatchError> {
        self.submitted
            .lock()
            .unwrap()
            .push((kind, prompt.to_string(), model_id.to_string()));
        self.job_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DispatchError::RequestFailed("no job scripted".to_string())))
    }
}

#[async_trait]
impl MediaDispatch for ScriptedDispatch {
    async fn submit_image_job(
        &self,
        prompt: &str,
        model_id: &str,
        _params: &MediaParams,
    ) -> Result<String, DispatchError> {
        self.submit(MediaKind::Image, prompt, model_id)
    }

    async fn submit_video_job(
        &self,
        prompt: &str,
        model_id: &str,
        _params: &MediaParams,
    ) -> Result<String, DispatchError> {
        self.submit(MediaKind::Video, prompt, model_id)
    }

    async fn status_of(&self, job_id: &str) -> Result<JobStatusReport, DispatchError> {
        self.status_calls
            .lock()
            .unwrap()
            .push((job_id.to_string(), Instant::now()));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(job_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(JobStatusReport::new(RemoteJobStatus::Generating)))
    }
}

// ---------------------------------------------------------------------------
// Summarizer and callbacks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingSummarizer {
    calls: AtomicUsize,
}

impl CountingSummarizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(
        &self,
        turns: &[ContextTurn],
        _max_tokens: usize,
    ) -> Result<String, SummarizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} earlier turns", turns.len()))
    }
}

#[derive(Default)]
pub struct RecordingCallbacks {
    pub increments: Mutex<Vec<String>>,
    pub completions: Mutex<Vec<(String, Option<String>)>>,
    pub errors: Mutex<Vec<GenerationFailure>>,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SessionCallbacks for RecordingCallbacks {
    fn on_increment(&self, text: &str) {
        self.increments.lock().unwrap().push(text.to_string());
    }

    fn on_complete(&self, full_text: &str, persisted_id: Option<&str>) {
        self.completions
            .lock()
            .unwrap()
            .push((full_text.to_string(), persisted_id.map(str::to_string)));
    }

    fn on_error(&self, failure: &GenerationFailure) {
        self.errors.lock().unwrap().push(failure.clone());
    }
}

// ---------------------------------------------------------------------------
// Engine harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: ChatEngine,
    pub transport: Arc<ChannelTransport>,
    pub persistence: Arc<RecordingPersistence>,
    pub dispatch: Arc<ScriptedDispatch>,
    pub summarizer: Arc<CountingSummarizer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), RecordingPersistence::new())
    }

    pub fn with(config: Config, persistence: Arc<RecordingPersistence>) -> Self {
        let transport = ChannelTransport::new();
        let dispatch = ScriptedDispatch::new();
        let summarizer = Arc::new(CountingSummarizer::default());

        let engine = ChatEngine::new(
            &config,
            EngineDeps {
                registry: Arc::new(config.registry()),
                summarizer: summarizer.clone(),
                transport: transport.clone(),
                persistence: persistence.clone(),
                dispatch: dispatch.clone(),
            },
        );

        Self {
            engine,
            transport,
            persistence,
            dispatch,
            summarizer,
        }
    }
}
