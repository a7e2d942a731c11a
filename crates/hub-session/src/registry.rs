//! Session lookup, lifecycle and fragment streaming.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::Stream;
use hub_engine::{HubError, Result};
use hub_executor::{Generation, StopReason};
use hub_models::ModelRegistry;
use hub_runtime::{InferenceTimer, TelemetryHook, TracingTelemetry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::filter::KeywordFilter;
use crate::fragment::InferFragment;
use crate::session::Session;

/// Maps session ids to live sessions.
///
/// Different sessions run concurrently; calls on one session are
/// serialized, and a second concurrent call fails with `SessionBusy`.
pub struct SessionRegistry {
    models: Arc<ModelRegistry>,
    sessions: DashMap<String, Arc<Session>>,
    telemetry: Arc<dyn TelemetryHook>,
}

impl SessionRegistry {
    pub fn new(models: Arc<ModelRegistry>) -> Self {
        Self::with_telemetry(models, Arc::new(TracingTelemetry))
    }

    pub fn with_telemetry(models: Arc<ModelRegistry>, telemetry: Arc<dyn TelemetryHook>) -> Self {
        Self {
            models,
            sessions: DashMap::new(),
            telemetry,
        }
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    /// Create (or replace) the session `id` and prime it with its prompt.
    ///
    /// An existing session with the same id is removed first. On error no
    /// session is registered and no context is left on the model.
    pub async fn create(&self, id: &str, config: SessionConfig) -> Result<Arc<Session>> {
        if self.remove(id) {
            tracing::debug!(session = id, "replacing existing session");
        }

        let models = Arc::clone(&self.models);
        let session_id = id.to_string();
        let session = tokio::task::spawn_blocking(move || Session::open(&models, &session_id, config))
            .await
            .map_err(|err| HubError::NativeEval(err.to_string()))??;
        let session = Arc::new(session);

        // A racing create for the same id on another model.
        if let Some(previous) = self.sessions.insert(id.to_string(), Arc::clone(&session)) {
            previous.close();
        }
        tracing::info!(
            session = id,
            model = %session.config().model,
            kind = %session.kind(),
            "session created"
        );
        Ok(session)
    }

    /// Cancel in-flight generation and release the session's context.
    pub fn remove(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close();
                tracing::info!(session = id, "session removed");
                true
            }
            None => false,
        }
    }

    /// Stop the session's in-flight call without removing the session.
    pub fn cancel(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .map(|session| session.cancel())
            .unwrap_or(false)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn count_for_model(&self, model: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().config().model == model)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn infer(
        &self,
        id: &str,
        text: &str,
    ) -> impl Stream<Item = Result<InferFragment>> + Send + 'static {
        self.infer_with_cancel(id, text, None)
    }

    /// Run one call on session `id` as a stream of fragments.
    ///
    /// An unknown id gives an empty stream. Otherwise the stream is one
    /// `is_first` fragment, the generated text, then one `is_last` fragment.
    /// A failure is yielded as an `Err` and ends the stream without the
    /// last fragment. Dropping the stream cancels the call.
    pub fn infer_with_cancel(
        &self,
        id: &str,
        text: &str,
        cancel: Option<CancellationToken>,
    ) -> impl Stream<Item = Result<InferFragment>> + Send + 'static {
        let session = self.get(id);
        let session_id = id.to_string();
        let text = text.to_string();
        let telemetry = Arc::clone(&self.telemetry);

        async_stream::stream! {
            let session = match session {
                Some(session) => session,
                None => {
                    tracing::debug!(session = %session_id, "infer on unknown session");
                    return;
                }
            };
            let executor = match session.try_lock_executor() {
                Ok(executor) => executor,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let response_id = Uuid::new_v4().to_string();
            let call = session.start_call(cancel);
            // Cancels the call if the consumer drops the stream.
            let _disconnect = call.clone().drop_guard();
            let mut timer = InferenceTimer::new(session_id.clone(), Box::new(telemetry));
            let mut filter = KeywordFilter::new(session.config().output_filters());

            yield Ok(InferFragment::first(&response_id));

            let (tx, mut rx) = mpsc::channel::<Result<String>>(1);
            let worker_cancel = call.clone();
            let worker = tokio::task::spawn_blocking(move || -> Result<StopReason> {
                let mut generation = Generation::start(executor, &text, worker_cancel)?;
                while let Some(item) = generation.next() {
                    if tx.blocking_send(item).is_err() {
                        break;
                    }
                }
                Ok(generation.stop_reason().unwrap_or(StopReason::Cancelled))
            });

            let mut failed = false;
            while let Some(item) = rx.recv().await {
                match item {
                    Ok(piece) => {
                        timer.mark_fragment();
                        let visible = filter.push(&piece);
                        if !visible.is_empty() {
                            yield Ok(InferFragment::content(&response_id, visible));
                        }
                    }
                    Err(err) => {
                        tracing::warn!(session = %session_id, error = %err, "generation failed");
                        failed = true;
                        yield Err(err);
                        break;
                    }
                }
            }

            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(err) => Err(HubError::NativeEval(err.to_string())),
            };
            session.end_call();

            let reason = match outcome {
                Ok(StopReason::Failed) => return,
                Ok(reason) => reason,
                Err(err) => {
                    if !failed {
                        tracing::warn!(session = %session_id, error = %err, "call failed to start");
                        yield Err(err);
                    }
                    return;
                }
            };
            if failed {
                return;
            }

            let rest = filter.finish();
            if !rest.is_empty() {
                yield Ok(InferFragment::content(&response_id, rest));
            }
            let cancelled = reason == StopReason::Cancelled;
            let metrics = timer.finish(cancelled);
            tracing::debug!(session = %session_id, reason = ?reason, "fragment stream finished");
            yield Ok(InferFragment::last(&response_id, metrics.elapsed_ms as u64, cancelled));
        }
    }

    /// Persist the session's context to `path`.
    pub async fn save_state(&self, id: &str, path: impl Into<PathBuf>) -> Result<usize> {
        let session = self
            .get(id)
            .ok_or_else(|| HubError::SessionNotFound(id.to_string()))?;
        let executor = session.try_lock_executor()?;
        let path = path.into();
        tokio::task::spawn_blocking(move || executor.save_state_file(&path))
            .await
            .map_err(|err| HubError::NativeEval(err.to_string()))?
    }

    /// Replace the session's context with the one saved at `path`.
    pub async fn load_state(&self, id: &str, path: impl Into<PathBuf>) -> Result<()> {
        let session = self
            .get(id)
            .ok_or_else(|| HubError::SessionNotFound(id.to_string()))?;
        let mut executor = session.try_lock_executor()?;
        let path = path.into();
        tokio::task::spawn_blocking(move || executor.load_state_file(&path))
            .await
            .map_err(|err| HubError::NativeEval(err.to_string()))?
    }
}
