//! One session: a context window, the executor driving it, and its
//! cancellation handles.

use std::sync::Arc;

use hub_engine::{HubError, Result};
use hub_executor::{Executor, ExecutorKind};
use hub_models::{LoadedModel, ModelRegistry, SharedContext};
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;

pub struct Session {
    id: String,
    config: SessionConfig,
    model: Arc<LoadedModel>,
    window: SharedContext,
    /// Held for the whole of a call, so a session runs one call at a time.
    executor: Arc<tokio::sync::Mutex<Executor>>,
    /// Cancelled when the session is removed; every call token is a child.
    lifetime: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("model", &self.config.model)
            .field("executor", &self.config.executor_type)
            .finish()
    }
}

impl Session {
    /// Allocate a context on the configured model and prime it with the
    /// configured prompt. Blocks while the prompt is evaluated.
    ///
    /// # Errors
    /// - `ModelNotFound`: the model is not configured
    /// - `ContextAlreadyExists`: `id` is still bound on the model
    /// - `MaxInstancesReached`: the model is at its instance cap
    /// - any native failure while priming; the context is released again
    pub fn open(models: &ModelRegistry, id: &str, config: SessionConfig) -> Result<Self> {
        let model = models.resolve(&config.model)?;
        let cap = usize::try_from(model.params().max_instances).ok();
        let window = model.create_context_capped(id, cap)?;

        let primed = Executor::new(
            config.executor_type,
            Arc::clone(&window),
            config.inference_params(),
            model.params().seed,
        )
        .and_then(|mut executor| {
            executor.prime(&config.prompt)?;
            Ok(executor)
        });
        let executor = match primed {
            Ok(executor) => executor,
            Err(err) => {
                model.remove_context(id);
                return Err(err);
            }
        };

        Ok(Self {
            id: id.to_string(),
            config,
            model,
            window,
            executor: Arc::new(tokio::sync::Mutex::new(executor)),
            lifetime: CancellationToken::new(),
            current: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn kind(&self) -> ExecutorKind {
        self.config.executor_type
    }

    pub fn model(&self) -> &Arc<LoadedModel> {
        &self.model
    }

    /// The context window. Locking it while a call runs stalls that call.
    pub fn context(&self) -> &SharedContext {
        &self.window
    }

    pub fn is_closed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// Whether a call currently holds the executor.
    pub fn is_busy(&self) -> bool {
        self.executor.try_lock().is_err()
    }

    /// Signal the in-flight call, if any, to stop. The session stays usable.
    pub fn cancel(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel any in-flight call and release the context from its model.
    pub(crate) fn close(&self) {
        self.lifetime.cancel();
        self.model.remove_context(&self.id);
    }

    pub(crate) fn try_lock_executor(&self) -> Result<OwnedMutexGuard<Executor>> {
        Arc::clone(&self.executor)
            .try_lock_owned()
            .map_err(|_| HubError::SessionBusy(self.id.clone()))
    }

    /// Token for a new call. It fires when the session is removed, when
    /// [`cancel`](Self::cancel) is called, or when `external` fires.
    pub(crate) fn start_call(&self, external: Option<CancellationToken>) -> CancellationToken {
        let call = self.lifetime.child_token();
        if let Some(external) = external {
            let linked = call.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = external.cancelled() => linked.cancel(),
                    _ = linked.cancelled() => {}
                }
            });
        }
        *self.current.lock() = Some(call.clone());
        call
    }

    pub(crate) fn end_call(&self) {
        self.current.lock().take();
    }
}
