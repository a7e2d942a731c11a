//! Loaded models and the contexts they own.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hub_engine::{HubError, ModelParams, NativeBackend, NativeModel, Result};
use hub_kv::ContextWindow;
use parking_lot::Mutex;

use crate::HubConfig;

/// A context window shared between its owning model and the session using it.
pub type SharedContext = Arc<Mutex<ContextWindow>>;

/// Weights loaded for one configured model, plus the contexts created from them.
pub struct LoadedModel {
    params: ModelParams,
    native: Arc<dyn NativeModel>,
    contexts: Mutex<HashMap<String, SharedContext>>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.params.name)
            .field("contexts", &self.context_count())
            .finish()
    }
}

impl LoadedModel {
    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Allocate a context bound to `id`.
    ///
    /// # Errors
    /// - `ContextAlreadyExists`: `id` is already bound on this model
    pub fn create_context(&self, id: &str) -> Result<SharedContext> {
        self.create_context_capped(id, None)
    }

    /// Allocate a context bound to `id` unless the model already holds
    /// `cap` contexts. The check and the insert happen under one lock.
    ///
    /// # Errors
    /// - `ContextAlreadyExists`: `id` is already bound on this model
    /// - `MaxInstancesReached`: the model holds `cap` contexts
    pub fn create_context_capped(&self, id: &str, cap: Option<usize>) -> Result<SharedContext> {
        let mut contexts = self.contexts.lock();
        if contexts.contains_key(id) {
            return Err(HubError::ContextAlreadyExists(id.to_string()));
        }
        if let Some(cap) = cap {
            if contexts.len() >= cap {
                return Err(HubError::MaxInstancesReached {
                    model: self.params.name.clone(),
                    max: self.params.max_instances,
                });
            }
        }

        let native = self.native.new_context(&self.params)?;
        let window = Arc::new(Mutex::new(ContextWindow::new(
            id,
            native,
            self.params.batch_size,
        )));
        contexts.insert(id.to_string(), Arc::clone(&window));
        tracing::debug!(model = %self.params.name, context = id, n_ctx = self.params.context_size, "context created");
        Ok(window)
    }

    pub fn get_context(&self, id: &str) -> Option<SharedContext> {
        self.contexts.lock().get(id).cloned()
    }

    /// Detach and release the context bound to `id`.
    pub fn remove_context(&self, id: &str) -> bool {
        let removed = self.contexts.lock().remove(id);
        match removed {
            Some(window) => {
                window.lock().release();
                tracing::debug!(model = %self.params.name, context = id, "context removed");
                true
            }
            None => false,
        }
    }

    pub fn context_count(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn context_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn release_all(&self) {
        let drained: Vec<SharedContext> = self.contexts.lock().drain().map(|(_, w)| w).collect();
        for window in drained {
            window.lock().release();
        }
    }
}

/// Loads each configured model at most once and hands out its contexts.
pub struct ModelRegistry {
    backend: Arc<dyn NativeBackend>,
    configured: DashMap<String, ModelParams>,
    loaded: DashMap<String, Arc<LoadedModel>>,
}

impl ModelRegistry {
    pub fn new(backend: Arc<dyn NativeBackend>) -> Self {
        Self {
            backend,
            configured: DashMap::new(),
            loaded: DashMap::new(),
        }
    }

    /// Registry knowing every model in `config`.
    pub fn with_config(backend: Arc<dyn NativeBackend>, config: &HubConfig) -> Self {
        let registry = Self::new(backend);
        for params in &config.models {
            registry.register(params.clone());
        }
        registry
    }

    /// Make a model available by name. Does not load it.
    pub fn register(&self, params: ModelParams) {
        self.configured.insert(params.name.clone(), params);
    }

    pub fn configured(&self, name: &str) -> Option<ModelParams> {
        self.configured.get(name).map(|p| p.value().clone())
    }

    pub fn configured_models(&self) -> Vec<ModelParams> {
        let mut models: Vec<ModelParams> =
            self.configured.iter().map(|p| p.value().clone()).collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    /// Load `params.name`, or return the instance already loaded under it.
    ///
    /// # Errors
    /// - `ModelLoad`: the model file is missing or the backend failed
    pub fn load(&self, params: &ModelParams) -> Result<Arc<LoadedModel>> {
        match self.loaded.entry(params.name.clone()) {
            Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                if !Path::new(&params.model_path).exists() {
                    return Err(HubError::ModelLoad(format!(
                        "model file {} not found",
                        params.model_path
                    )));
                }
                let native = self.backend.load_model(params)?;
                tracing::info!(model = %params.name, path = %params.model_path, "model loaded");
                let model = Arc::new(LoadedModel {
                    params: params.clone(),
                    native,
                    contexts: Mutex::new(HashMap::new()),
                });
                slot.insert(Arc::clone(&model));
                Ok(model)
            }
        }
    }

    /// Loaded model for a configured name, loading it on first use.
    ///
    /// # Errors
    /// - `ModelNotFound`: no model is configured under `name`
    /// - `ModelLoad`: see [`load`](Self::load)
    pub fn resolve(&self, name: &str) -> Result<Arc<LoadedModel>> {
        if let Some(model) = self.get(name) {
            return Ok(model);
        }
        let params = self
            .configured(name)
            .ok_or_else(|| HubError::ModelNotFound(name.to_string()))?;
        self.load(&params)
    }

    pub fn get(&self, name: &str) -> Option<Arc<LoadedModel>> {
        self.loaded.get(name).map(|m| Arc::clone(m.value()))
    }

    /// Drop the weights of `name` and release every context created from them.
    pub fn unload(&self, name: &str) -> bool {
        match self.loaded.remove(name) {
            Some((_, model)) => {
                model.release_all();
                tracing::info!(model = name, "model unloaded");
                true
            }
            None => false,
        }
    }

    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.iter().map(|m| m.key().clone()).collect();
        names.sort();
        names
    }
}
