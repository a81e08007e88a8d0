//! Routing from model names to loaded adapters.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{InferenceError, InferenceResult};
use crate::types::ModelKind;

use super::Adapter;

/// Maps each loaded model to its adapter.
///
/// Built once at start-up and read-only afterwards.
#[derive(Debug, Default)]
pub struct BackendDispatcher {
    adapters: HashMap<ModelKind, Arc<Adapter>>,
}

impl BackendDispatcher {
    /// Index adapters by model. A second adapter for the same model is dropped.
    pub fn new(adapters: impl IntoIterator<Item = Adapter>) -> Self {
        let mut map = HashMap::new();
        for adapter in adapters {
            let kind = adapter.kind();
            if map.contains_key(&kind) {
                tracing::warn!("Ignoring duplicate adapter for {kind}");
                adapter.finalize();
                continue;
            }
            map.insert(kind, Arc::new(adapter));
        }
        Self { adapters: map }
    }

    /// Resolve a wire name to its adapter.
    ///
    /// Unknown names fail with `UnsupportedModel`; supported models that
    /// are not loaded fail with `ModelNotReady`.
    pub fn dispatch(&self, name: &str) -> InferenceResult<&Arc<Adapter>> {
        let kind: ModelKind = name.parse()?;
        self.get(kind).ok_or_else(|| InferenceError::ModelNotReady {
            name: name.to_string(),
        })
    }

    pub fn get(&self, kind: ModelKind) -> Option<&Arc<Adapter>> {
        self.adapters.get(&kind)
    }

    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Loaded models in stable order.
    pub fn loaded(&self) -> Vec<ModelKind> {
        let mut kinds: Vec<ModelKind> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Give up ownership of every adapter.
    pub fn into_adapters(self) -> Vec<Arc<Adapter>> {
        self.adapters.into_values().collect()
    }
}
