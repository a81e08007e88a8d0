//! In-process inference server.
//!
//! Owns the device selection and every loaded adapter. Start-up selects the
//! device once, then loads each configured model; a model that fails to load
//! is reported as unavailable instead of aborting the server. Requests for
//! one model run one at a time on a blocking thread.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::backend::{Adapter, AdapterConfig, BackendDispatcher};
use crate::codec::{RequestCodec, ResponseCodec, GENERATED_TEXT_OUTPUT};
use crate::config::Config;
use crate::device::{self, Accelerators, DeviceSelection};
use crate::error::{InferenceError, InferenceResult};
use crate::protocol::{
    InferRequest, InferResponse, ModelMetadata, ModelState, RepositoryModel, ServerMetadata,
    MODEL_VERSION,
};
use crate::types::ModelKind;

/// Name reported in server metadata.
pub const SERVER_NAME: &str = "glimpse";

pub struct InferenceServer {
    selection: DeviceSelection,
    dispatcher: BackendDispatcher,
    /// One permit per loaded model: requests to the same adapter never overlap
    lanes: HashMap<ModelKind, Arc<Semaphore>>,
    /// Load failures for configured models that are not serving
    unavailable: BTreeMap<ModelKind, String>,
}

impl InferenceServer {
    /// Select the device and load every configured model.
    ///
    /// Fails only if the configured device is unavailable. Blocks while the
    /// models load.
    pub fn start(config: &Config) -> InferenceResult<Self> {
        let selection =
            device::select_with_preference(config.device.preference, Accelerators::probe())?;
        tracing::info!("Selected device: {selection}");

        let mut adapters = Vec::new();
        let mut unavailable = BTreeMap::new();
        for &kind in &config.serving.models {
            let adapter_config = AdapterConfig::from_config(config, kind);
            match Adapter::initialize(kind, &adapter_config, selection) {
                Ok(adapter) => adapters.push(adapter),
                Err(e) => {
                    tracing::error!("Failed to load {kind}: {e}");
                    unavailable.insert(kind, e.to_string());
                }
            }
        }

        let server = Self::with_adapters(selection, adapters, unavailable);
        tracing::info!(
            "Serving {} of {} configured models",
            server.dispatcher.loaded().len(),
            config.serving.models.len()
        );
        Ok(server)
    }

    /// Build a server around adapters that are already loaded.
    pub fn with_adapters(
        selection: DeviceSelection,
        adapters: impl IntoIterator<Item = Adapter>,
        unavailable: BTreeMap<ModelKind, String>,
    ) -> Self {
        let dispatcher = BackendDispatcher::new(adapters);
        let lanes = dispatcher
            .loaded()
            .into_iter()
            .map(|kind| (kind, Arc::new(Semaphore::new(1))))
            .collect();
        Self {
            selection,
            dispatcher,
            lanes,
            unavailable,
        }
    }

    pub fn selection(&self) -> DeviceSelection {
        self.selection
    }

    /// The server is ready once it has started; it may be serving no models.
    pub fn is_ready(&self) -> bool {
        true
    }

    /// Whether `name` is a supported model with a loaded adapter.
    pub fn is_model_ready(&self, name: &str) -> InferenceResult<bool> {
        let kind: ModelKind = name.parse()?;
        Ok(self.dispatcher.is_loaded(kind))
    }

    pub fn metadata(&self) -> ServerMetadata {
        ServerMetadata {
            name: SERVER_NAME.to_string(),
            version: crate::VERSION.to_string(),
            extensions: vec!["model_repository".to_string()],
        }
    }

    pub fn model_metadata(&self, name: &str) -> InferenceResult<ModelMetadata> {
        let adapter = self.dispatcher.dispatch(name)?;
        let descriptor = adapter.descriptor();
        Ok(ModelMetadata::describe(descriptor.name, descriptor.output_dtype))
    }

    /// Every supported model with its load state.
    pub fn repository_index(&self) -> Vec<RepositoryModel> {
        ModelKind::ALL
            .into_iter()
            .map(|kind| {
                if self.dispatcher.is_loaded(kind) {
                    RepositoryModel {
                        name: kind.to_string(),
                        version: Some(MODEL_VERSION.to_string()),
                        state: Some(ModelState::Ready),
                        reason: String::new(),
                    }
                } else {
                    RepositoryModel {
                        name: kind.to_string(),
                        version: None,
                        state: Some(ModelState::Unavailable),
                        reason: self
                            .unavailable
                            .get(&kind)
                            .cloned()
                            .unwrap_or_else(|| "not configured".to_string()),
                    }
                }
            })
            .collect()
    }

    /// Run a single request.
    pub async fn infer(&self, model: &str, request: InferRequest) -> InferenceResult<InferResponse> {
        let mut results = self.execute(model, vec![request]).await?;
        results.pop().unwrap_or_else(|| {
            Err(InferenceError::generation(model, "batch produced no response"))
        })
    }

    /// Run a batch of requests against one model, in order.
    ///
    /// Routing failures fail the whole batch. After that each request
    /// succeeds or fails on its own; one bad image does not affect the rest.
    pub async fn execute(
        &self,
        model: &str,
        requests: Vec<InferRequest>,
    ) -> InferenceResult<Vec<InferenceResult<InferResponse>>> {
        let adapter = Arc::clone(self.dispatcher.dispatch(model)?);
        let kind = adapter.kind();
        let lane = self
            .lanes
            .get(&kind)
            .cloned()
            .ok_or_else(|| InferenceError::ModelNotReady {
                name: model.to_string(),
            })?;

        let permit = lane
            .acquire_owned()
            .await
            .map_err(|_| InferenceError::ModelNotReady {
                name: model.to_string(),
            })?;

        // The permit moves into the blocking task: a caller that stops
        // waiting does not free the lane while compute is still running.
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            requests
                .iter()
                .map(|request| {
                    let result = execute_one(&adapter, request);
                    if let Err(e) = &result {
                        tracing::warn!("{kind} request {:?} failed: {e}", request.id);
                    }
                    result
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| InferenceError::generation(kind.as_str(), format!("inference task failed: {e}")))
    }

    /// Finalize every adapter.
    pub fn shutdown(self) {
        for adapter in self.dispatcher.into_adapters() {
            match Arc::try_unwrap(adapter) {
                Ok(adapter) => adapter.finalize(),
                Err(adapter) => {
                    tracing::warn!("{} is still in use; skipping cleanup", adapter.kind())
                }
            }
        }
    }
}

/// Decode, infer and encode one request. Runs on a blocking thread.
fn execute_one(adapter: &Adapter, request: &InferRequest) -> InferenceResult<InferResponse> {
    if let Some(unknown) = request
        .outputs
        .iter()
        .find(|o| o.name != GENERATED_TEXT_OUTPUT)
    {
        return Err(InferenceError::decode(format!(
            "unknown output '{}'",
            unknown.name
        )));
    }

    let decoded = RequestCodec::decode_inputs(&request.inputs)?;
    let response = adapter.infer(&decoded)?;
    let descriptor = adapter.descriptor();
    let output = ResponseCodec::encode(&response, descriptor.output_dtype)?;

    Ok(InferResponse {
        model_name: descriptor.name.to_string(),
        model_version: Some(MODEL_VERSION.to_string()),
        id: request.id.clone(),
        outputs: vec![output],
    })
}
