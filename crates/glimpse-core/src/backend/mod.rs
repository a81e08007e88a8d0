//! Per-model backend adapters.
//!
//! Each adapter hides one model's native call convention behind the same
//! `infer(request) -> response` contract. Adapters are created once at
//! start-up, bound to a device, and never retried or reloaded.

pub mod dispatch;
pub mod kosmos2;
pub mod llava;
pub mod moondream;

use std::path::PathBuf;

use crate::codec::DataType;
use crate::config::Config;
use crate::device::DeviceSelection;
use crate::error::InferenceResult;
use crate::types::{InferenceRequest, InferenceResponse, ModelDescriptor, ModelKind};

pub use dispatch::BackendDispatcher;
pub use kosmos2::{GroundedInputs, Kosmos2Adapter, Kosmos2Model};
pub use llava::{
    ChatTurn, ContentPart, LlavaAdapter, LlavaInputs, LlavaModel, Role, ASSISTANT_DELIMITER,
};
pub use moondream::{ImageEmbedding, MoondreamAdapter, MoondreamModel};

/// Everything an adapter needs to load its model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Directory holding this model's files
    pub model_dir: PathBuf,
    /// Declared dtype of the `generated_text` output
    pub output_dtype: DataType,
}

impl AdapterConfig {
    pub fn from_config(config: &Config, kind: ModelKind) -> Self {
        Self {
            model_dir: config.model_path(kind),
            output_dtype: config.serving.output_dtype,
        }
    }

    /// Descriptor for a model loaded with this config.
    pub fn descriptor(&self, kind: ModelKind, selection: DeviceSelection) -> ModelDescriptor {
        ModelDescriptor {
            name: kind,
            output_dtype: self.output_dtype,
            device: selection.device,
            precision: selection.precision,
        }
    }
}

/// Lifecycle and inference contract shared by every model adapter.
///
/// `initialize` runs once per process; `infer` handles one request at a time
/// and must not change adapter state; `finalize` consumes the adapter.
pub trait BackendAdapter: Send + Sync + Sized {
    /// Model served by this adapter.
    const KIND: ModelKind;

    /// Load the model onto the selected device.
    fn initialize(config: &AdapterConfig, selection: DeviceSelection) -> InferenceResult<Self>;

    /// Descriptor fixed at initialization.
    fn descriptor(&self) -> &ModelDescriptor;

    /// Generate text for one decoded request.
    fn infer(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse>;

    /// Release model resources.
    fn finalize(self) {
        tracing::info!("Cleaning up {}...", Self::KIND);
    }
}

/// A loaded adapter for one of the supported models.
pub enum Adapter {
    Moondream2(MoondreamAdapter),
    Kosmos2(Kosmos2Adapter),
    Llava(LlavaAdapter),
}

impl Adapter {
    /// Load the adapter for `kind`.
    pub fn initialize(
        kind: ModelKind,
        config: &AdapterConfig,
        selection: DeviceSelection,
    ) -> InferenceResult<Self> {
        tracing::info!("Initializing {kind} on {selection}");
        Ok(match kind {
            ModelKind::Moondream2 => Adapter::Moondream2(MoondreamAdapter::initialize(config, selection)?),
            ModelKind::Kosmos2 => Adapter::Kosmos2(Kosmos2Adapter::initialize(config, selection)?),
            ModelKind::Llava => Adapter::Llava(LlavaAdapter::initialize(config, selection)?),
        })
    }

    /// Load the adapter for a model given by wire name.
    ///
    /// Unknown names fail with `UnsupportedModel` before anything is loaded.
    pub fn initialize_named(
        name: &str,
        config: &AdapterConfig,
        selection: DeviceSelection,
    ) -> InferenceResult<Self> {
        let kind: ModelKind = name.parse()?;
        Self::initialize(kind, config, selection)
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Adapter::Moondream2(_) => MoondreamAdapter::KIND,
            Adapter::Kosmos2(_) => Kosmos2Adapter::KIND,
            Adapter::Llava(_) => LlavaAdapter::KIND,
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        match self {
            Adapter::Moondream2(a) => a.descriptor(),
            Adapter::Kosmos2(a) => a.descriptor(),
            Adapter::Llava(a) => a.descriptor(),
        }
    }

    pub fn infer(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        match self {
            Adapter::Moondream2(a) => a.infer(request),
            Adapter::Kosmos2(a) => a.infer(request),
            Adapter::Llava(a) => a.infer(request),
        }
    }

    pub fn finalize(self) {
        match self {
            Adapter::Moondream2(a) => a.finalize(),
            Adapter::Kosmos2(a) => a.finalize(),
            Adapter::Llava(a) => a.finalize(),
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("descriptor", self.descriptor())
            .finish()
    }
}

/// In-memory native models for exercising adapters without model files.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use image::DynamicImage;
    use ndarray::{Array2, Array4};

    use super::*;
    use crate::error::InferenceError;

    pub fn descriptor(kind: ModelKind) -> ModelDescriptor {
        AdapterConfig {
            model_dir: PathBuf::from("/nonexistent"),
            output_dtype: DataType::Bytes,
        }
        .descriptor(kind, DeviceSelection::cpu())
    }

    /// Kosmos-2 stand-in: echoes the prompt followed by `caption`.
    ///
    /// The first `failures` calls to `generate` fail; later calls succeed.
    pub struct FakeKosmos2 {
        pub caption: String,
        pub failures: AtomicUsize,
    }

    impl FakeKosmos2 {
        pub fn new(caption: &str) -> Self {
            Self::failing(caption, 0)
        }

        pub fn failing(caption: &str, failures: usize) -> Self {
            Self {
                caption: caption.to_string(),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    impl Kosmos2Model for FakeKosmos2 {
        fn process(&self, prompt: &str, _image: &DynamicImage) -> InferenceResult<GroundedInputs> {
            let input_ids: Vec<u32> = prompt.bytes().map(u32::from).collect();
            Ok(GroundedInputs {
                pixel_values: Array4::zeros((1, 3, 2, 2)),
                attention_mask: vec![1; input_ids.len()],
                image_embeds_position_mask: vec![false; input_ids.len()],
                input_ids,
            })
        }

        fn generate(&self, inputs: &GroundedInputs, _max_new_tokens: usize) -> InferenceResult<Vec<u32>> {
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(InferenceError::generation("kosmos2", "device lost"));
            }
            let mut ids = inputs.input_ids.clone();
            ids.extend(self.caption.bytes().map(u32::from));
            Ok(ids)
        }

        fn batch_decode(&self, ids: &[u32]) -> InferenceResult<String> {
            Ok(ids.iter().map(|&b| b as u8 as char).collect())
        }
    }

    /// LLaVA stand-in: decodes to `"{template} {answer}"`.
    pub struct FakeLlava {
        pub answer: String,
    }

    impl LlavaModel for FakeLlava {
        fn apply_chat_template(
            &self,
            conversation: &[ChatTurn],
            _add_generation_prompt: bool,
        ) -> InferenceResult<String> {
            let text = conversation
                .iter()
                .flat_map(|turn| turn.content.iter())
                .filter_map(|part| match part {
                    ContentPart::Text(t) => Some(t.as_str()),
                    ContentPart::Image => None,
                })
                .collect::<Vec<_>>()
                .join(" ");
            Ok(format!("[INST] <image>\n{text} [/INST]"))
        }

        fn prepare(&self, _image: &DynamicImage, text: &str) -> InferenceResult<LlavaInputs> {
            let input_ids: Vec<u32> = text.chars().map(u32::from).collect();
            Ok(LlavaInputs {
                pixel_values: Array4::zeros((1, 3, 2, 2)),
                attention_mask: vec![1; input_ids.len()],
                input_ids,
            })
        }

        fn generate(&self, inputs: &LlavaInputs, _max_new_tokens: usize) -> InferenceResult<Vec<u32>> {
            let mut ids = inputs.input_ids.clone();
            ids.extend(format!(" {}", self.answer).chars().map(u32::from));
            Ok(ids)
        }

        fn decode(&self, ids: &[u32]) -> InferenceResult<String> {
            Ok(ids.iter().filter_map(|&c| char::from_u32(c)).collect())
        }
    }

    /// Moondream stand-in: answers with a fixed string and counts calls.
    pub struct FakeMoondream {
        pub answer: String,
        pub calls: Arc<AtomicUsize>,
    }

    impl MoondreamModel for FakeMoondream {
        fn encode_image(&self, image: &DynamicImage) -> InferenceResult<ImageEmbedding> {
            Ok(ImageEmbedding {
                embeds: Array2::zeros((image.width() as usize, 4)),
            })
        }

        fn answer_question(&self, _embedding: &ImageEmbedding, _question: &str) -> InferenceResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    /// Moondream stand-in that blocks for `delay` and records how many
    /// calls overlap.
    pub struct SlowMoondream {
        pub delay: Duration,
        pub active: Arc<AtomicUsize>,
        pub peak: Arc<AtomicUsize>,
    }

    impl MoondreamModel for SlowMoondream {
        fn encode_image(&self, _image: &DynamicImage) -> InferenceResult<ImageEmbedding> {
            Ok(ImageEmbedding {
                embeds: Array2::zeros((1, 4)),
            })
        }

        fn answer_question(&self, _embedding: &ImageEmbedding, _question: &str) -> InferenceResult<String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("Slowly described.".to_string())
        }
    }

    /// An adapter for `kind` backed by an in-memory model.
    pub fn fake_adapter(kind: ModelKind) -> Adapter {
        match kind {
            ModelKind::Moondream2 => Adapter::Moondream2(MoondreamAdapter::with_model(
                descriptor(kind),
                Box::new(FakeMoondream {
                    answer: "A cat on a mat.".to_string(),
                    calls: Arc::new(AtomicUsize::new(0)),
                }),
            )),
            ModelKind::Kosmos2 => Adapter::Kosmos2(Kosmos2Adapter::with_model(
                descriptor(kind),
                Box::new(FakeKosmos2::new(" A dog in a park.")),
            )),
            ModelKind::Llava => Adapter::Llava(LlavaAdapter::with_model(
                descriptor(kind),
                Box::new(FakeLlava {
                    answer: "A red bicycle.".to_string(),
                }),
            )),
        }
    }

    pub fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::new(8, 8))
    }

    /// A 256x256 gradient photo stand-in.
    pub fn photo() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_fn(256, 256, |x, y| {
            image::Rgb([x as u8, y as u8, (x ^ y) as u8])
        }))
    }
}
