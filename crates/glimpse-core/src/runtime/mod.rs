//! ONNX Runtime implementations of the native model interfaces.
//!
//! Each model directory holds the same four files:
//!
//! ```text
//! {model_dir}/{model}/
//!   vision_encoder{suffix}.onnx
//!   embed_tokens{suffix}.onnx
//!   decoder_model{suffix}.onnx
//!   tokenizer.json
//! ```
//!
//! `suffix` is `_fp16` for half precision and empty for full precision.
//! LLaVA also reads its chat template from `chat_template.json` or
//! `tokenizer_config.json` in the same directory when present.

pub mod generate;
pub mod kosmos2;
pub mod llava;
pub mod moondream;
pub mod preprocess;
pub mod session;
pub mod template;

use std::path::{Path, PathBuf};

use tokenizers::Tokenizer;

use crate::device::{DeviceSelection, Precision};
use crate::error::{InferenceError, InferenceResult, RuntimeError};
use crate::types::ModelKind;

use generate::LanguageModel;
use session::{Decoder, TokenEmbedder, VisionEncoder};

pub use kosmos2::OrtKosmos2;
pub use llava::OrtLlava;
pub use moondream::OrtMoondream;

/// ONNX graph stems, in download order.
pub const GRAPH_STEMS: [&str; 3] = ["vision_encoder", "embed_tokens", "decoder_model"];

/// Tokenizer file name.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Resolved file paths for one model at one precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub vision_encoder: PathBuf,
    pub embed_tokens: PathBuf,
    pub decoder: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    pub fn new(dir: &Path, precision: Precision) -> Self {
        let suffix = precision.onnx_suffix();
        let graph = |stem: &str| dir.join(format!("{stem}{suffix}.onnx"));
        Self {
            vision_encoder: graph(GRAPH_STEMS[0]),
            embed_tokens: graph(GRAPH_STEMS[1]),
            decoder: graph(GRAPH_STEMS[2]),
            tokenizer: dir.join(TOKENIZER_FILE),
        }
    }

    /// File names (relative to the model directory) needed for `precision`.
    pub fn file_names(precision: Precision) -> Vec<String> {
        let suffix = precision.onnx_suffix();
        GRAPH_STEMS
            .iter()
            .map(|stem| format!("{stem}{suffix}.onnx"))
            .chain(std::iter::once(TOKENIZER_FILE.to_string()))
            .collect()
    }

    /// Every path, for existence checks.
    pub fn all(&self) -> [&Path; 4] {
        [
            &self.vision_encoder,
            &self.embed_tokens,
            &self.decoder,
            &self.tokenizer,
        ]
    }

    /// Whether every file is present.
    pub fn is_complete(&self) -> bool {
        self.all().iter().all(|p| p.exists())
    }

    /// Fail with a model error naming the first missing file.
    pub fn ensure_present(&self, kind: ModelKind) -> InferenceResult<()> {
        match self.all().into_iter().find(|p| !p.exists()) {
            Some(missing) => Err(InferenceError::model(
                kind.as_str(),
                format!(
                    "missing {} (configure [models.{kind}.onnx] and run \
                     `glimpse models download {kind}`, or copy the ONNX export there)",
                    missing.display()
                ),
            )),
            None => Ok(()),
        }
    }
}

/// Sessions and tokenizer shared by every model implementation.
pub(crate) struct LoadedModel {
    pub vision: VisionEncoder,
    pub language: LanguageModel,
    pub tokenizer: Tokenizer,
}

impl LoadedModel {
    pub fn load(kind: ModelKind, dir: &Path, selection: DeviceSelection) -> InferenceResult<Self> {
        let files = ModelFiles::new(dir, selection.precision);
        files.ensure_present(kind)?;

        let model_err = |e: RuntimeError| InferenceError::model(kind.as_str(), e.to_string());
        let vision = VisionEncoder::load(&files.vision_encoder, selection).map_err(model_err)?;
        let embedder = TokenEmbedder::load(&files.embed_tokens, selection).map_err(model_err)?;
        let decoder = Decoder::load(&files.decoder, selection).map_err(model_err)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| {
            model_err(RuntimeError::Load {
                path: files.tokenizer.clone(),
                message: e.to_string(),
            })
        })?;

        tracing::info!("Loaded {kind} from {:?} on {selection}", dir);

        Ok(Self {
            vision,
            language: LanguageModel { embedder, decoder },
            tokenizer,
        })
    }

    /// Id of a special token that must exist in the vocabulary.
    pub fn token_id(&self, kind: ModelKind, token: &str) -> InferenceResult<u32> {
        self.tokenizer.token_to_id(token).ok_or_else(|| {
            InferenceError::model(kind.as_str(), format!("tokenizer has no {token:?} token"))
        })
    }

    /// Token ids for `text`.
    pub fn encode(&self, kind: ModelKind, text: &str, add_special_tokens: bool) -> InferenceResult<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| InferenceError::generation(kind.as_str(), format!("Tokenization failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Text for `ids`, with special tokens removed.
    pub fn decode(&self, kind: ModelKind, ids: &[u32]) -> InferenceResult<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| InferenceError::generation(kind.as_str(), format!("Detokenization failed: {e}")))
    }
}
