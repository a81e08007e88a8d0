//! Client for requesting image descriptions from an inference server.
//!
//! Images are normalized to PNG before sending, whatever their source. The
//! client adds no retries and no timeouts; transport failures surface as
//! [`InferenceError::Transport`].

mod transport;

pub use transport::{HttpTransport, LocalTransport, Transport};

use std::path::PathBuf;

use image::DynamicImage;

use crate::codec::{image_to_png, normalize_image_bytes, RequestCodec, ResponseCodec};
use crate::error::{InferenceError, InferenceResult};
use crate::protocol::{InferRequest, ModelMetadata, RepositoryModel, ServerMetadata};
use crate::types::ModelKind;

/// Default server address.
pub const DEFAULT_URL: &str = "http://localhost:8000";

/// Where an image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Encoded image file on disk
    Path(PathBuf),
    /// Decoded in-memory image
    Image(DynamicImage),
    /// Encoded image bytes in any supported format
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// PNG bytes for this image.
    pub async fn to_png(&self) -> InferenceResult<Vec<u8>> {
        match self {
            ImageSource::Path(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| InferenceError::Decode {
                    message: format!("Failed to read image {}: {e}", path.display()),
                })?;
                normalize_image_bytes(&bytes)
            }
            ImageSource::Image(image) => image_to_png(image),
            ImageSource::Bytes(bytes) => normalize_image_bytes(bytes),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&std::path::Path> for ImageSource {
    fn from(path: &std::path::Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        ImageSource::Image(image)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

pub struct GlimpseClient {
    transport: Box<dyn Transport>,
}

impl GlimpseClient {
    /// HTTP client for the server at `url`.
    pub fn new(url: &str) -> Self {
        Self::with_transport(Box::new(HttpTransport::new(url)))
    }

    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn is_server_ready(&self) -> InferenceResult<bool> {
        self.transport.server_ready().await
    }

    pub async fn is_model_ready(&self, model: &str) -> InferenceResult<bool> {
        self.transport.model_ready(model).await
    }

    pub async fn server_metadata(&self) -> InferenceResult<ServerMetadata> {
        self.transport.server_metadata().await
    }

    pub async fn model_metadata(&self, model: &str) -> InferenceResult<ModelMetadata> {
        self.transport.model_metadata(model).await
    }

    pub async fn list_models(&self) -> InferenceResult<Vec<RepositoryModel>> {
        self.transport.repository_index().await
    }

    /// Describe `image` with `model`, returning the generated text.
    pub async fn infer(
        &self,
        model: &str,
        image: impl Into<ImageSource>,
        prompt: &str,
    ) -> InferenceResult<String> {
        let source: ImageSource = image.into();
        let png = source.to_png().await?;
        let (image, prompt) = RequestCodec::encode_parts(png, prompt);
        let response = self
            .transport
            .infer(model, &InferRequest::new(image, prompt))
            .await?;
        ResponseCodec::decode(&response.outputs)
    }

    /// Describe `image` with `kind`, using its conventional prompt unless one is given.
    pub async fn describe(
        &self,
        kind: ModelKind,
        image: impl Into<ImageSource>,
        prompt: Option<&str>,
    ) -> InferenceResult<String> {
        let prompt = prompt.unwrap_or(kind.default_prompt());
        self.infer(kind.as_str(), image, prompt).await
    }
}

impl Default for GlimpseClient {
    /// HTTP client for the server at [`DEFAULT_URL`].
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

/// Describe an image with `kind` via the server at `url` (default
/// [`DEFAULT_URL`]).
pub async fn describe_image(
    kind: ModelKind,
    image: impl Into<ImageSource>,
    prompt: Option<&str>,
    url: Option<&str>,
) -> InferenceResult<String> {
    GlimpseClient::new(url.unwrap_or(DEFAULT_URL))
        .describe(kind, image, prompt)
        .await
}

pub async fn describe_image_moondream(
    image: impl Into<ImageSource>,
    url: Option<&str>,
) -> InferenceResult<String> {
    describe_image(ModelKind::Moondream2, image, None, url).await
}

/// Uses the `<grounding>` prompt.
pub async fn describe_image_kosmos2(
    image: impl Into<ImageSource>,
    url: Option<&str>,
) -> InferenceResult<String> {
    describe_image(ModelKind::Kosmos2, image, None, url).await
}

pub async fn describe_image_llava(
    image: impl Into<ImageSource>,
    url: Option<&str>,
) -> InferenceResult<String> {
    describe_image(ModelKind::Llava, image, None, url).await
}
