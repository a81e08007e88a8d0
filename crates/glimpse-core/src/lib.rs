//! Glimpse Core - multi-backend vision-language inference.
//!
//! Glimpse describes images with one of three vision-language models
//! (`moondream2`, `kosmos2`, `llava`). Every model is wrapped in an adapter
//! that hides its native call convention behind a single
//! `(image, prompt) -> text` contract.
//!
//! # Architecture
//!
//! ```text
//! Client → wire tensors → InferenceServer → RequestCodec → BackendDispatcher
//!        → Adapter (moondream2 | kosmos2 | llava) → ResponseCodec → Client
//! ```
//!
//! The device (CUDA, CoreML or CPU) and precision are chosen once at
//! start-up and shared by every adapter.
//!
//! # Usage
//!
//! ```rust,ignore
//! use glimpse_core::client::GlimpseClient;
//!
//! #[tokio::main]
//! async fn main() -> glimpse_core::InferenceResult<()> {
//!     let client = GlimpseClient::new("http://localhost:8000");
//!     let text = client
//!         .infer("moondream2", std::path::PathBuf::from("cat.jpg"), "Describe this image in detail.")
//!         .await?;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod backend;
pub mod client;
pub mod codec;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod output;
pub mod protocol;
pub mod runtime;
pub mod serving;
pub mod types;

// Re-exports for convenient access
pub use backend::{Adapter, AdapterConfig, BackendAdapter, BackendDispatcher};
pub use client::{GlimpseClient, ImageSource};
pub use config::Config;
pub use device::{Device, DeviceSelection, Precision};
pub use discovery::FileDiscovery;
pub use error::{
    ConfigError, GlimpseError, InferenceError, InferenceResult, Result, RuntimeError,
};
pub use output::{DescriptionRecord, OutputFormat, OutputWriter};
pub use serving::InferenceServer;
pub use types::{InferenceRequest, InferenceResponse, ModelDescriptor, ModelKind};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
