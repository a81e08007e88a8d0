pub mod config;
pub mod describe;
pub mod models;
pub mod server;

use glimpse_core::ModelKind;

/// Clap value parser for model names.
pub fn parse_model(name: &str) -> Result<ModelKind, String> {
    name.parse::<ModelKind>().map_err(|_| {
        let known: Vec<&str> = ModelKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unsupported model '{name}' (expected one of: {})", known.join(", "))
    })
}
