//! Configuration validation.

use crate::error::ConfigError;
use crate::types::ModelKind;

use super::Config;

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate configuration values.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let url = self.client.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "client.url must be an http(s) URL, got {:?}",
                self.client.url
            )));
        }
        if self.serving.models.is_empty() {
            return Err(ConfigError::ValidationError(
                "serving.models must list at least one model".into(),
            ));
        }
        for (i, model) in self.serving.models.iter().enumerate() {
            if self.serving.models[..i].contains(model) {
                return Err(ConfigError::ValidationError(format!(
                    "serving.models lists {model} more than once"
                )));
            }
        }
        for kind in ModelKind::ALL {
            let source = self.models.source(kind);
            if source.repo.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "models.{kind}.repo must not be empty"
                )));
            }
            if source.revision.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "models.{kind}.revision must not be empty"
                )));
            }
            if let Some(export) = &source.onnx {
                if export.repo.trim().is_empty() || export.revision.trim().is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "models.{kind}.onnx needs both repo and revision"
                    )));
                }
            }
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {LOG_LEVELS:?}"
            )));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be one of {LOG_FORMATS:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnnxExport;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::default();
        config.client.url = "localhost:8000".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client.url"));
    }

    #[test]
    fn test_validate_rejects_empty_model_list() {
        let mut config = Config::default();
        config.serving.models.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("serving.models"));
    }

    #[test]
    fn test_validate_rejects_duplicate_models() {
        let mut config = Config::default();
        config.serving.models = vec![ModelKind::Llava, ModelKind::Llava];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_rejects_empty_revision() {
        let mut config = Config::default();
        config.models.kosmos2.revision = " ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("models.kosmos2.revision"));
    }

    #[test]
    fn test_validate_rejects_onnx_export_without_revision() {
        let mut config = Config::default();
        config.models.llava.onnx = Some(OnnxExport {
            repo: "acme/llava-onnx".into(),
            revision: String::new(),
            dir: "onnx".into(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("models.llava.onnx"));
    }

    #[test]
    fn test_validate_rejects_unknown_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.format"));
    }
}
