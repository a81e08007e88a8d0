//! The `glimpse models` command for managing model files.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use glimpse_core::device::{self, Accelerators};
use glimpse_core::runtime::template::{CHAT_TEMPLATE_FILE, TOKENIZER_CONFIG_FILE};
use glimpse_core::runtime::{ModelFiles, GRAPH_STEMS, TOKENIZER_FILE};
use glimpse_core::{Config, ModelKind, Precision};

/// Arguments for the `models` command.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,
}

#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// Download model files from their pinned revisions
    Download {
        /// Model to download (defaults to every model in `serving.models`)
        #[arg(value_parser = super::parse_model)]
        model: Option<ModelKind>,

        /// Fetch both fp16 and fp32 graphs instead of the selected device's precision
        #[arg(long)]
        all_precisions: bool,
    },

    /// List installed models
    List,

    /// Show model directory path
    Path,
}

/// One file to fetch: where it lives remotely and where it goes locally.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DownloadItem {
    url: String,
    dest: PathBuf,
    /// Optional files are skipped when the repository does not have them
    required: bool,
}

/// Files `kind` can fetch at `precisions`, in download order.
///
/// Graphs are only listed when an ONNX export is configured for the model.
fn download_plan(config: &Config, kind: ModelKind, precisions: &[Precision]) -> Vec<DownloadItem> {
    let source = config.models.source(kind);
    let dir = config.model_path(kind);
    let mut plan = Vec::new();

    if let Some(export) = &source.onnx {
        for name in graph_names(precisions) {
            plan.push(DownloadItem {
                url: export.graph_url(&name),
                dest: dir.join(&name),
                required: true,
            });
        }
    }

    plan.push(DownloadItem {
        url: source.file_url(TOKENIZER_FILE),
        dest: dir.join(TOKENIZER_FILE),
        required: true,
    });
    if kind == ModelKind::Llava {
        for name in [CHAT_TEMPLATE_FILE, TOKENIZER_CONFIG_FILE] {
            plan.push(DownloadItem {
                url: source.file_url(name),
                dest: dir.join(name),
                required: false,
            });
        }
    }
    plan
}

/// Graph file names across `precisions`, without duplicates.
fn graph_names(precisions: &[Precision]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for &precision in precisions {
        for name in ModelFiles::file_names(precision) {
            if name != TOKENIZER_FILE && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Precision the serving side would load on this machine.
fn serving_precision(config: &Config) -> Precision {
    match device::select_with_preference(config.device.preference, Accelerators::probe()) {
        Ok(selection) => selection.precision,
        Err(e) => {
            tracing::warn!("{e}; downloading full-precision graphs");
            Precision::F32
        }
    }
}

/// Execute the models command.
pub async fn execute(args: ModelsArgs, config: Config) -> anyhow::Result<()> {
    match args.command {
        ModelsCommand::Download {
            model,
            all_precisions,
        } => {
            let kinds = match model {
                Some(kind) => vec![kind],
                None => config.serving.models.clone(),
            };
            let precisions = if all_precisions {
                vec![Precision::F16, Precision::F32]
            } else {
                vec![serving_precision(&config)]
            };

            let client = reqwest::Client::new();
            for kind in kinds {
                let source = config.models.source(kind);
                tracing::info!("Downloading {kind} ({}@{})", source.repo, source.revision);
                if source.onnx.is_none() {
                    tracing::warn!(
                        "No ONNX export configured for {kind}. Set [models.{kind}.onnx] or place \
                         {}.onnx graphs in {:?}",
                        GRAPH_STEMS.join(".onnx, "),
                        config.model_path(kind)
                    );
                }
                for item in download_plan(&config, kind, &precisions) {
                    if item.dest.exists() {
                        tracing::info!("  {:?} already exists", item.dest);
                        continue;
                    }
                    if let Some(parent) = item.dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    tracing::info!("  Source: {}", item.url);
                    if !download_file(&client, &item.url, &item.dest).await? {
                        if item.required {
                            anyhow::bail!("Download failed: {} not found", item.url);
                        }
                        tracing::debug!("  {} not published, skipping", item.url);
                    }
                }
            }
            tracing::info!("All downloads complete.");
        }

        ModelsCommand::List => {
            let model_dir = config.model_dir();
            println!("Models directory: {}\n", model_dir.display());
            for kind in ModelKind::ALL {
                let source = config.models.source(kind);
                println!(
                    "  - {:12} {:14} {}@{}",
                    kind.as_str(),
                    install_status(&config.model_path(kind)),
                    source.repo,
                    source.revision
                );
            }
        }

        ModelsCommand::Path => {
            println!("{}", config.model_dir().display());
        }
    }

    Ok(())
}

fn install_status(dir: &Path) -> String {
    let installed: Vec<String> = [Precision::F16, Precision::F32]
        .into_iter()
        .filter(|&p| ModelFiles::new(dir, p).is_complete())
        .map(|p| p.to_string())
        .collect();

    if !installed.is_empty() {
        format!("ready ({})", installed.join(", "))
    } else if dir.exists() {
        "incomplete".to_string()
    } else {
        "not installed".to_string()
    }
}

/// Stream `url` to `dest`, via a `.part` file renamed on success.
///
/// Returns `false` without writing anything when the file is not published.
async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> anyhow::Result<bool> {
    let response = client.get(url).send().await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(false);
    }
    let response = response
        .error_for_status()
        .map_err(|e| anyhow::anyhow!("Download failed: {e}"))?;
    stream_to_file(response, dest).await?;
    Ok(true)
}

async fn stream_to_file(response: reqwest::Response, dest: &Path) -> anyhow::Result<()> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let total_size = response.content_length();
    let pb = create_download_bar(total_size, dest);

    let partial = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, dest).await?;
    pb.finish_and_clear();

    let file_size = std::fs::metadata(dest)?.len();
    tracing::info!(
        "  {:?} complete ({:.1} MB)",
        dest,
        file_size as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn create_download_bar(total: Option<u64>, dest: &Path) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = match total {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    if let Some(name) = dest.file_name() {
        pb.set_message(name.to_string_lossy().into_owned());
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_core::config::OnnxExport;

    fn config_at(dir: &Path) -> Config {
        let mut config = Config::default();
        config.general.model_dir = dir.to_path_buf();
        config
    }

    fn with_export(mut config: Config) -> Config {
        config.models.moondream2.onnx = Some(OnnxExport {
            repo: "acme/moondream2-onnx".into(),
            revision: "v1".into(),
            dir: "onnx".into(),
        });
        config
    }

    #[test]
    fn test_download_plan_uses_pinned_revision() {
        let config = with_export(config_at(Path::new("/models")));
        let plan = download_plan(&config, ModelKind::Moondream2, &[Precision::F32]);

        assert_eq!(plan.len(), 4);
        assert_eq!(
            plan[0].url,
            "https://huggingface.co/acme/moondream2-onnx/resolve/v1/onnx/vision_encoder.onnx"
        );
        assert_eq!(plan[0].dest, PathBuf::from("/models/moondream2/vision_encoder.onnx"));
        assert_eq!(
            plan[3].url,
            "https://huggingface.co/vikhyatk/moondream2/resolve/2025-01-09/tokenizer.json"
        );
        assert!(plan.iter().all(|item| item.required));
    }

    #[test]
    fn test_download_plan_without_export_skips_graphs() {
        let config = config_at(Path::new("/models"));
        let plan = download_plan(&config, ModelKind::Kosmos2, &[Precision::F32]);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].dest, PathBuf::from("/models/kosmos2/tokenizer.json"));
        assert!(plan.iter().all(|item| !item.url.ends_with(".onnx")));
    }

    #[test]
    fn test_download_plan_llava_template_files_are_optional() {
        let config = config_at(Path::new("/models"));
        let plan = download_plan(&config, ModelKind::Llava, &[Precision::F16]);

        let optional: Vec<_> = plan.iter().filter(|item| !item.required).collect();
        assert_eq!(optional.len(), 2);
        assert!(optional[0].dest.ends_with(CHAT_TEMPLATE_FILE));
        assert!(optional[1].dest.ends_with(TOKENIZER_CONFIG_FILE));
        assert_eq!(
            optional[0].url,
            "https://huggingface.co/llava-hf/llava-v1.6-mistral-7b-hf/resolve/main/chat_template.json"
        );
    }

    #[test]
    fn test_download_plan_both_precisions_shares_tokenizer() {
        let config = with_export(config_at(Path::new("/models")));
        let plan = download_plan(
            &config,
            ModelKind::Moondream2,
            &[Precision::F16, Precision::F32],
        );
        assert_eq!(plan.len(), 7);
        assert_eq!(
            plan.iter()
                .filter(|item| item.dest.ends_with(TOKENIZER_FILE))
                .count(),
            1
        );
    }

    #[test]
    fn test_graph_url_without_dir() {
        let export = OnnxExport {
            repo: "acme/kosmos2-onnx".into(),
            revision: "main".into(),
            dir: String::new(),
        };
        assert_eq!(
            export.graph_url("decoder_model.onnx"),
            "https://huggingface.co/acme/kosmos2-onnx/resolve/main/decoder_model.onnx"
        );
    }

    #[test]
    fn test_install_status() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("kosmos2");
        assert_eq!(install_status(&model_dir), "not installed");

        std::fs::create_dir_all(&model_dir).unwrap();
        assert_eq!(install_status(&model_dir), "incomplete");

        for name in ModelFiles::file_names(Precision::F32) {
            std::fs::write(model_dir.join(name), b"x").unwrap();
        }
        assert_eq!(install_status(&model_dir), "ready (fp32)");
    }
}
