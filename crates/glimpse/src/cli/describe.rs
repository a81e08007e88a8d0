//! The `glimpse describe` command.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, ValueEnum};
use glimpse_core::client::LocalTransport;
use glimpse_core::output::OutputFormat as CoreOutputFormat;
use glimpse_core::{
    Config, DescriptionRecord, FileDiscovery, GlimpseClient, InferenceServer, ModelKind,
    OutputWriter,
};

/// Arguments for the `describe` command.
#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Image file or directory to describe
    #[arg(required = true)]
    pub input: PathBuf,

    /// Model to use: moondream2, kosmos2 or llava
    #[arg(short, long, value_parser = super::parse_model)]
    pub model: ModelKind,

    /// Prompt (defaults to the model's conventional prompt)
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Inference server URL (defaults to `client.url` from config)
    #[arg(long, env = "GLIMPSE_URL")]
    pub url: Option<String>,

    /// Load the model in-process instead of calling a server (overrides --url)
    #[arg(long)]
    pub local: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    /// Single JSON object or array
    Json,
    /// One JSON object per line (newline-delimited)
    Jsonl,
}

impl From<OutputFormat> for CoreOutputFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => CoreOutputFormat::Json,
            OutputFormat::Jsonl => CoreOutputFormat::JsonLines,
        }
    }
}

/// Execute the describe command.
pub async fn execute(args: DescribeArgs, config: Config) -> anyhow::Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input path does not exist: {}", args.input.display());
    }

    let files = FileDiscovery::default().discover(&args.input);
    if files.is_empty() {
        anyhow::bail!("No supported images found at {}", args.input.display());
    }
    tracing::info!("Found {} image(s)", files.len());

    let model = args.model;
    let prompt = args
        .prompt
        .clone()
        .unwrap_or_else(|| model.default_prompt().to_string());

    let (client, local_server) = if args.local {
        if let Some(url) = &args.url {
            tracing::debug!("Ignoring server URL {url}; running locally");
        }
        let server = start_local(&config, model).await?;
        let client = GlimpseClient::with_transport(Box::new(LocalTransport::new(server.clone())));
        (client, Some(server))
    } else {
        let url = args.url.as_deref().unwrap_or(&config.client.url);
        tracing::debug!("Using inference server at {url}");
        (GlimpseClient::new(url), None)
    };

    if !client.is_model_ready(model.as_str()).await? {
        anyhow::bail!(
            "Model {model} is not ready. Check `glimpse server models` (or `glimpse models list` with --local)."
        );
    }

    let progress = (files.len() > 1).then(|| create_progress_bar(files.len() as u64));
    let mut records = Vec::with_capacity(files.len());

    for path in files {
        if let Some(pb) = &progress {
            pb.set_message(file_label(&path));
        }
        let record = match client.infer(model.as_str(), path.clone(), &prompt).await {
            Ok(text) => DescriptionRecord::success(path, model, &prompt, text),
            Err(e) => {
                tracing::warn!("Failed to describe {}: {e}", path.display());
                DescriptionRecord::failure(path, model, &prompt, e.to_string())
            }
        };
        records.push(record);
        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message("done");
    }

    write_records(&records, args.format.into(), args.output.as_deref())?;

    drop(client);
    if let Some(server) = local_server {
        match Arc::try_unwrap(server) {
            Ok(server) => server.shutdown(),
            Err(_) => tracing::warn!("Local server still referenced; skipping cleanup"),
        }
    }

    let failed = records.iter().filter(|r| !r.is_success()).count();
    tracing::info!(
        "Described {} image(s), {} failed",
        records.len() - failed,
        failed
    );
    if failed == records.len() {
        anyhow::bail!("All {failed} image(s) failed");
    }
    Ok(())
}

/// Load only the requested model in this process.
async fn start_local(config: &Config, model: ModelKind) -> anyhow::Result<Arc<InferenceServer>> {
    let mut config = config.clone();
    config.serving.models = vec![model];

    tracing::info!("Loading {model} locally...");
    let server = tokio::task::spawn_blocking(move || InferenceServer::start(&config)).await??;

    if let Some(entry) = server
        .repository_index()
        .into_iter()
        .find(|m| m.name == model.as_str() && !m.is_ready())
    {
        anyhow::bail!("Failed to load {model}: {}", entry.reason);
    }
    Ok(Arc::new(server))
}

fn write_records(
    records: &[DescriptionRecord],
    format: CoreOutputFormat,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)?;
            let mut writer = OutputWriter::new(BufWriter::new(file), format, false);
            emit(&mut writer, records)?;
            writer.flush()?;
            tracing::info!("Wrote {} record(s) to {}", records.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = OutputWriter::new(stdout.lock(), format, true);
            emit(&mut writer, records)?;
            writer.flush()?;
        }
    }
    Ok(())
}

/// A single record is written as an object, several as an array (or lines).
fn emit<W: Write>(writer: &mut OutputWriter<W>, records: &[DescriptionRecord]) -> std::io::Result<()> {
    match records {
        [single] => writer.write(single),
        many => writer.write_all(many),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn create_progress_bar(total: u64) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
    ) {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_message("starting...");
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct DescribeCli {
        #[command(flatten)]
        args: DescribeArgs,
    }

    #[test]
    fn test_local_accepted_alongside_url() {
        let cli = DescribeCli::try_parse_from([
            "describe",
            "photo.jpg",
            "--model",
            "kosmos2",
            "--local",
            "--url",
            "http://gpu-box:8000",
        ])
        .unwrap();
        assert!(cli.args.local);
        assert_eq!(cli.args.model, ModelKind::Kosmos2);
    }

    #[test]
    fn test_local_accepted_with_url_from_environment() {
        std::env::set_var("GLIMPSE_URL", "http://gpu-box:8000");
        let parsed = DescribeCli::try_parse_from(["describe", "photo.jpg", "-m", "llava", "--local"]);
        std::env::remove_var("GLIMPSE_URL");

        let cli = parsed.unwrap();
        assert!(cli.args.local);
        assert_eq!(cli.args.url.as_deref(), Some("http://gpu-box:8000"));
    }

    fn record(name: &str) -> DescriptionRecord {
        DescriptionRecord::success(PathBuf::from(name), ModelKind::Moondream2, "p", "t".into())
    }

    #[test]
    fn test_single_record_is_an_object() {
        let mut buffer = Vec::new();
        let mut writer = OutputWriter::new(&mut buffer, CoreOutputFormat::Json, false);
        emit(&mut writer, &[record("a.jpg")]).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.starts_with('{'));
    }

    #[test]
    fn test_many_records_are_an_array() {
        let mut buffer = Vec::new();
        let mut writer = OutputWriter::new(&mut buffer, CoreOutputFormat::Json, false);
        emit(&mut writer, &[record("a.jpg"), record("b.jpg")]).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.starts_with('['));
    }

    #[test]
    fn test_write_records_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        write_records(
            &[record("a.jpg"), record("b.jpg")],
            CoreOutputFormat::JsonLines,
            Some(&path),
        )
        .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_file_label() {
        assert_eq!(file_label(Path::new("/photos/cat.jpg")), "cat.jpg");
    }
}
