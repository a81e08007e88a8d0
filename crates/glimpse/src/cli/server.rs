//! The `glimpse server` command for querying an inference server.

use clap::{Args, Subcommand};
use glimpse_core::protocol::RepositoryModel;
use glimpse_core::{Config, GlimpseClient, ModelKind};

/// Arguments for the `server` command.
#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Inference server URL (defaults to `client.url` from config)
    #[arg(long, global = true, env = "GLIMPSE_URL")]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: ServerCommand,
}

#[derive(Subcommand, Debug)]
pub enum ServerCommand {
    /// Show server and per-model readiness
    Status,

    /// Print server metadata, or one model's metadata, as JSON
    Metadata {
        /// Model to describe
        #[arg(value_parser = super::parse_model)]
        model: Option<ModelKind>,
    },

    /// List every model in the server's repository
    Models,
}

/// Execute the server command.
pub async fn execute(args: ServerArgs, config: Config) -> anyhow::Result<()> {
    let url = args.url.as_deref().unwrap_or(&config.client.url);
    let client = GlimpseClient::new(url);

    match args.command {
        ServerCommand::Status => {
            let ready = client.is_server_ready().await?;
            println!("Server {url}: {}", if ready { "ready" } else { "not ready" });
            if !ready {
                return Ok(());
            }
            for kind in ModelKind::ALL {
                let status = match client.is_model_ready(kind.as_str()).await? {
                    true => "ready",
                    false => "not ready",
                };
                println!("  - {:12} {}", kind.as_str(), status);
            }
        }

        ServerCommand::Metadata { model: None } => {
            let metadata = client.server_metadata().await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }

        ServerCommand::Metadata { model: Some(kind) } => {
            let metadata = client.model_metadata(kind.as_str()).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }

        ServerCommand::Models => {
            let models = client.list_models().await?;
            if models.is_empty() {
                println!("Server reports no models.");
                return Ok(());
            }
            for model in &models {
                println!("{}", format_model_row(model));
            }
        }
    }

    Ok(())
}

fn format_model_row(model: &RepositoryModel) -> String {
    let state = model.state.map_or("NOT LOADED", |s| s.as_str());
    let version = model.version.as_deref().unwrap_or("-");
    if model.reason.is_empty() {
        format!("  - {:12} v{:4} {}", model.name, version, state)
    } else {
        format!(
            "  - {:12} v{:4} {}  ({})",
            model.name, version, state, model.reason
        )
    }
}
