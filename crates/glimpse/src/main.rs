//! Glimpse CLI - describe images with local vision-language models.
//!
//! Glimpse sends an image and a prompt to one of three vision-language
//! models (moondream2, kosmos2, llava) and prints the generated text. Models
//! run either behind a KServe v2 inference server or in-process.
//!
//! # Usage
//!
//! ```bash
//! # Describe a single image via the server
//! glimpse describe photo.jpg --model moondream2
//!
//! # Describe a directory in-process, writing JSONL
//! glimpse describe ./photos/ --model llava --local --format jsonl -o out.jsonl
//!
//! # Check what the server is serving
//! glimpse server models
//!
//! # Fetch model files
//! glimpse models download kosmos2
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Glimpse - describe images with local vision-language models.
#[derive(Parser, Debug)]
#[command(name = "glimpse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a description for an image or a directory of images
    Describe(cli::describe::DescribeArgs),

    /// Query an inference server (health, metadata, repository index)
    Server(cli::server::ServerArgs),

    /// Manage model files (download, list, path)
    Models(cli::models::ModelsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let config = match glimpse_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `glimpse config path`."
            );
            glimpse_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Glimpse v{}", glimpse_core::VERSION);

    match cli.command {
        Commands::Describe(args) => cli::describe::execute(args, config).await,
        Commands::Server(args) => cli::server::execute(args, config).await,
        Commands::Models(args) => cli::models::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
