//! Tabby Loader CLI
//!
//! Load and unload models on a TabbyAPI server from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Store the admin key
//! tabby-loader set-key <key>
//!
//! # List models the server can load
//! tabby-loader list
//!
//! # Load a model with its configured draft model
//! tabby-loader load llama-7b --draft tiny-draft --cache-mode Q8
//!
//! # Unload
//! tabby-loader unload --url http://gpu-box:5000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tabby_loader::storage::settings::{load_settings, load_settings_from, ExtensionSettings};
use tabby_loader::{
    AuthScheme, CacheMode, Credential, CredentialResolver, DraftRequest, LogSink, TabbyClient,
};

#[derive(Parser)]
#[command(name = "tabby-loader")]
#[command(version)]
#[command(about = "Load and unload models on a TabbyAPI server")]
struct Cli {
    /// Server URL (overrides the stored setting)
    #[arg(short, long, global = true)]
    url: Option<String>,

    /// Admin credential header: api-key, admin-key, bearer or header:<name>
    #[arg(long, global = true)]
    auth_scheme: Option<String>,

    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List loadable models and draft models
    List,

    /// Load a model and follow its progress
    Load {
        /// Model name as listed by the server
        model: String,

        /// Draft model for speculative decoding
        #[arg(short, long)]
        draft: Option<String>,

        /// KV cache mode (FP16, FP8, Q8, Q6, Q4)
        #[arg(long)]
        cache_mode: Option<String>,

        /// Manual GPU split in GB per device, e.g. 20,24
        #[arg(long, value_delimiter = ',')]
        gpu_split: Option<Vec<f64>>,

        /// Maximum sequence length
        #[arg(long)]
        max_seq_len: Option<u32>,
    },

    /// Unload the current model
    Unload,

    /// Store the admin key for later runs
    SetKey {
        /// Admin key
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => load_settings_from(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?,
        None => load_settings(),
    };
    apply_overrides(&mut settings, &cli)?;

    let resolver = CredentialResolver::from_data_dir().context("No data directory available")?;
    let server = settings.server_config();

    if let Commands::SetKey { key } = &cli.command {
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Admin key is empty");
        }
        resolver.store(&Credential::new(key))?;
        println!("Admin key saved");
        return Ok(());
    }

    let client = TabbyClient::new(settings.client.clone(), resolver)?;

    match cli.command {
        Commands::List => {
            let catalog = client.fetch_catalog(&server).await;
            if catalog.is_empty() {
                println!("No models available on {}", server.normalized_base_url());
                return Ok(());
            }
            println!("Models:");
            for model in &catalog.models {
                println!("  {}", model);
            }
            if !catalog.draft_models.is_empty() {
                println!("Draft models:");
                for model in &catalog.draft_models {
                    println!("  {}", model);
                }
            }
        }

        Commands::Load {
            model,
            draft,
            cache_mode,
            gpu_split,
            max_seq_len,
        } => {
            let mut request = settings.to_load_request(model);
            if let Some(name) = draft {
                let mut draft = DraftRequest::new(name);
                draft.rope_scale = settings.draft_rope_scale;
                draft.rope_alpha = settings.draft_rope_alpha;
                request = request.with_draft(draft);
            }
            if let Some(mode) = cache_mode {
                request.cache_mode = CacheMode::parse(&mode).map_err(anyhow::Error::msg)?;
            }
            if let Some(split) = gpu_split {
                request = request.with_manual_split(split);
            }
            if max_seq_len.is_some() {
                request.max_seq_len = max_seq_len;
            }

            // Catalog is best-effort; an empty one skips membership checks
            client.fetch_catalog(&server).await;

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let outcome = client
                .load_model(&server, &request, &LogSink, cancel)
                .await?;
            let elapsed = outcome.finished_at - outcome.started_at;
            println!(
                "Loaded {}{} in {:.1}s",
                outcome.model,
                outcome
                    .draft_model
                    .as_ref()
                    .map(|d| format!(" (draft: {})", d))
                    .unwrap_or_default(),
                elapsed.num_milliseconds() as f64 / 1000.0
            );
        }

        Commands::Unload => {
            client.unload_model(&server).await?;
            println!("Model unloaded");
        }

        Commands::SetKey { .. } => {}
    }

    Ok(())
}

fn apply_overrides(settings: &mut ExtensionSettings, cli: &Cli) -> Result<()> {
    if let Some(url) = &cli.url {
        settings.url_override = Some(url.clone());
    }
    if let Some(scheme) = &cli.auth_scheme {
        settings.auth_scheme = AuthScheme::parse(scheme).map_err(anyhow::Error::msg)?;
    }
    settings.validate();
    Ok(())
}
