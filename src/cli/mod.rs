//! Command-line interface.

pub(crate) mod cache;
pub(crate) mod chat;
#[cfg(feature = "web")]
pub(crate) mod serve;
pub(crate) mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tallychat::cache::{shared, ResponseCache, SharedCache};
use tallychat::config::Config;
use tallychat::providers::{AnthropicProvider, LLMProvider};
use tallychat::session::ChatOverrides;
use tallychat::ChatPipeline;

#[derive(Parser, Debug)]
#[command(name = "tallychat", version, about = "Budget-aware chat client with a response cache")]
pub struct Cli {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat session (default)
    Chat {
        /// Print replies only when complete
        #[arg(long)]
        no_stream: bool,
        /// Preset mode to start in
        #[arg(short, long)]
        mode: Option<String>,
    },
    /// Ask a single question and exit
    Ask {
        /// The question
        text: Vec<String>,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Inspect or maintain the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// List preset modes
    Modes,
    /// Start the HTTP server
    #[cfg(feature = "web")]
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show hit/miss counters and occupancy
    Stats,
    /// Remove every entry and reset counters
    Clear,
    /// Remove expired entries
    Cleanup,
}

/// Per-request parameter flags.
#[derive(clap::Args, Debug, Default)]
pub struct OverrideArgs {
    /// Model id
    #[arg(long)]
    pub model: Option<String>,
    /// Maximum output tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0-1)
    #[arg(long)]
    pub temperature: Option<f64>,
    /// System prompt for this request
    #[arg(long)]
    pub system: Option<String>,
}

impl From<OverrideArgs> for ChatOverrides {
    fn from(args: OverrideArgs) -> Self {
        ChatOverrides {
            model: args.model,
            max_tokens: args.max_tokens,
            temperature: args.temperature,
            system_prompt: args.system,
        }
    }
}

pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command.unwrap_or(Commands::Chat {
        no_stream: false,
        mode: None,
    }) {
        Commands::Chat { no_stream, mode } => {
            let mut config = load_config()?;
            if mode.is_some() {
                config.chat.mode = mode;
                config.validate()?;
            }
            chat::cmd_chat(config, no_stream).await
        }
        Commands::Ask { text, overrides } => {
            let config = load_config()?;
            chat::cmd_ask(config, text.join(" "), overrides.into()).await
        }
        Commands::Cache { action } => cache::cmd_cache(load_config()?, action).await,
        Commands::Modes => {
            status::cmd_modes();
            Ok(())
        }
        #[cfg(feature = "web")]
        Commands::Serve { port } => serve::cmd_serve(load_config()?, port).await,
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "tallychat=debug" } else { "tallychat=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Defaults, then the config file, then the environment; validated once.
pub(crate) fn load_config() -> Result<Config> {
    let config = Config::load().with_context(|| "Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

pub(crate) fn open_cache(config: &Config) -> SharedCache {
    shared(ResponseCache::from_config(config))
}

pub(crate) fn build_pipeline(config: &Config) -> Result<ChatPipeline> {
    let provider: Arc<dyn LLMProvider> = Arc::new(AnthropicProvider::from_config(config)?);
    Ok(ChatPipeline::from_config(config, provider, open_cache(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_with_overrides() {
        let cli = Cli::parse_from([
            "tallychat",
            "ask",
            "--temperature",
            "0.2",
            "--model",
            "claude-3-5-haiku-20241022",
            "what",
            "is",
            "rust",
        ]);
        match cli.command {
            Some(Commands::Ask { text, overrides }) => {
                assert_eq!(text.join(" "), "what is rust");
                let o: ChatOverrides = overrides.into();
                assert_eq!(o.temperature, Some(0.2));
                assert_eq!(o.model.as_deref(), Some("claude-3-5-haiku-20241022"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_no_subcommand_defaults_to_chat() {
        let cli = Cli::parse_from(["tallychat"]);
        assert!(cli.command.is_none());
    }
}
