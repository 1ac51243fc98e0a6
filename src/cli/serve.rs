//! `tallychat serve` command handler.

use std::sync::Arc;

use anyhow::Result;

use tallychat::api::{start_server, AppState, SessionRegistry};
use tallychat::config::Config;
use tallychat::providers::{AnthropicProvider, LLMProvider};

use super::open_cache;

pub(crate) async fn cmd_serve(mut config: Config, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.web.port = port;
    }
    let provider: Arc<dyn LLMProvider> = Arc::new(AnthropicProvider::from_config(&config)?);
    let cache = open_cache(&config);
    let web = config.web.clone();
    let registry = SessionRegistry::new(config, provider, cache);

    println!("Serving on http://{}:{}", web.bind, web.port);
    start_server(&web, AppState::new(registry))
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
