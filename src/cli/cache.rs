//! `tallychat cache` command handler.

use anyhow::Result;

use tallychat::config::Config;

use super::status::print_cache_stats;
use super::{open_cache, CacheAction};

pub(crate) async fn cmd_cache(config: Config, action: CacheAction) -> Result<()> {
    let cache = open_cache(&config);
    let mut cache = cache.lock().await;

    match action {
        CacheAction::Stats => {
            print_cache_stats(&cache.stats());
            if let Some(path) = cache.path() {
                println!("Snapshot: {}", path.display());
            }
        }
        CacheAction::Clear => {
            let count = cache.len();
            cache.clear();
            println!("Cleared {} cached response(s).", count);
        }
        CacheAction::Cleanup => {
            let removed = cache.cleanup_expired();
            println!("Removed {} expired entr{}.", removed, if removed == 1 { "y" } else { "ies" });
        }
    }

    Ok(())
}
