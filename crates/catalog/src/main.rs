//! CategoryRank catalog refresh
//!
//! Lists every category above the configured size on the wiki and replaces
//! the rank registry with it. All records come back `Unseeded`, so rankings
//! are rebuilt on their next request.

use catrank_common::{
    config::AppConfig,
    db::{DbPool, PgStore},
    errors::{AppError, Result},
    source::{CatalogSource, MediaWikiClient},
    RankStore,
};
use anyhow::Context;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config);

    info!("Starting CategoryRank catalog refresh v{}", catrank_common::VERSION);

    let db = DbPool::new(&config.database)
        .await
        .context("failed to connect to the rank store")?;
    db.apply_schema().await?;
    let store = PgStore::new(db.clone());
    let source = MediaWikiClient::new(config.source.clone())?;

    let seeded = refresh(&source, &store, config.catalog.min_members).await;
    db.close().await?;

    let seeded = seeded.context("catalog refresh failed")?;
    info!(categories = seeded, "Catalog refresh complete");
    Ok(())
}

/// Replace the registry with the current catalog
async fn refresh(source: &dyn CatalogSource, store: &dyn RankStore, min_members: u32) -> Result<u64> {
    let start = Instant::now();

    let titles = source.list_categories(min_members).await?;
    info!(
        fetched = titles.len(),
        min_members,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Fetched category catalog"
    );

    // An empty catalog means the source misbehaved; keep the current registry
    if titles.is_empty() {
        return Err(AppError::SourceFetch {
            message: format!("no categories with at least {} members", min_members),
        });
    }

    store.reseed(&titles).await
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catrank_common::db::{CategoryRecord, MemoryStore};
    use catrank_common::source::MemorySource;
    use catrank_common::{RankState, RankedEntry};

    fn catalog() -> MemorySource {
        MemorySource::new().with_catalog(vec![
            ("Физика".to_string(), 2400),
            ("Химия".to_string(), 800),
            ("Микология".to_string(), 40),
        ])
    }

    #[tokio::test]
    async fn test_refresh_replaces_registry() {
        let store = MemoryStore::new();
        let mut ready = CategoryRecord::unseeded("Физика");
        ready.state = RankState::Ready;
        ready.result = vec![RankedEntry {
            title: "Сила".into(),
            rank: 100.0,
            image: None,
        }];
        store.insert(ready).await;
        store.insert(CategoryRecord::unseeded("Устаревшая")).await;

        let seeded = refresh(&catalog(), &store, 500).await.unwrap();
        assert_eq!(seeded, 2);
        assert_eq!(
            store.list_titles().await.unwrap(),
            vec!["Физика".to_string(), "Химия".to_string()]
        );

        let physics = store.get("Физика").await.unwrap().unwrap();
        assert_eq!(physics.state, RankState::Unseeded);
        assert!(physics.result.is_empty());
    }

    #[tokio::test]
    async fn test_empty_catalog_keeps_registry() {
        let store = MemoryStore::with_categories(["Физика"]);

        let err = refresh(&catalog(), &store, 10_000).await.unwrap_err();
        assert!(matches!(err, AppError::SourceFetch { .. }));
        assert_eq!(store.list_titles().await.unwrap(), vec!["Физика".to_string()]);
    }
}
