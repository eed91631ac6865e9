//! Category ranking engine
//!
//! Fetches a category's link graph from a page source and ranks its pages by
//! the stationary distribution of the damped link chain.

mod graph;
mod solver;

pub use graph::{CategoryGraph, GraphBuilder};
pub use solver::{RankSolver, RankVector};

use catrank_common::errors::{AppError, Result};
use catrank_common::source::PageSource;
use catrank_common::RankedEntry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pair every page with its rank, highest first.
///
/// The sort is stable, so ties keep membership order.
pub fn rank_entries(graph: &CategoryGraph, ranks: &RankVector) -> Vec<RankedEntry> {
    let mut entries: Vec<RankedEntry> = graph
        .pages
        .iter()
        .map(|page| RankedEntry {
            title: page.title.clone(),
            rank: ranks.rank(page.index),
            image: page.image.clone(),
        })
        .collect();

    entries.sort_by(|a, b| b.rank.total_cmp(&a.rank));
    entries
}

/// Fetch, build, and solve one category within `timeout`.
///
/// The blocking solve is joined before this returns, also on timeout: `cancel`
/// is raised and the solve stops at its next pivot column.
pub async fn build_ranking(
    source: &dyn PageSource,
    solver: RankSolver,
    category: &str,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
) -> Result<Vec<RankedEntry>> {
    let deadline = Instant::now() + timeout;
    let timed_out = || AppError::BuildTimeout {
        timeout_ms: timeout.as_millis() as u64,
    };

    let graph = tokio::time::timeout_at(deadline, fetch_graph(source, category))
        .await
        .map_err(|_| timed_out())??;
    let edges = graph.links.edge_count();

    let flag = cancel.clone();
    let mut solve = tokio::task::spawn_blocking(move || {
        let ranks = solver.solve(&graph.links, &flag)?;
        Ok::<_, AppError>(rank_entries(&graph, &ranks))
    });

    let waited = tokio::time::timeout_at(deadline, &mut solve).await;
    let joined = match waited {
        Ok(joined) => joined,
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            let _ = solve.await;
            warn!(category, "Solve cancelled at build deadline");
            return Err(timed_out());
        }
    };

    let entries = joined.map_err(|e| AppError::Internal {
        message: format!("Solver task failed: {}", e),
    })??;

    info!(category, pages = entries.len(), edges, "Category ranked");
    Ok(entries)
}

async fn fetch_graph(source: &dyn PageSource, category: &str) -> Result<CategoryGraph> {
    let members = source.list_category_members(category).await?;
    let mut builder = GraphBuilder::from_members(&members);

    let records = source.fetch_links_and_thumbnails(category).await?;
    for record in &records {
        builder.add_page_links(record);
    }

    let graph = builder.build();
    debug!(category, pages = graph.len(), edges = graph.links.edge_count(), "Category graph built");
    Ok(graph)
}
