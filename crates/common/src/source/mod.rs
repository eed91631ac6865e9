//! Remote page sources
//!
//! Provides a unified interface over the wiki that owns the category data:
//! - `PageSource` for one category's membership and link graph
//! - `CatalogSource` for the list of categories worth ranking
//! - `MediaWikiClient`, the production implementation
//! - `MemorySource`, a scripted implementation for tests

mod mediawiki;

pub use mediawiki::MediaWikiClient;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A page listed as a member of a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMember {
    pub title: String,
}

/// Outgoing links and thumbnail for one page.
///
/// `links` holds every linked title, in or out of the category. A long link
/// list may be split across several records for the same page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageLinks {
    pub title: String,
    pub links: Vec<String>,
    pub thumbnail: Option<String>,
}

/// Source of category membership and link data
#[async_trait]
pub trait PageSource: Send + Sync {
    /// All pages in the category, in source order, across every continuation
    async fn list_category_members(&self, category: &str) -> Result<Vec<CategoryMember>>;

    /// Links and thumbnails for every page in the category
    async fn fetch_links_and_thumbnails(&self, category: &str) -> Result<Vec<PageLinks>>;
}

/// Source of the category catalog
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Names of all categories with at least `min_members` members
    async fn list_categories(&self, min_members: u32) -> Result<Vec<String>>;
}

/// Scripted membership and links for one category
#[derive(Debug, Clone, Default)]
pub struct CategoryFixture {
    pub members: Vec<String>,
    pub pages: Vec<PageLinks>,
}

/// In-process page source for tests and offline runs
#[derive(Default)]
pub struct MemorySource {
    categories: HashMap<String, CategoryFixture>,
    catalog: Vec<(String, u32)>,
    member_calls: AtomicUsize,
    link_calls: AtomicUsize,
    failures_left: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a category with its members and per-page links
    pub fn with_category(
        mut self,
        name: impl Into<String>,
        members: Vec<String>,
        pages: Vec<PageLinks>,
    ) -> Self {
        self.categories.insert(name.into(), CategoryFixture { members, pages });
        self
    }

    /// Set the catalog as (category, member count) pairs
    pub fn with_catalog(mut self, catalog: Vec<(String, u32)>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Fail the next `times` membership fetches
    pub fn failing(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Block every membership fetch until a permit is added to `gate`
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of membership fetches so far (one per build)
    pub fn member_calls(&self) -> usize {
        self.member_calls.load(Ordering::SeqCst)
    }

    /// Number of link fetches so far
    pub fn link_calls(&self) -> usize {
        self.link_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for MemorySource {
    async fn list_category_members(&self, category: &str) -> Result<Vec<CategoryMember>> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| AppError::SourceFetch { message: e.to_string() })?
                .forget();
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            return Err(AppError::SourceFetch {
                message: format!("scripted failure listing '{}'", category),
            });
        }

        Ok(self
            .categories
            .get(category)
            .map(|fixture| {
                fixture
                    .members
                    .iter()
                    .map(|title| CategoryMember { title: title.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_links_and_thumbnails(&self, category: &str) -> Result<Vec<PageLinks>> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);

        Ok(self
            .categories
            .get(category)
            .map(|fixture| fixture.pages.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogSource for MemorySource {
    async fn list_categories(&self, min_members: u32) -> Result<Vec<String>> {
        Ok(self
            .catalog
            .iter()
            .filter(|(_, size)| *size >= min_members)
            .map(|(name, _)| name.clone())
            .collect())
    }
}
