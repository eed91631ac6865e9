//! MediaWiki Action API client
//!
//! Every query is paged with the API's generic continuation: all keys of the
//! `continue` object are copied into the next request until it is absent.

use super::{CatalogSource, CategoryMember, PageLinks, PageSource};
use crate::config::SourceConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

type Params = Vec<(String, String)>;

/// MediaWiki API client with retry on transient failures
pub struct MediaWikiClient {
    client: Client,
    config: SourceConfig,
}

impl MediaWikiClient {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Namespaced title for a category, e.g. `Категория:Физика`
    fn category_title(&self, category: &str) -> String {
        format!("{}:{}", self.config.category_namespace, category)
    }

    fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.retry_initial_ms),
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_budget_secs)),
            ..ExponentialBackoff::default()
        }
    }

    /// Run a query to exhaustion, handing every batch to `on_batch`
    async fn query_all<F>(&self, base: Params, mut on_batch: F) -> Result<usize>
    where
        F: FnMut(Value) -> Result<()> + Send,
    {
        let mut params = base.clone();
        let mut batches = 0;

        loop {
            let payload = self.request(&params).await?;
            let next = continuation(&payload);
            on_batch(payload)?;
            batches += 1;

            match next {
                Some(extra) => {
                    params = base.clone();
                    params.extend(extra);
                }
                None => break,
            }
        }

        debug!(batches, "MediaWiki query exhausted");
        Ok(batches)
    }

    async fn request(&self, params: &[(String, String)]) -> Result<Value> {
        retry_notify(
            self.backoff_policy(),
            || async move { self.request_once(params).await },
            |err: AppError, wait: Duration| {
                warn!(error = %err, wait_ms = wait.as_millis() as u64, "Retrying MediaWiki request");
            },
        )
        .await
    }

    async fn request_once(
        &self,
        params: &[(String, String)],
    ) -> std::result::Result<Value, backoff::Error<AppError>> {
        let response = self
            .client
            .get(&self.config.api_url)
            .query(&[("action", "query"), ("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    backoff::Error::transient(AppError::HttpClient(e))
                } else {
                    backoff::Error::permanent(AppError::HttpClient(e))
                }
            })?;

        let status = response.status();
        if is_transient_status(status) {
            return Err(backoff::Error::transient(AppError::SourceFetch {
                message: format!("MediaWiki API returned {}", status),
            }));
        }
        if !status.is_success() {
            return Err(backoff::Error::permanent(AppError::SourceFetch {
                message: format!("MediaWiki API returned {}", status),
            }));
        }

        let payload: Value = response.json().await.map_err(|e| {
            backoff::Error::permanent(AppError::SourceFetch {
                message: format!("Malformed MediaWiki response: {}", e),
            })
        })?;

        api_error(&payload).map_err(backoff::Error::permanent)?;
        Ok(payload)
    }
}

#[async_trait]
impl PageSource for MediaWikiClient {
    async fn list_category_members(&self, category: &str) -> Result<Vec<CategoryMember>> {
        let base = vec![
            ("list".to_string(), "categorymembers".to_string()),
            ("cmtitle".to_string(), self.category_title(category)),
            ("cmtype".to_string(), "page".to_string()),
            ("cmlimit".to_string(), "max".to_string()),
        ];

        let mut members = Vec::new();
        self.query_all(base, |payload| {
            members.extend(parse_members(payload)?);
            Ok(())
        })
        .await?;

        debug!(category, count = members.len(), "Fetched category members");
        Ok(members)
    }

    async fn fetch_links_and_thumbnails(&self, category: &str) -> Result<Vec<PageLinks>> {
        let base = vec![
            ("generator".to_string(), "categorymembers".to_string()),
            ("gcmtitle".to_string(), self.category_title(category)),
            ("gcmtype".to_string(), "page".to_string()),
            ("gcmlimit".to_string(), "max".to_string()),
            ("prop".to_string(), "links|pageimages".to_string()),
            ("piprop".to_string(), "thumbnail".to_string()),
            ("pithumbsize".to_string(), self.config.thumbnail_size.to_string()),
            ("pllimit".to_string(), "max".to_string()),
        ];

        let mut pages = Vec::new();
        self.query_all(base, |payload| {
            pages.extend(parse_pages(payload)?);
            Ok(())
        })
        .await?;

        debug!(category, records = pages.len(), "Fetched page links");
        Ok(pages)
    }
}

#[async_trait]
impl CatalogSource for MediaWikiClient {
    async fn list_categories(&self, min_members: u32) -> Result<Vec<String>> {
        let base = vec![
            ("list".to_string(), "allcategories".to_string()),
            ("aclimit".to_string(), "max".to_string()),
            ("acmin".to_string(), min_members.to_string()),
        ];

        let mut categories = Vec::new();
        self.query_all(base, |payload| {
            categories.extend(parse_categories(payload)?);
            Ok(())
        })
        .await?;

        Ok(categories)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Parameters for the next request, or `None` once the query is complete
fn continuation(payload: &Value) -> Option<Params> {
    let object = payload.get("continue")?.as_object()?;
    Some(
        object
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect(),
    )
}

fn api_error(payload: &Value) -> Result<()> {
    match payload.get("error") {
        Some(error) => {
            let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
            let info = error.get("info").and_then(Value::as_str).unwrap_or("");
            Err(AppError::SourceFetch {
                message: format!("MediaWiki API error '{}': {}", code, info),
            })
        }
        None => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
struct Payload<Q> {
    query: Option<Q>,
}

#[derive(Debug, Deserialize)]
struct TitleItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct MembersQuery {
    #[serde(default)]
    categorymembers: Vec<TitleItem>,
}

#[derive(Debug, Deserialize)]
struct PagesQuery {
    #[serde(default)]
    pages: Vec<PageItem>,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    title: String,
    #[serde(default)]
    links: Vec<TitleItem>,
    thumbnail: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    source: String,
}

#[derive(Debug, Deserialize)]
struct CatalogQuery {
    #[serde(default)]
    allcategories: Vec<CategoryItem>,
}

#[derive(Debug, Deserialize)]
struct CategoryItem {
    #[serde(alias = "*")]
    category: String,
}

fn decode<Q: serde::de::DeserializeOwned>(payload: Value) -> Result<Option<Q>> {
    let payload: Payload<Q> = serde_json::from_value(payload).map_err(|e| AppError::SourceFetch {
        message: format!("Unexpected MediaWiki payload: {}", e),
    })?;
    Ok(payload.query)
}

fn parse_members(payload: Value) -> Result<Vec<CategoryMember>> {
    Ok(decode::<MembersQuery>(payload)?
        .map(|query| {
            query
                .categorymembers
                .into_iter()
                .map(|item| CategoryMember { title: item.title })
                .collect()
        })
        .unwrap_or_default())
}

fn parse_pages(payload: Value) -> Result<Vec<PageLinks>> {
    Ok(decode::<PagesQuery>(payload)?
        .map(|query| {
            query
                .pages
                .into_iter()
                .map(|page| PageLinks {
                    title: page.title,
                    links: page.links.into_iter().map(|link| link.title).collect(),
                    thumbnail: page.thumbnail.map(|thumb| thumb.source),
                })
                .collect()
        })
        .unwrap_or_default())
}

fn parse_categories(payload: Value) -> Result<Vec<String>> {
    Ok(decode::<CatalogQuery>(payload)?
        .map(|query| query.allcategories.into_iter().map(|item| item.category).collect())
        .unwrap_or_default())
}
