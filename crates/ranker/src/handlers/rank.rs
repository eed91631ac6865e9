//! Category rank handlers

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::service::RankResponse;
use crate::AppState;
use catrank_common::{
    errors::{AppError, Result},
    metrics::RequestMetrics,
};

/// Query string of `GET /categoryrank`
#[derive(Debug, Deserialize, Validate)]
pub struct RankQuery {
    #[validate(length(min = 1, max = 255))]
    pub category: String,

    /// Zero-based page index
    #[serde(default)]
    pub page: usize,

    /// Page size; falls back to the configured default
    pub size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CategoryItem {
    pub title: String,
}

/// Rank one page of a category, starting a build when needed
pub async fn category_rank(
    State(state): State<AppState>,
    query: std::result::Result<Query<RankQuery>, QueryRejection>,
) -> Result<Json<RankResponse>> {
    let metrics = RequestMetrics::start("GET", "/categoryrank");

    let response = rank(&state, query).await;
    let status = match &response {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    };
    metrics.finish(status);

    response.map(Json)
}

async fn rank(
    state: &AppState,
    query: std::result::Result<Query<RankQuery>, QueryRejection>,
) -> Result<RankResponse> {
    let Query(query) = query.map_err(|e| AppError::InvalidFormat {
        message: e.body_text(),
    })?;

    query.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("category".to_string()),
    })?;

    let size = query.size.unwrap_or(state.service.config().default_page_size);
    let response = state.service.request(&query.category, query.page, size).await?;

    tracing::info!(
        category = %query.category,
        page = query.page,
        size,
        status = response.status.as_code(),
        returned = response.data.len(),
        "Rank request served"
    );

    Ok(response)
}

/// List every seeded category
pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<CategoryItem>>> {
    let titles = state.service.categories().await?;
    Ok(Json(titles.into_iter().map(|title| CategoryItem { title }).collect()))
}
