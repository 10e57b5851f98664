use actix_web::{get, web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::error::{AppError, Result};
use crate::repository::FeedRepository;
use crate::services::FeedRanker;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQueryParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

pub struct FeedHandlerState {
    pub repository: Arc<dyn FeedRepository>,
    pub ranker: Arc<FeedRanker>,
    pub feed_config: FeedConfig,
}

/// Personalized recipe feed.
///
/// Ranks the full non-deleted recipe corpus against the user's topics and
/// food habit, then returns one shuffled page of the result. Unknown users
/// are a 404; everything the repository throws surfaces as a 500 with the
/// underlying message.
#[get("/feed/{user_id}")]
pub async fn get_feed(
    path: web::Path<Uuid>,
    query: web::Query<FeedQueryParams>,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    let page = query.page.unwrap_or(1);
    let page_size = query
        .page_size
        .unwrap_or(state.feed_config.default_page_size);

    if page < 1 {
        return Err(AppError::BadRequest("page must be >= 1".to_string()));
    }
    if page_size < 1 {
        return Err(AppError::BadRequest("pageSize must be >= 1".to_string()));
    }
    let page_size = page_size.min(state.feed_config.max_page_size);

    debug!(
        user_id = %user_id,
        page = page,
        page_size = page_size,
        "feed requested"
    );

    let user = state
        .repository
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let recipes = state.repository.list_active_recipes().await?;

    let feed = state
        .ranker
        .rank(&user, recipes, page, page_size, &mut rand::thread_rng());

    Ok(HttpResponse::Ok().json(feed))
}
