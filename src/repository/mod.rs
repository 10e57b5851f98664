use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{Rating, Recipe, UserProfile, Vote};

/// Read boundary toward the account and recipe subsystems.
///
/// The ranker only ever needs two lookups: the requesting user's profile
/// and a snapshot of every non-deleted recipe. Everything else (CRUD,
/// follows, payments) belongs to other services.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// Full snapshot of recipes with `deleted = false`, newest first.
    async fn list_active_recipes(&self) -> Result<Vec<Recipe>>;
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    topics: Vec<String>,
    food_habit: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct RecipeRow {
    id: Uuid,
    tags: Vec<String>,
    diet: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct VoteRow {
    recipe_id: Uuid,
    voter_id: Uuid,
    upvote: bool,
    downvote: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct RatingRow {
    recipe_id: Uuid,
    voter_id: Uuid,
    rating: f64,
}

/// Postgres-backed repository.
#[derive(Clone)]
pub struct PgFeedRepository {
    pool: PgPool,
}

impl PgFeedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedRepository for PgFeedRepository {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, topics, food_habit
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|u| UserProfile {
            id: u.id,
            topics: u.topics.into_iter().collect(),
            food_habit: u.food_habit,
        }))
    }

    async fn list_active_recipes(&self) -> Result<Vec<Recipe>> {
        let recipe_rows = sqlx::query_as::<_, RecipeRow>(
            r#"
            SELECT id, tags, diet, created_at
            FROM recipes
            WHERE deleted = FALSE
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let vote_rows = sqlx::query_as::<_, VoteRow>(
            r#"
            SELECT v.recipe_id, v.voter_id, v.upvote, v.downvote
            FROM recipe_votes v
            INNER JOIN recipes r ON r.id = v.recipe_id
            WHERE r.deleted = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let rating_rows = sqlx::query_as::<_, RatingRow>(
            r#"
            SELECT rt.recipe_id, rt.voter_id, rt.rating
            FROM recipe_ratings rt
            INNER JOIN recipes r ON r.id = rt.recipe_id
            WHERE r.deleted = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut votes_by_recipe: HashMap<Uuid, Vec<Vote>> = HashMap::new();
        for v in vote_rows {
            votes_by_recipe.entry(v.recipe_id).or_default().push(Vote {
                voter_id: v.voter_id,
                upvote: v.upvote,
                downvote: v.downvote,
            });
        }

        let mut ratings_by_recipe: HashMap<Uuid, Vec<Rating>> = HashMap::new();
        for r in rating_rows {
            ratings_by_recipe.entry(r.recipe_id).or_default().push(Rating {
                voter_id: r.voter_id,
                rating: r.rating,
            });
        }

        let recipes = recipe_rows
            .into_iter()
            .map(|row| Recipe {
                votes: votes_by_recipe.remove(&row.id).unwrap_or_default(),
                ratings: ratings_by_recipe.remove(&row.id).unwrap_or_default(),
                id: row.id,
                tags: row.tags,
                diet: row.diet,
                created_at: row.created_at,
            })
            .collect();

        Ok(recipes)
    }
}
