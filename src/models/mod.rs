use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// User profile as seen by the feed ranker.
///
/// Only the fields that feed into scoring are carried here; account,
/// social-graph and subscription data live in their own services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    /// Declared topic interests, matched against recipe tags.
    #[serde(default)]
    pub topics: HashSet<String>,
    /// Declared diet ("veg", "vegan", "non-veg", ...). Absent means the
    /// user never picked one and the diet signal contributes nothing.
    #[serde(default)]
    pub food_habit: Option<String>,
}

/// A single up/down vote on a recipe.
///
/// The flags are independent booleans, not an enum: the source records allow
/// both to be set and scoring counts such a record toward both sums.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub voter_id: Uuid,
    pub upvote: bool,
    pub downvote: bool,
}

/// A star rating left by one user (at most one per voter).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub voter_id: Uuid,
    pub rating: f64,
}

/// Recipe as consumed by the ranker.
///
/// The repository only returns non-deleted recipes, so no deleted flag is
/// modeled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: Uuid,
    #[serde(default)]
    pub tags: Vec<String>,
    pub diet: String,
    #[serde(default)]
    pub votes: Vec<Vote>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
    pub created_at: DateTime<Utc>,
}

impl Recipe {
    pub fn up_votes(&self) -> usize {
        self.votes.iter().filter(|v| v.upvote).count()
    }

    pub fn down_votes(&self) -> usize {
        self.votes.iter().filter(|v| v.downvote).count()
    }

    /// Mean rating, or None when nobody rated the recipe yet.
    pub fn average_rating(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        let sum: f64 = self.ratings.iter().map(|r| r.rating).sum();
        Some(sum / self.ratings.len() as f64)
    }
}

/// Pagination envelope returned by the feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub current_page: usize,
    pub total_pages: usize,
    /// Size of the candidate set after threshold filtering or backfill,
    /// not the size of the returned slice.
    pub total_recipes: usize,
    pub recipes: Vec<Recipe>,
}
