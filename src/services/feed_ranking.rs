//! Personalized feed ranking.
//!
//! Scores every non-deleted recipe against the requesting user's declared
//! topics and diet, blends in community engagement (votes, ratings), then
//! threshold-filters with a backfill guarantee, sorts, paginates and
//! shuffles the returned page. Pure over its inputs; the only
//! non-determinism is the intra-page shuffle, which is injected via
//! `rand::Rng` so tests can seed it.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{FeedPage, Recipe, UserProfile};

const DIET_VEG: &str = "veg";
const DIET_VEGAN: &str = "vegan";

/// Additive signal weights for recipe scoring.
#[derive(Debug, Clone)]
pub struct RankingWeights {
    /// Every recipe tag appears in the user's topics (recipe has >= 1 tag).
    pub full_tag_match: f64,
    /// At least one, but not all, recipe tags match.
    pub partial_tag_match: f64,
    /// Per upvote.
    pub up_vote: f64,
    /// Per downvote, subtracted.
    pub down_vote: f64,
    /// Multiplier on the mean rating when the recipe has ratings.
    pub rating: f64,
    /// Recipe diet equals the user's food habit.
    pub diet_match: f64,
    /// veg <-> vegan cross match.
    pub diet_cross_match: f64,
    /// Any other diet combination; negative.
    pub diet_mismatch: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            full_tag_match: 20.0,
            partial_tag_match: 7.0,
            up_vote: 2.5,
            down_vote: 2.0,
            rating: 2.0,
            diet_match: 35.0,
            diet_cross_match: 15.0,
            diet_mismatch: -13.0,
        }
    }
}

/// Feed ranking engine.
///
/// Recomputed in full on every request against a corpus snapshot supplied
/// by the repository; no rank state is kept between calls.
pub struct FeedRanker {
    weights: RankingWeights,
    /// Minimum score a recipe must reach to enter the feed directly.
    rank_threshold: f64,
    /// When fewer than this many recipes clear the threshold, the feed is
    /// backfilled with the top recipes by score regardless of threshold.
    backfill_count: usize,
}

impl Default for FeedRanker {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedRanker {
    pub fn new() -> Self {
        Self {
            weights: RankingWeights::default(),
            rank_threshold: 13.0,
            backfill_count: 20,
        }
    }

    pub fn with_weights(weights: RankingWeights) -> Self {
        Self {
            weights,
            ..Self::new()
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.rank_threshold = threshold;
        self
    }

    pub fn with_backfill_count(mut self, count: usize) -> Self {
        self.backfill_count = count;
        self
    }

    /// Score a single recipe for a user.
    ///
    /// Deterministic over its inputs: identical recipe and profile always
    /// produce the identical score.
    pub fn score(&self, user: &UserProfile, recipe: &Recipe) -> f64 {
        let mut score = 0.0;

        score += self.tag_affinity(user, recipe);

        score += recipe.up_votes() as f64 * self.weights.up_vote;
        score -= recipe.down_votes() as f64 * self.weights.down_vote;

        if let Some(avg) = recipe.average_rating() {
            score += avg * self.weights.rating;
        }

        score += self.diet_affinity(user, recipe);

        debug!(
            recipe_id = %recipe.id,
            user_id = %user.id,
            score = score,
            "recipe scored"
        );

        score
    }

    fn tag_affinity(&self, user: &UserProfile, recipe: &Recipe) -> f64 {
        let matching = recipe
            .tags
            .iter()
            .filter(|t| user.topics.contains(t.as_str()))
            .count();

        if !recipe.tags.is_empty() && matching == recipe.tags.len() {
            self.weights.full_tag_match
        } else if matching > 0 {
            self.weights.partial_tag_match
        } else {
            0.0
        }
    }

    fn diet_affinity(&self, user: &UserProfile, recipe: &Recipe) -> f64 {
        // A user who never declared a food habit gets no diet signal at
        // all, neither bonus nor penalty.
        let habit = match user.food_habit.as_deref() {
            Some(h) => h,
            None => return 0.0,
        };

        if habit == recipe.diet {
            self.weights.diet_match
        } else if (habit == DIET_VEGAN && recipe.diet == DIET_VEG)
            || (habit == DIET_VEG && recipe.diet == DIET_VEGAN)
        {
            self.weights.diet_cross_match
        } else {
            self.weights.diet_mismatch
        }
    }

    /// Rank the full corpus for a user and return one page.
    ///
    /// `page` and `page_size` are 1-based and must be >= 1 (validated at
    /// the handler boundary). A page past the end yields an empty slice,
    /// not an error. Repeated calls on an unchanged corpus return the same
    /// set of recipes per page; the order within the page is shuffled.
    pub fn rank<R: Rng>(
        &self,
        user: &UserProfile,
        recipes: Vec<Recipe>,
        page: usize,
        page_size: usize,
        rng: &mut R,
    ) -> FeedPage {
        let corpus_size = recipes.len();

        // Stage 1: score every recipe once, keyed by id for the later stages.
        let scores: HashMap<Uuid, f64> = recipes
            .iter()
            .map(|r| (r.id, self.score(user, r)))
            .collect();

        // Stage 2: threshold filter with backfill guarantee.
        let qualified = recipes
            .iter()
            .filter(|r| scores[&r.id] >= self.rank_threshold)
            .count();

        let mut candidates: Vec<Recipe> = if qualified < self.backfill_count {
            // Too sparse: take the top recipes by score from the whole
            // corpus instead, so the feed never comes back near-empty.
            debug!(
                qualified = qualified,
                backfill_count = self.backfill_count,
                "threshold filter too sparse, backfilling from full corpus"
            );
            let mut all = recipes;
            sort_by_score(&mut all, &scores);
            all.truncate(self.backfill_count);
            all
        } else {
            recipes
                .into_iter()
                .filter(|r| scores[&r.id] >= self.rank_threshold)
                .collect()
        };

        // Stage 3: deterministic order, score descending, newest first on
        // ties. Required for pagination to stay consistent across calls.
        sort_by_score(&mut candidates, &scores);

        // Stage 4: paginate over the candidate set.
        let total_recipes = candidates.len();
        let total_pages = total_recipes.div_ceil(page_size);
        let start = page.saturating_sub(1).saturating_mul(page_size);
        let mut items: Vec<Recipe> = if start >= total_recipes {
            Vec::new()
        } else {
            candidates
                .into_iter()
                .skip(start)
                .take(page_size)
                .collect()
        };

        // Stage 5: shuffle within the page so repeat visits don't always
        // show the identical top-N order. Set membership is unaffected.
        items.shuffle(rng);

        info!(
            user_id = %user.id,
            corpus = corpus_size,
            candidates = total_recipes,
            page = page,
            returned = items.len(),
            "feed ranked"
        );

        FeedPage {
            current_page: page,
            total_pages,
            total_recipes,
            recipes: items,
        }
    }
}

/// Stable sort: score descending, then created_at descending.
fn sort_by_score(recipes: &mut [Recipe], scores: &HashMap<Uuid, f64>) {
    recipes.sort_by(|a, b| {
        scores[&b.id]
            .partial_cmp(&scores[&a.id])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    use crate::models::{Rating, Vote};

    fn user(topics: &[&str], food_habit: Option<&str>) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            food_habit: food_habit.map(|h| h.to_string()),
        }
    }

    fn recipe(tags: &[&str], diet: &str) -> Recipe {
        Recipe {
            id: Uuid::new_v4(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            diet: diet.to_string(),
            votes: vec![],
            ratings: vec![],
            created_at: Utc::now(),
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_score_is_deterministic() {
        let ranker = FeedRanker::new();
        let u = user(&["pasta"], Some("veg"));
        let mut r = recipe(&["pasta", "italian"], "veg");
        r.votes = vec![Vote {
            voter_id: Uuid::new_v4(),
            upvote: true,
            downvote: false,
        }];
        r.ratings = vec![Rating {
            voter_id: Uuid::new_v4(),
            rating: 4.0,
        }];

        let first = ranker.score(&u, &r);
        let second = ranker.score(&u, &r);
        assert_eq!(first, second);
        // partial 7 + upvote 2.5 + rating 8 + diet 35
        assert_eq!(first, 52.5);
    }

    #[test]
    fn test_tag_affinity_ordering() {
        let ranker = FeedRanker::new();
        let u = user(&["pasta", "italian"], None);

        let full = recipe(&["pasta", "italian"], "veg");
        let partial = recipe(&["pasta", "thai"], "veg");
        let none = recipe(&["thai"], "veg");

        let full_score = ranker.score(&u, &full);
        let partial_score = ranker.score(&u, &partial);
        let none_score = ranker.score(&u, &none);

        assert!(full_score > partial_score);
        assert!(partial_score > none_score);
        assert_eq!(full_score, 20.0);
        assert_eq!(partial_score, 7.0);
        assert_eq!(none_score, 0.0);
    }

    #[test]
    fn test_partial_match_scores_seven() {
        let ranker = FeedRanker::new();
        let u = user(&["pasta", "italian"], None);
        let r = recipe(&["pasta"], "veg");

        // All of the recipe's tags match, so this is a full match even
        // though the user has more topics than the recipe has tags.
        assert_eq!(ranker.score(&u, &r), 20.0);

        let r2 = recipe(&["pasta", "quick"], "veg");
        assert_eq!(ranker.score(&u, &r2), 7.0);
    }

    #[test]
    fn test_zero_tags_no_bonus() {
        let ranker = FeedRanker::new();
        let u = user(&["pasta"], None);
        let r = recipe(&[], "veg");
        assert_eq!(ranker.score(&u, &r), 0.0);
    }

    #[test]
    fn test_diet_affinity_ordering() {
        let ranker = FeedRanker::new();

        let exact = ranker.score(&user(&[], Some("vegan")), &recipe(&[], "vegan"));
        let cross = ranker.score(&user(&[], Some("vegan")), &recipe(&[], "veg"));
        let mismatch = ranker.score(&user(&[], Some("vegan")), &recipe(&[], "non-veg"));

        assert_eq!(exact, 35.0);
        assert_eq!(cross, 15.0);
        assert_eq!(mismatch, -13.0);
        assert!(exact > cross && cross > mismatch);

        // Cross match is symmetric.
        let cross_rev = ranker.score(&user(&[], Some("veg")), &recipe(&[], "vegan"));
        assert_eq!(cross_rev, 15.0);
    }

    #[test]
    fn test_no_food_habit_no_diet_signal() {
        let ranker = FeedRanker::new();
        let score = ranker.score(&user(&[], None), &recipe(&[], "non-veg"));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_vote_signal_counts_dual_flag_records_twice() {
        let ranker = FeedRanker::new();
        let u = user(&[], None);
        let mut r = recipe(&[], "veg");
        r.votes = vec![
            Vote {
                voter_id: Uuid::new_v4(),
                upvote: true,
                downvote: false,
            },
            Vote {
                voter_id: Uuid::new_v4(),
                upvote: true,
                downvote: true,
            },
        ];

        // 2 upvotes * 2.5 - 1 downvote * 2.0
        assert_eq!(ranker.score(&u, &r), 3.0);
    }

    #[test]
    fn test_rating_signal_uses_average() {
        let ranker = FeedRanker::new();
        let u = user(&[], None);
        let mut r = recipe(&[], "veg");
        r.ratings = vec![
            Rating {
                voter_id: Uuid::new_v4(),
                rating: 5.0,
            },
            Rating {
                voter_id: Uuid::new_v4(),
                rating: 3.0,
            },
        ];

        assert_eq!(ranker.score(&u, &r), 8.0);
    }

    /// Corpus of 25 where 22 clear the threshold: no backfill, the
    /// candidate set is exactly those 22.
    #[test]
    fn test_no_backfill_when_enough_qualify() {
        let ranker = FeedRanker::new();
        let u = user(&[], Some("veg"));

        let mut recipes = Vec::new();
        for _ in 0..22 {
            recipes.push(recipe(&[], "veg")); // +35, clears threshold
        }
        for _ in 0..3 {
            recipes.push(recipe(&[], "non-veg")); // -13
        }

        let page = ranker.rank(&u, recipes, 1, 10, &mut rng());
        assert_eq!(page.total_recipes, 22);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.recipes.len(), 10);
    }

    /// Page 3 of the 22-candidate set holds the remaining 2.
    #[test]
    fn test_last_page_remainder() {
        let ranker = FeedRanker::new();
        let u = user(&[], Some("veg"));

        let mut recipes = Vec::new();
        for _ in 0..22 {
            recipes.push(recipe(&[], "veg"));
        }
        for _ in 0..3 {
            recipes.push(recipe(&[], "non-veg"));
        }

        let page = ranker.rank(&u, recipes, 3, 10, &mut rng());
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.recipes.len(), 2);
    }

    /// Corpus of 25 where only 5 qualify: backfill takes the top 20 by
    /// score regardless of threshold.
    #[test]
    fn test_backfill_takes_top_twenty() {
        let ranker = FeedRanker::new();
        let u = user(&[], Some("veg"));

        let mut recipes = Vec::new();
        for _ in 0..5 {
            recipes.push(recipe(&[], "veg")); // +35
        }
        for _ in 0..20 {
            recipes.push(recipe(&[], "non-veg")); // -13
        }

        let page = ranker.rank(&u, recipes, 1, 10, &mut rng());
        assert_eq!(page.total_recipes, 20);
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn test_backfill_capped_by_corpus_size() {
        let ranker = FeedRanker::new();
        let u = user(&[], Some("veg"));

        let recipes: Vec<Recipe> = (0..7).map(|_| recipe(&[], "non-veg")).collect();
        let page = ranker.rank(&u, recipes, 1, 10, &mut rng());

        // min(20, corpus size)
        assert_eq!(page.total_recipes, 7);
        assert_eq!(page.recipes.len(), 7);
    }

    #[test]
    fn test_backfill_prefers_highest_scores() {
        let ranker = FeedRanker::new();
        let u = user(&["pasta"], Some("veg"));

        let good = recipe(&["pasta"], "veg"); // 20 + 35
        let good_id = good.id;
        let mut recipes = vec![good];
        for _ in 0..25 {
            recipes.push(recipe(&[], "non-veg")); // -13 each
        }

        let page = ranker.rank(&u, recipes, 1, 20, &mut rng());
        assert_eq!(page.total_recipes, 20);
        assert!(page.recipes.iter().any(|r| r.id == good_id));
    }

    #[test]
    fn test_empty_corpus() {
        let ranker = FeedRanker::new();
        let page = ranker.rank(&user(&[], None), vec![], 1, 10, &mut rng());

        assert_eq!(page.total_pages, 0);
        assert_eq!(page.total_recipes, 0);
        assert!(page.recipes.is_empty());
    }

    #[test]
    fn test_out_of_range_page_is_empty() {
        let ranker = FeedRanker::new();
        let u = user(&[], Some("veg"));
        let recipes: Vec<Recipe> = (0..5).map(|_| recipe(&[], "veg")).collect();

        let page = ranker.rank(&u, recipes, 99, 10, &mut rng());
        assert_eq!(page.total_pages, 1);
        assert!(page.recipes.is_empty());
    }

    /// Repeated calls on an unchanged corpus return the same set per page;
    /// order within the page is allowed to differ.
    #[test]
    fn test_page_set_stable_across_calls() {
        let ranker = FeedRanker::new();
        let u = user(&[], Some("veg"));

        let mut recipes = Vec::new();
        let base = Utc::now();
        for i in 0..30 {
            let mut r = recipe(&[], "veg");
            // Distinct timestamps so the sort is fully determined.
            r.created_at = base - Duration::minutes(i);
            // Distinct vote counts give distinct scores.
            r.votes = (0..i)
                .map(|_| Vote {
                    voter_id: Uuid::new_v4(),
                    upvote: true,
                    downvote: false,
                })
                .collect();
            recipes.push(r);
        }

        let mut rng_a = StdRng::seed_from_u64(1);
        let mut rng_b = StdRng::seed_from_u64(2);

        let page_a = ranker.rank(&u, recipes.clone(), 2, 10, &mut rng_a);
        let page_b = ranker.rank(&u, recipes, 2, 10, &mut rng_b);

        let ids_a: HashSet<Uuid> = page_a.recipes.iter().map(|r| r.id).collect();
        let ids_b: HashSet<Uuid> = page_b.recipes.iter().map(|r| r.id).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(page_a.total_pages, page_b.total_pages);
    }

    #[test]
    fn test_pages_do_not_overlap() {
        let ranker = FeedRanker::new();
        let u = user(&[], Some("veg"));

        let mut recipes = Vec::new();
        let base = Utc::now();
        for i in 0..25 {
            let mut r = recipe(&[], "veg");
            r.created_at = base - Duration::minutes(i);
            recipes.push(r);
        }

        let page1 = ranker.rank(&u, recipes.clone(), 1, 10, &mut rng());
        let page2 = ranker.rank(&u, recipes, 2, 10, &mut rng());

        let ids1: HashSet<Uuid> = page1.recipes.iter().map(|r| r.id).collect();
        let ids2: HashSet<Uuid> = page2.recipes.iter().map(|r| r.id).collect();
        assert!(ids1.is_disjoint(&ids2));
    }

    #[test]
    fn test_ties_broken_by_newest_first() {
        // Threshold lowered so both candidates qualify without backfill
        // masking the ordering under test.
        let ranker = FeedRanker::new().with_threshold(-100.0).with_backfill_count(0);
        let u = user(&[], Some("veg"));

        let mut older = recipe(&[], "veg");
        older.created_at = Utc::now() - Duration::hours(2);
        let mut newer = recipe(&[], "veg");
        newer.created_at = Utc::now();
        let newer_id = newer.id;

        // page_size 1: page 1 must hold the newer of the two equal scores.
        let page = ranker.rank(&u, vec![older, newer], 1, 1, &mut rng());
        assert_eq!(page.recipes[0].id, newer_id);
    }
}
