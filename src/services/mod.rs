pub mod feed_ranking;

pub use feed_ranking::{FeedRanker, RankingWeights};
