//! Mnemograph memory — episodes, recall scoring, reflection

pub mod episodes;
pub mod reflect;

pub use episodes::{EpisodeEngine, EpisodeInput, RecallQuery, ScoredEpisode};
pub use reflect::{reflect, Pattern, ReflectReport};
