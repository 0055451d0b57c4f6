pub mod bm25;
pub mod engine;
pub mod scoring;
pub mod thesaurus;

pub use bm25::{tokenize, Bm25Scorer, Bm25Stats};
pub use engine::SearchEngine;
pub use thesaurus::Thesaurus;
