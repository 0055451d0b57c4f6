//! Component scores and the composite ranking formula.
//!
//! Catalog profile:
//!   0.25·vector + 0.25·bm25 + 0.20·title + 0.20·concept + 0.10·thesaurus
//! Chunk profile:
//!   0.40·vector + 0.25·bm25 + 0.20·concept + 0.15·thesaurus
//!
//! Vector similarity is mapped to [0, 1]; BM25 enters through the bounded
//! s/(s+1) form; title match saturates at 1.25 (Jaccard plus the exact-match
//! bonus), which bounds the catalog composite at 1.05.

use std::cmp::Ordering;
use std::collections::HashSet;

use super::bm25::tokenize;
use super::thesaurus::Thesaurus;
use crate::hash::title_from_source;
use crate::types::ScoreBreakdown;

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub vector: f32,
    pub bm25: f32,
    pub title: f32,
    pub concept: f32,
    pub thesaurus: f32,
}

pub const CATALOG_WEIGHTS: Weights = Weights {
    vector: 0.25,
    bm25: 0.25,
    title: 0.20,
    concept: 0.20,
    thesaurus: 0.10,
};

pub const CHUNK_WEIGHTS: Weights = Weights {
    vector: 0.40,
    bm25: 0.25,
    title: 0.0,
    concept: 0.20,
    thesaurus: 0.15,
};

impl Weights {
    pub fn combine(&self, breakdown: &ScoreBreakdown) -> f32 {
        self.vector * breakdown.vector
            + self.bm25 * breakdown.bm25
            + self.title * breakdown.title
            + self.concept * breakdown.concept
            + self.thesaurus * breakdown.thesaurus
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Map cosine similarity into [0, 1] via (1 + cos) / 2.
pub fn similarity_unit(cos: f32) -> f32 {
    ((1.0 + cos) / 2.0).clamp(0.0, 1.0)
}

/// The store reports cosine distance (1 - cos) on search hits.
pub fn similarity_from_distance(distance: f32) -> f32 {
    similarity_unit(1.0 - distance)
}

/// Jaccard of query tokens over filename tokens, plus a 0.5 bonus when
/// every query token appears. Saturates at 1.25.
pub fn title_match(query_tokens: &[String], source: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let title_tokens: HashSet<String> = tokenize(&title_from_source(source)).into_iter().collect();
    if title_tokens.is_empty() {
        return 0.0;
    }
    let query_set: HashSet<&String> = query_tokens.iter().collect();
    let matched = query_set
        .iter()
        .filter(|t| title_tokens.contains(t.as_str()))
        .count();
    let union = query_set.len() + title_tokens.len() - matched;
    let jaccard = matched as f32 / union as f32;
    let bonus = if matched == query_set.len() { 0.5 } else { 0.0 };
    (jaccard + bonus).min(1.25)
}

/// Fraction of query tokens matched as whole words in any concept name.
pub fn concept_alignment(query_tokens: &[String], concept_names: &[String]) -> f32 {
    if query_tokens.is_empty() || concept_names.is_empty() {
        return 0.0;
    }
    let concept_tokens: HashSet<String> = concept_names
        .iter()
        .flat_map(|name| tokenize(name))
        .collect();
    let matched = query_tokens
        .iter()
        .filter(|t| concept_tokens.contains(t.as_str()))
        .count();
    matched as f32 / query_tokens.len() as f32
}

/// Direct whole-word matches score 1.0 per token; matches reached only
/// through expansion count at half weight.
pub fn thesaurus_score(query_tokens: &[String], text: &str, thesaurus: &Thesaurus) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let mut total = 0.0f32;
    for token in query_tokens {
        if text_tokens.contains(token.as_str()) {
            total += 1.0;
        } else if thesaurus
            .expand(token)
            .iter()
            .any(|syn| text_tokens.contains(syn.as_str()))
        {
            total += 0.5;
        }
    }
    total / query_tokens.len() as f32
}

/// Deterministic tie-break: higher concept_density, then lower id, then
/// lexicographic source.
pub fn compare_ranked(
    a: (f32, f32, u32, &str),
    b: (f32, f32, u32, &str),
) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
        .then_with(|| a.2.cmp(&b.2))
        .then_with(|| a.3.cmp(b.3))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        tokenize(s)
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, -0.2, 0.9];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_mapping_is_bounded() {
        assert_eq!(similarity_unit(1.0), 1.0);
        assert_eq!(similarity_unit(-1.0), 0.0);
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(2.0), 0.0);
    }

    #[test]
    fn title_match_rewards_full_coverage() {
        let full = title_match(&toks("clean architecture"), "/lib/Clean_Architecture.pdf");
        let partial = title_match(&toks("clean code principles"), "/lib/Clean_Architecture.pdf");
        assert!(full > 1.0, "exact coverage earns the bonus: {}", full);
        assert!(partial < 0.5);
        assert!(full <= 1.25);
    }

    #[test]
    fn title_match_ignores_extension_and_underscores() {
        let score = title_match(&toks("domain driven design"), "/x/Domain_Driven_Design.epub");
        assert!(score > 1.0);
    }

    #[test]
    fn concept_alignment_is_fractional() {
        let names = vec!["dependency injection".to_string(), "inversion of control".to_string()];
        let half = concept_alignment(&toks("dependency graphs"), &names);
        assert!((half - 0.5).abs() < 1e-6);
        let full = concept_alignment(&toks("dependency injection"), &names);
        assert!((full - 1.0).abs() < 1e-6);
    }

    #[test]
    fn thesaurus_matches_count_half() {
        let thesaurus = Thesaurus::builtin();
        // "design" is absent from the text but expands to "architecture".
        let score = thesaurus_score(
            &toks("design"),
            "an essay on software architecture",
            &thesaurus,
        );
        assert!((score - 0.5).abs() < 1e-6);

        let direct = thesaurus_score(
            &toks("architecture"),
            "an essay on software architecture",
            &thesaurus,
        );
        assert!((direct - 1.0).abs() < 1e-6);
    }

    #[test]
    fn composite_score_is_bounded() {
        // Every component at its maximum: vector 1, bm25 < 1, title 1.25,
        // concept 1, thesaurus 1.
        let breakdown = ScoreBreakdown {
            vector: 1.0,
            bm25: 1.0,
            title: 1.25,
            concept: 1.0,
            thesaurus: 1.0,
        };
        let score = CATALOG_WEIGHTS.combine(&breakdown);
        assert!(score <= 1.05 + 1e-6);
        assert!(CHUNK_WEIGHTS.combine(&breakdown) <= 1.0 + 1e-6);
    }

    #[test]
    fn tie_break_is_deterministic() {
        // Equal scores: higher density wins.
        assert_eq!(
            compare_ranked((0.5, 0.9, 7, "/b"), (0.5, 0.1, 3, "/a")),
            Ordering::Less
        );
        // Equal scores and densities: lower id wins.
        assert_eq!(
            compare_ranked((0.5, 0.2, 3, "/b"), (0.5, 0.2, 7, "/a")),
            Ordering::Less
        );
        // Fully equal but for source: lexicographic source.
        assert_eq!(
            compare_ranked((0.5, 0.2, 3, "/a"), (0.5, 0.2, 3, "/b")),
            Ordering::Less
        );
    }
}
