//! BM25 lexical scoring over the active table's corpus statistics.
//!
//! score(D, Q) = Σ IDF(qi) · tf(qi, D) · (k1 + 1) / (tf(qi, D) + k1 · (1 - b + b · |D| / avgdl))
//!
//! Statistics (document count, average length, per-term document frequency)
//! are scanned from the table and refreshed lazily: the row count acts as a
//! table generation, and a mismatch invalidates the cached stats.

use std::collections::{HashMap, HashSet};

/// Lowercase alphanumeric tokenizer; single characters are skipped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 1)
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone)]
pub struct Bm25Stats {
    pub doc_count: usize,
    pub avgdl: f32,
    doc_freq: HashMap<String, u32>,
    /// Row count of the table these stats were scanned from.
    pub generation: usize,
}

impl Bm25Stats {
    pub fn build<'a>(docs: impl Iterator<Item = &'a str>, generation: usize) -> Self {
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut doc_count = 0usize;
        let mut total_length = 0usize;

        for doc in docs {
            let tokens = tokenize(doc);
            total_length += tokens.len();
            doc_count += 1;
            let distinct: HashSet<String> = tokens.into_iter().collect();
            for term in distinct {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let avgdl = if doc_count == 0 {
            0.0
        } else {
            total_length as f32 / doc_count as f32
        };

        Self { doc_count, avgdl, doc_freq, generation }
    }

    pub fn empty() -> Self {
        Self::build(std::iter::empty(), 0)
    }

    /// Robertson-Sparck Jones IDF, floored at zero for terms appearing in
    /// most documents.
    pub fn idf(&self, term: &str) -> f32 {
        let n = self.doc_count as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln().max(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Bm25Scorer {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Scorer {
    pub fn new(k1: f32, b: f32) -> Self {
        Self { k1, b }
    }

    pub fn score(&self, stats: &Bm25Stats, query_tokens: &[String], doc_text: &str) -> f32 {
        if stats.doc_count == 0 || query_tokens.is_empty() {
            return 0.0;
        }

        let doc_tokens = tokenize(doc_text);
        if doc_tokens.is_empty() {
            return 0.0;
        }
        let doc_len = doc_tokens.len() as f32;
        let mut term_freq: HashMap<&str, u32> = HashMap::new();
        for token in &doc_tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        let avgdl = stats.avgdl.max(1.0);
        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / avgdl);

        let mut score = 0.0;
        for term in query_tokens {
            let tf = term_freq.get(term.as_str()).copied().unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }
            score += stats.idf(term) * tf * (self.k1 + 1.0) / (tf + norm);
        }
        score
    }

    /// Bounded form used by the composite formula: s / (s + 1) maps raw
    /// scores into [0, 1) monotonically.
    pub fn score_bounded(&self, stats: &Bm25Stats, query_tokens: &[String], doc_text: &str) -> f32 {
        let raw = self.score(stats, query_tokens, doc_text);
        raw / (raw + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_stats() -> Bm25Stats {
        Bm25Stats::build(
            [
                "hexagonal architecture isolates the domain core",
                "event sourcing stores every state change",
                "caching strategies reduce database load",
                "the architecture of resilient distributed systems",
            ]
            .into_iter(),
            4,
        )
    }

    #[test]
    fn matching_documents_outscore_non_matching() {
        let stats = fixture_stats();
        let scorer = Bm25Scorer::default();
        let query = tokenize("architecture");

        let on_topic = scorer.score(&stats, &query, "hexagonal architecture isolates the domain core");
        let off_topic = scorer.score(&stats, &query, "event sourcing stores every state change");
        assert!(on_topic > 0.0);
        assert_eq!(off_topic, 0.0);
    }

    #[test]
    fn adding_a_matching_term_never_decreases_the_score() {
        let stats = fixture_stats();
        let scorer = Bm25Scorer::default();
        let query = tokenize("architecture");

        let base = "notes on systems and their structure";
        let with_term = format!("{} architecture", base);
        let with_two = format!("{} architecture architecture", base);

        let s0 = scorer.score(&stats, &query, base);
        let s1 = scorer.score(&stats, &query, &with_term);
        let s2 = scorer.score(&stats, &query, &with_two);
        assert!(s1 > s0);
        assert!(s2 >= s1);
    }

    #[test]
    fn rare_terms_have_higher_idf_than_common_terms() {
        let stats = Bm25Stats::build(
            [
                "alpha shared shared",
                "beta shared",
                "gamma shared",
            ]
            .into_iter(),
            3,
        );
        assert!(stats.idf("alpha") > stats.idf("shared"));
    }

    #[test]
    fn bounded_score_stays_below_one() {
        let stats = fixture_stats();
        let scorer = Bm25Scorer::default();
        let query = tokenize("resilient distributed architecture systems");
        let bounded = scorer.score_bounded(
            &stats,
            &query,
            "the architecture of resilient distributed systems",
        );
        assert!(bounded > 0.0);
        assert!(bounded < 1.0);
    }

    #[test]
    fn empty_corpus_scores_zero() {
        let stats = Bm25Stats::empty();
        let scorer = Bm25Scorer::default();
        assert_eq!(scorer.score(&stats, &tokenize("anything"), "anything"), 0.0);
    }

    #[test]
    fn tokenizer_drops_single_characters_and_punctuation() {
        assert_eq!(tokenize("A B, cd-ef!"), vec!["cd", "ef"]);
    }
}
