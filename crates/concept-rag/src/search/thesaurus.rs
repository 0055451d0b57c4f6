//! Query expansion over a compiled synonym/hypernym table.
//!
//! Expanded matches count at half weight in the composite score. The
//! built-in table covers the vocabulary of a technical document library;
//! concept names loaded at engine construction extend it.

use std::collections::HashMap;

/// Symmetric synonym groups plus a few directed hypernyms.
const SYNONYM_GROUPS: &[&[&str]] = &[
    &["architecture", "design", "structure"],
    &["dependency", "coupling"],
    &["error", "fault", "failure", "exception"],
    &["concurrency", "parallelism", "threading"],
    &["cache", "caching", "memoization"],
    &["search", "retrieval", "lookup", "query"],
    &["pattern", "idiom"],
    &["test", "testing", "verification"],
    &["database", "store", "storage"],
    &["vector", "embedding"],
    &["chunk", "segment", "passage"],
    &["performance", "latency", "throughput"],
    &["security", "authentication", "authorization"],
    &["message", "event", "notification"],
    &["service", "server", "daemon"],
    &["configuration", "config", "settings"],
    &["refactoring", "restructuring"],
    &["microservice", "microservices"],
    &["api", "interface", "contract"],
    &["resilience", "reliability", "robustness"],
    &["book", "volume", "chapter"],
];

const HYPERNYMS: &[(&str, &str)] = &[
    ("pdf", "document"),
    ("epub", "document"),
    ("bm25", "ranking"),
    ("lru", "cache"),
    ("toc", "contents"),
];

pub struct Thesaurus {
    expansions: HashMap<String, Vec<String>>,
}

impl Thesaurus {
    pub fn builtin() -> Self {
        let mut expansions: HashMap<String, Vec<String>> = HashMap::new();
        for group in SYNONYM_GROUPS {
            for term in *group {
                let others: Vec<String> = group
                    .iter()
                    .filter(|t| *t != term)
                    .map(|t| t.to_string())
                    .collect();
                expansions.entry(term.to_string()).or_default().extend(others);
            }
        }
        for (term, hypernym) in HYPERNYMS {
            expansions
                .entry(term.to_string())
                .or_default()
                .push(hypernym.to_string());
        }
        Self { expansions }
    }

    /// Extend the table with stems shared across concept names, so queries
    /// phrased with one concept's wording reach its lexical neighbours.
    pub fn extend_with_concepts(&mut self, names: &[String]) {
        let mut by_stem: HashMap<String, Vec<String>> = HashMap::new();
        for name in names {
            for token in super::bm25::tokenize(name) {
                let stem = stem_of(&token);
                if stem.len() >= 4 {
                    let entry = by_stem.entry(stem).or_default();
                    if !entry.contains(&token) {
                        entry.push(token);
                    }
                }
            }
        }
        for variants in by_stem.into_values() {
            if variants.len() < 2 {
                continue;
            }
            for variant in &variants {
                let others: Vec<String> = variants
                    .iter()
                    .filter(|v| *v != variant)
                    .cloned()
                    .collect();
                let entry = self.expansions.entry(variant.clone()).or_default();
                for other in others {
                    if !entry.contains(&other) {
                        entry.push(other);
                    }
                }
            }
        }
    }

    /// Synonyms and hypernyms for a (lowercased) token, excluding itself.
    pub fn expand(&self, token: &str) -> &[String] {
        self.expansions
            .get(token)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Crude suffix stripper, enough to connect singular/plural and -ing/-ion
/// variants of the same concept word.
fn stem_of(token: &str) -> String {
    for suffix in ["ings", "ing", "ions", "ion", "es", "s"] {
        if let Some(stripped) = token.strip_suffix(suffix) {
            if stripped.len() >= 3 {
                return stripped.to_string();
            }
        }
    }
    token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_groups_are_symmetric() {
        let thesaurus = Thesaurus::builtin();
        assert!(thesaurus.expand("architecture").contains(&"design".to_string()));
        assert!(thesaurus.expand("design").contains(&"architecture".to_string()));
    }

    #[test]
    fn hypernyms_are_directed() {
        let thesaurus = Thesaurus::builtin();
        assert!(thesaurus.expand("pdf").contains(&"document".to_string()));
        assert!(!thesaurus.expand("document").contains(&"pdf".to_string()));
    }

    #[test]
    fn unknown_tokens_expand_to_nothing() {
        let thesaurus = Thesaurus::builtin();
        assert!(thesaurus.expand("xyzzy").is_empty());
    }

    #[test]
    fn concept_names_link_shared_stems() {
        let mut thesaurus = Thesaurus::builtin();
        thesaurus.extend_with_concepts(&[
            "dependency injection".to_string(),
            "injecting collaborators".to_string(),
        ]);
        assert!(thesaurus.expand("injection").contains(&"injecting".to_string()));
    }
}
