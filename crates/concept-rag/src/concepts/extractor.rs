//! LLM concept extraction.
//!
//! One call per document produces the primary concepts, coarse categories,
//! and related concepts. The prompt is fixed; the response is coerced out
//! of whatever JSON wrapping the model chose.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::llm::ChatClient;
use crate::types::ConceptBundle;

const MAX_PRIMARY_CONCEPTS: usize = 15;
const MAX_CATEGORIES: usize = 5;
const MAX_RELATED_CONCEPTS: usize = 20;

/// Characters of document text handed to the model.
const EXCERPT_CHARS: usize = 6000;

pub struct ConceptExtractor<'a> {
    client: &'a ChatClient,
}

#[derive(Deserialize)]
struct RawBundle {
    #[serde(default)]
    primary_concepts: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    related_concepts: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Extraction result: the concept bundle plus the model's one-paragraph
/// summary used to build the catalog text.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub bundle: ConceptBundle,
    pub summary: String,
}

impl<'a> ConceptExtractor<'a> {
    pub fn new(client: &'a ChatClient) -> Self {
        Self { client }
    }

    pub async fn extract(&self, title: &str, text: &str) -> Result<ExtractionResult> {
        let excerpt: String = text.chars().take(EXCERPT_CHARS).collect();
        let prompt = build_prompt(title, &excerpt);
        let raw = self.client.complete(&prompt).await?;
        parse_extraction(&raw)
    }
}

fn build_prompt(title: &str, excerpt: &str) -> String {
    format!(
        "You are indexing a technical document library. Analyze the document \
         below and respond with ONLY a JSON object of this exact shape:\n\
         {{\n\
           \"primary_concepts\": [\"...\"],\n\
           \"categories\": [\"...\"],\n\
           \"related_concepts\": [\"...\"],\n\
           \"summary\": \"one paragraph\"\n\
         }}\n\
         primary_concepts: up to {} short canonical phrases central to the document.\n\
         categories: up to {} coarse subject labels (e.g. \"software architecture\").\n\
         related_concepts: up to {} phrases the document discusses in passing.\n\n\
         Title: {}\n\
         ---\n\
         {}",
        MAX_PRIMARY_CONCEPTS, MAX_CATEGORIES, MAX_RELATED_CONCEPTS, title, excerpt
    )
}

/// Parse the model output: strip code fences, locate the outermost JSON
/// object, deserialize, then normalize each list.
pub fn parse_extraction(raw: &str) -> Result<ExtractionResult> {
    let json_text = extract_json_object(raw).ok_or_else(|| Error::SchemaValidation {
        field: "concept_extraction".to_string(),
        reason: "response contains no JSON object".to_string(),
    })?;

    let parsed: RawBundle = serde_json::from_str(json_text).map_err(|e| Error::SchemaValidation {
        field: "concept_extraction".to_string(),
        reason: format!("malformed JSON: {}", e),
    })?;

    let bundle = ConceptBundle {
        primary_concepts: normalize_names(parsed.primary_concepts, MAX_PRIMARY_CONCEPTS),
        categories: normalize_names(parsed.categories, MAX_CATEGORIES),
        related_concepts: normalize_names(parsed.related_concepts, MAX_RELATED_CONCEPTS),
    };

    if bundle.primary_concepts.is_empty() {
        return Err(Error::SchemaValidation {
            field: "primary_concepts".to_string(),
            reason: "extraction produced no concepts".to_string(),
        });
    }

    Ok(ExtractionResult {
        bundle,
        summary: parsed.summary.unwrap_or_default().trim().to_string(),
    })
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Trim, drop empties and over-long phrases, dedup case-insensitively
/// preserving the first spelling, cap the list length.
fn normalize_names(names: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.len() > 120 {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
        }
        if out.len() >= cap {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let raw = "Here you go:\n```json\n{\"primary_concepts\": [\"Dependency Injection\"], \
                   \"categories\": [\"software architecture\"], \
                   \"related_concepts\": [\"Inversion of Control\"], \
                   \"summary\": \"A book about wiring.\"}\n```";
        let result = parse_extraction(raw).unwrap();
        assert_eq!(result.bundle.primary_concepts, vec!["Dependency Injection"]);
        assert_eq!(result.bundle.categories, vec!["software architecture"]);
        assert_eq!(result.summary, "A book about wiring.");
    }

    #[test]
    fn deduplicates_case_insensitively_keeping_first_spelling() {
        let raw = r#"{"primary_concepts": ["CQRS", "cqrs", "Event Sourcing"], "categories": [], "related_concepts": []}"#;
        let result = parse_extraction(raw).unwrap();
        assert_eq!(result.bundle.primary_concepts, vec!["CQRS", "Event Sourcing"]);
    }

    #[test]
    fn empty_extraction_is_a_schema_error() {
        let raw = r#"{"primary_concepts": [], "categories": ["x"], "related_concepts": []}"#;
        let err = parse_extraction(raw).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_VALIDATION_ERROR");
    }

    #[test]
    fn non_json_response_is_a_schema_error() {
        let err = parse_extraction("I could not analyze this document.").unwrap_err();
        assert_eq!(err.code(), "SCHEMA_VALIDATION_ERROR");
    }

    #[test]
    fn caps_list_lengths() {
        let many: Vec<String> = (0..40).map(|i| format!("concept {}", i)).collect();
        let raw = format!(
            r#"{{"primary_concepts": {}, "categories": [], "related_concepts": []}}"#,
            serde_json::to_string(&many).unwrap()
        );
        let result = parse_extraction(&raw).unwrap();
        assert_eq!(result.bundle.primary_concepts.len(), MAX_PRIMARY_CONCEPTS);
    }
}
