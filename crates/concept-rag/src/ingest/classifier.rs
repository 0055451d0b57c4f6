//! Meta-content classifier.
//!
//! Heuristic-only, chunk-local flags used as search filters: table of
//! contents, front/back matter, reference sections, plus an aggregate
//! `is_meta_content`. Position heuristics use `page_number / total_pages`;
//! running header/footer detection would need cross-page state and is out
//! of scope.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetaFlags {
    pub is_toc: bool,
    pub is_front_matter: bool,
    pub is_back_matter: bool,
    pub is_meta_content: bool,
    pub is_reference: bool,
    pub has_math_issues: bool,
    /// Strength of the strongest signal, for debugging.
    pub confidence: f32,
}

const FRONT_MATTER_KEYWORDS: &[&str] = &[
    "copyright",
    "all rights reserved",
    "isbn",
    "published by",
    "library of congress",
    "dedication",
    "preface",
    "foreword",
    "acknowledgment",
    "acknowledgement",
];

const BACK_MATTER_KEYWORDS: &[&str] = &[
    "glossary",
    "appendix",
    "about the author",
    "colophon",
    "index",
];

fn toc_leader_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "Chapter title ......... 123" style dot-leader lines.
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\S.{0,100}?[.…]{3,}\s*\d{1,4}\s*$").unwrap())
}

fn toc_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*(table\s+of\s+)?contents\s*$").unwrap())
}

fn numbered_citation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\[\d{1,3}\]\s+\S").unwrap())
}

fn reference_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*(references|bibliography|works\s+cited)\s*$").unwrap())
}

pub struct MetaContentClassifier;

impl MetaContentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str, page_number: u32, total_pages: u32) -> MetaFlags {
        let position = if total_pages == 0 {
            0.0
        } else {
            (page_number as f32 / total_pages as f32).clamp(0.0, 1.0)
        };
        let lower = text.to_lowercase();

        let (is_toc, toc_confidence) = self.detect_toc(text, position);
        let (is_front_matter, front_confidence) = self.detect_front_matter(&lower, position);
        let (is_back_matter, back_confidence) = self.detect_back_matter(&lower, position);
        let (is_reference, reference_confidence) = self.detect_references(text);
        let has_math_issues = self.detect_math_issues(text);

        MetaFlags {
            is_toc,
            is_front_matter,
            is_back_matter,
            is_meta_content: is_toc || is_front_matter || is_back_matter,
            is_reference,
            has_math_issues,
            confidence: toc_confidence
                .max(front_confidence)
                .max(back_confidence)
                .max(reference_confidence),
        }
    }

    fn detect_toc(&self, text: &str, position: f32) -> (bool, f32) {
        if position > 0.15 {
            return (false, 0.0);
        }
        let leader_lines = toc_leader_line().find_iter(text).count();
        let has_header = toc_header().is_match(text);

        if leader_lines >= 3 {
            let confidence = (0.6 + 0.1 * leader_lines as f32).min(1.0);
            (true, confidence)
        } else if has_header && leader_lines >= 1 {
            (true, 0.6)
        } else if has_header {
            (true, 0.4)
        } else {
            (false, 0.0)
        }
    }

    fn detect_front_matter(&self, lower: &str, position: f32) -> (bool, f32) {
        if position > 0.2 {
            return (false, 0.0);
        }
        let matched = FRONT_MATTER_KEYWORDS
            .iter()
            .filter(|kw| lower.contains(*kw))
            .count();
        if matched >= 2 {
            (true, 0.9)
        } else if matched == 1 {
            (true, 0.5)
        } else {
            (false, 0.0)
        }
    }

    fn detect_back_matter(&self, lower: &str, position: f32) -> (bool, f32) {
        if position < 0.8 {
            return (false, 0.0);
        }
        // "index" alone is too common a word to trust mid-sentence; require
        // it on its own line, like a section heading.
        let matched = BACK_MATTER_KEYWORDS
            .iter()
            .filter(|kw| {
                if **kw == "index" {
                    lower.lines().any(|line| line.trim() == "index")
                } else {
                    lower.contains(*kw)
                }
            })
            .count();
        if matched >= 1 {
            (true, (0.5 + 0.2 * matched as f32).min(1.0))
        } else {
            (false, 0.0)
        }
    }

    fn detect_references(&self, text: &str) -> (bool, f32) {
        if reference_header().is_match(text) {
            return (true, 0.8);
        }
        let citations = numbered_citation().find_iter(text).count();
        if citations >= 3 {
            (true, (0.5 + 0.05 * citations as f32).min(1.0))
        } else {
            (false, 0.0)
        }
    }

    fn detect_math_issues(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let suspect = text
            .chars()
            .filter(|c| matches!(c, '\u{FFFD}' | '\u{25A1}' | '\u{F8FF}'))
            .count();
        suspect as f32 / text.chars().count() as f32 > 0.005
    }
}

impl Default for MetaContentClassifier {
    fn default() -> Self {
        Self::new()
    }
}
