//! Stable 32-bit identifiers for catalog entries, chunks, and concepts.
//!
//! All row ids are FNV-1a hashes of a normalized string so that re-ingesting
//! the same library produces identical ids across runs and machines.

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the raw bytes of `input`.
pub fn fnv1a_32(input: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Id of a catalog entry: hash of the absolute source path.
pub fn source_id(source: &str) -> u32 {
    fnv1a_32(source)
}

/// Id of a chunk: hash of the source path plus the chunk's byte offset.
pub fn chunk_id(source: &str, start_offset: usize) -> u32 {
    fnv1a_32(&format!("{}#{}", source, start_offset))
}

/// Id of a concept: hash of the lowercased canonical name. Collisions are
/// resolved by the index builder, which retries with a `::k` suffix.
pub fn concept_id(name: &str) -> u32 {
    fnv1a_32(&name.to_lowercase())
}

/// Id of a category, same normalization as concepts.
pub fn category_id(name: &str) -> u32 {
    fnv1a_32(&name.to_lowercase())
}

/// Hash the collision-suffixed form `name::k` (lowercased).
pub fn concept_id_suffixed(name: &str, k: u32) -> u32 {
    fnv1a_32(&format!("{}::{}", name.to_lowercase(), k))
}

/// Derive a display title from a source path: file stem with underscores
/// normalized to spaces and runs of whitespace collapsed.
pub fn title_from_source(source: &str) -> String {
    let file_name = source
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source);
    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    };
    stem.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        // Published FNV-1a 32-bit test vectors.
        assert_eq!(fnv1a_32(""), 0x811c_9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c_292c);
        assert_eq!(fnv1a_32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn ids_are_deterministic_across_calls() {
        let a = source_id("/library/Design_Patterns.pdf");
        let b = source_id("/library/Design_Patterns.pdf");
        assert_eq!(a, b);
        assert_eq!(
            chunk_id("/library/Design_Patterns.pdf", 4000),
            chunk_id("/library/Design_Patterns.pdf", 4000)
        );
    }

    #[test]
    fn concept_id_ignores_case() {
        assert_eq!(concept_id("Dependency Injection"), concept_id("dependency injection"));
    }

    #[test]
    fn suffixed_id_differs_from_base() {
        let base = concept_id("observer");
        assert_ne!(base, concept_id_suffixed("observer", 1));
        assert_ne!(concept_id_suffixed("observer", 1), concept_id_suffixed("observer", 2));
    }

    #[test]
    fn title_strips_extension_and_underscores() {
        assert_eq!(title_from_source("/docs/Clean_Architecture.pdf"), "Clean Architecture");
        assert_eq!(title_from_source("notes.on.testing.epub"), "notes.on.testing");
        assert_eq!(title_from_source("README"), "README");
    }
}
