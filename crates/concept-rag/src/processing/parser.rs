//! Document loading for PDFs, EPUBs, and plain text.
//!
//! PDF extraction tries `pdf_extract` first and falls back to lopdf's
//! per-page text extraction. EPUBs are unpacked with `zip` and stripped of
//! markup. Extraction below the character-density threshold flags the
//! document for OCR; the attempt is recorded, not performed.

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::hash::title_from_source;

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub text: String,
    /// Byte offset into `text` where each page starts.
    pub page_offsets: Vec<usize>,
    pub total_pages: u32,
    pub title: String,
    /// Extracted text fell below the chars-per-page density threshold.
    pub needs_ocr: bool,
}

impl LoadedDocument {
    /// 1-based page number containing the given byte offset.
    pub fn page_for_offset(&self, offset: usize) -> u32 {
        match self.page_offsets.binary_search(&offset) {
            Ok(i) => i as u32 + 1,
            Err(0) => 1,
            Err(i) => i as u32,
        }
    }
}

pub struct DocumentLoader {
    ocr_char_density_threshold: usize,
}

impl DocumentLoader {
    pub fn new(ocr_char_density_threshold: usize) -> Self {
        Self { ocr_char_density_threshold }
    }

    pub fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let pages = match extension.as_str() {
            "pdf" => self.load_pdf(path)?,
            "epub" => self.load_epub(path)?,
            _ => vec![std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read text file: {}", path.display()))?],
        };

        let pages: Vec<String> = pages.into_iter().map(|p| clean_page(&p)).collect();
        let total_pages = pages.len().max(1) as u32;
        let char_count: usize = pages.iter().map(|p| p.chars().count()).sum();
        let density = char_count / total_pages as usize;
        let needs_ocr = extension == "pdf" && density < self.ocr_char_density_threshold;

        let mut text = String::new();
        let mut page_offsets = Vec::with_capacity(pages.len());
        for page in &pages {
            page_offsets.push(text.len());
            text.push_str(page);
            text.push_str("\n\n");
        }

        Ok(LoadedDocument {
            text,
            page_offsets,
            total_pages,
            title: title_from_source(&path.display().to_string()),
            needs_ocr,
        })
    }

    fn load_pdf(&self, path: &Path) -> Result<Vec<String>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read PDF: {}", path.display()))?;

        // Layer 1: pdf_extract, which separates pages with form feeds.
        if let Ok(text) = pdf_extract::extract_text_from_mem(&bytes) {
            if !text.trim().is_empty() {
                return Ok(text.split('\u{c}').map(|p| p.to_string()).collect());
            }
        }

        // Layer 2: lopdf per-page content streams.
        let doc = lopdf::Document::load(path)
            .with_context(|| format!("Failed to parse PDF structure: {}", path.display()))?;
        let page_ids: Vec<u32> = doc.get_pages().keys().copied().collect();
        let mut pages = Vec::with_capacity(page_ids.len());
        for page in page_ids {
            pages.push(doc.extract_text(&[page]).unwrap_or_default());
        }
        if pages.iter().all(|p| p.trim().is_empty()) {
            // Keep the page structure so density checks can flag OCR.
            tracing::warn!(path = %path.display(), "PDF contains no extractable text");
        }
        Ok(pages)
    }

    fn load_epub(&self, path: &Path) -> Result<Vec<String>> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open EPUB: {}", path.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read EPUB container: {}", path.display()))?;

        let mut entries: Vec<(String, String)> = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_lowercase();
            if name.ends_with(".xhtml") || name.ends_with(".html") || name.ends_with(".htm") {
                let mut content = String::new();
                if entry.read_to_string(&mut content).is_ok() {
                    entries.push((entry.name().to_string(), strip_markup(&content)));
                }
            }
        }
        // Archive order is not guaranteed to match the spine; name order is
        // the closest stable approximation without parsing the OPF.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, text)| text).collect())
    }
}

/// Trim lines and drop blank runs, preserving paragraph breaks.
fn clean_page(page: &str) -> String {
    page.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<[^>]+>").unwrap())
}

fn strip_markup(html: &str) -> String {
    let text = tag_pattern().replace_all(html, " ");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn text_file_loads_as_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes_on_search.txt");
        std::fs::write(&path, "line one\n\nline two\n").unwrap();

        let loader = DocumentLoader::new(200);
        let doc = loader.load(&path).unwrap();
        assert_eq!(doc.total_pages, 1);
        assert_eq!(doc.title, "notes on search");
        assert!(doc.text.contains("line one"));
        assert!(!doc.needs_ocr);
    }

    #[test]
    fn page_for_offset_maps_into_pages() {
        let doc = LoadedDocument {
            text: "aaaa\n\nbbbb\n\ncccc\n\n".to_string(),
            page_offsets: vec![0, 6, 12],
            total_pages: 3,
            title: "t".into(),
            needs_ocr: false,
        };
        assert_eq!(doc.page_for_offset(0), 1);
        assert_eq!(doc.page_for_offset(5), 1);
        assert_eq!(doc.page_for_offset(6), 2);
        assert_eq!(doc.page_for_offset(13), 3);
    }

    #[test]
    fn epub_pages_come_from_markup_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_book.epub");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        writer.start_file("OEBPS/ch01.xhtml", options).unwrap();
        writer
            .write_all(b"<html><body><h1>One</h1><p>First chapter text.</p></body></html>")
            .unwrap();
        writer.start_file("OEBPS/ch02.xhtml", options).unwrap();
        writer
            .write_all(b"<html><body><p>Second &amp; final chapter.</p></body></html>")
            .unwrap();
        writer.start_file("mimetype", options).unwrap();
        writer.write_all(b"application/epub+zip").unwrap();
        writer.finish().unwrap();

        let loader = DocumentLoader::new(200);
        let doc = loader.load(&path).unwrap();
        assert_eq!(doc.total_pages, 2);
        assert!(doc.text.contains("First chapter text."));
        assert!(doc.text.contains("Second & final chapter."));
        assert!(!doc.text.contains('<'));
    }

    #[test]
    fn markup_stripping_removes_scripts() {
        let html = "<p>keep</p><script>drop();</script><style>p{}</style>";
        assert_eq!(strip_markup(html), "keep");
    }
}
