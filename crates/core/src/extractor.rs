use crate::error::IngestError;
use crate::models::{Document, Page};
use lopdf::Document as PdfDocument;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Parses one file into pages. Implementations must be usable from a
/// blocking worker thread.
pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
        let document =
            PdfDocument::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(Page {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// Tidies extracted text: unifies line endings and non-breaking spaces,
/// collapses runs of blanks, and keeps at most one empty line between
/// paragraphs.
pub fn clean_page_text(text: &str) -> Result<String, IngestError> {
    let blanks = Regex::new(r"[ \t]+")?;
    let trailing = Regex::new(r" *\n *")?;
    let paragraphs = Regex::new(r"\n{3,}")?;

    let unified = text.replace("\r\n", "\n").replace(['\r', '\u{a0}'], " ");
    let collapsed = blanks.replace_all(&unified, " ");
    let trimmed_lines = trailing.replace_all(&collapsed, "\n");
    let spaced = paragraphs.replace_all(&trimmed_lines, "\n\n");

    Ok(spaced.trim().to_string())
}

/// Reads a file through `extractor` into a [`Document`] named after the
/// file stem.
pub fn load_document(extractor: &dyn PdfExtractor, path: &Path) -> Result<Document, IngestError> {
    let source_name = path
        .file_stem()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?
        .to_string();

    let checksum = digest_file(path)?;

    let mut pages = Vec::new();
    for page in extractor.extract_pages(path)? {
        let text = clean_page_text(&page.text)?;
        if !text.is_empty() {
            pages.push(Page {
                number: page.number,
                text,
            });
        }
    }

    if pages.is_empty() {
        return Err(IngestError::PdfParse(format!(
            "no readable text after cleanup: {}",
            path.display()
        )));
    }

    Ok(Document {
        source_name,
        source_path: path.to_string_lossy().to_string(),
        checksum,
        pages,
    })
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
