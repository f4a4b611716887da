use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use super::{Document, DocumentMetadata, DocumentParser, IngestionError};

/// PDF files, one document per page
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn format(&self) -> &'static str {
        "PDF"
    }

    fn accepts(&self, extension: &str) -> bool {
        extension == "pdf"
    }

    fn parse(&self, path: &Path, source: &str) -> Result<Vec<Document>, IngestionError> {
        // pdf-extract panics on some malformed inputs instead of returning an error
        let pages =
            panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_by_pages(path)))
                .map_err(|_| IngestionError::new(path, "PDF parser crashed on malformed input"))?
                .map_err(|e| {
                    IngestionError::new(path, format!("failed to extract PDF text: {e}"))
                })?;

        let documents = pages
            .into_iter()
            .enumerate()
            .map(|(page, content)| Document {
                content,
                metadata: DocumentMetadata {
                    source: source.to_string(),
                    page: Some(u32::try_from(page).unwrap_or(u32::MAX)),
                },
            })
            .collect();

        Ok(documents)
    }
}
