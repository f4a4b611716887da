use std::fs;
use std::path::Path;

use super::{Document, DocumentMetadata, DocumentParser, IngestionError};

/// Plain UTF-8 text notes, one document per file
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl DocumentParser for TextParser {
    fn format(&self) -> &'static str {
        "text"
    }

    fn accepts(&self, extension: &str) -> bool {
        extension == "txt"
    }

    fn parse(&self, path: &Path, source: &str) -> Result<Vec<Document>, IngestionError> {
        let bytes = fs::read(path).map_err(|e| IngestionError::new(path, e.to_string()))?;
        let content = String::from_utf8(bytes)
            .map_err(|e| IngestionError::new(path, format!("file is not valid UTF-8: {e}")))?;

        Ok(vec![Document {
            content,
            metadata: DocumentMetadata {
                source: source.to_string(),
                page: None,
            },
        }])
    }
}
