use quick_xml::Reader;
use quick_xml::events::Event;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{Document, DocumentMetadata, DocumentParser, IngestionError};

const DOCUMENT_PART: &str = "word/document.xml";

/// Word documents (`.doc*`), one document per file.
///
/// Only the Office Open XML container is understood; legacy binary `.doc` files are
/// reported as ingestion failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordParser;

impl DocumentParser for WordParser {
    fn format(&self) -> &'static str {
        "Word"
    }

    fn accepts(&self, extension: &str) -> bool {
        extension.starts_with("doc")
    }

    fn parse(&self, path: &Path, source: &str) -> Result<Vec<Document>, IngestionError> {
        let file = File::open(path).map_err(|e| IngestionError::new(path, e.to_string()))?;

        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            IngestionError::new(
                path,
                format!("not an Office Open XML document (legacy .doc files are unsupported): {e}"),
            )
        })?;

        let mut xml = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .map_err(|_| IngestionError::new(path, format!("missing {DOCUMENT_PART}")))?
            .read_to_string(&mut xml)
            .map_err(|e| IngestionError::new(path, format!("failed to read {DOCUMENT_PART}: {e}")))?;

        let content = extract_paragraphs(&xml)
            .map_err(|reason| IngestionError::new(path, reason))?
            .join("\n\n");

        Ok(vec![Document {
            content,
            metadata: DocumentMetadata {
                source: source.to_string(),
                page: None,
            },
        }])
    }
}

/// Collect the text of every non-empty `<w:p>` paragraph in document order
#[inline]
pub fn extract_paragraphs(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"p" => paragraph.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"p" => {
                    if !paragraph.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut paragraph));
                    }
                    paragraph.clear();
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                let text = e.unescape().map_err(|e| format!("XML text error: {e}"))?;
                paragraph.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            Ok(_) => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}
