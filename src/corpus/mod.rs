// Corpus module
// Walks the fixed data directories and turns each file into provenance-tagged documents

pub mod pdf;
pub mod text;
pub mod word;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::Config;

pub use pdf::PdfParser;
pub use text::TextParser;
pub use word::WordParser;

/// Raw text of one loaded file, or one page of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Where a piece of text came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path of the source file relative to the project directory, e.g. `data/pdfs/report.pdf`
    pub source: String,
    /// Zero-based page index for paginated formats
    pub page: Option<u32>,
}

/// A file that could not be turned into documents
#[derive(Debug, Error)]
#[error("Failed to ingest {}: {reason}", path.display())]
pub struct IngestionError {
    pub path: PathBuf,
    pub reason: String,
}

impl IngestionError {
    #[inline]
    pub fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Format-specific parser, one per supported file family
pub trait DocumentParser: Send + Sync {
    /// Human readable format name used in logs
    fn format(&self) -> &'static str;

    /// Whether this parser handles a file with the given lowercase extension
    fn accepts(&self, extension: &str) -> bool;

    /// Parse `path`, tagging every document with `source`
    fn parse(
        &self,
        path: &Path,
        source: &str,
    ) -> std::result::Result<Vec<Document>, IngestionError>;
}

/// Documents that loaded, plus the files that did not
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub failures: Vec<IngestionError>,
}

impl LoadReport {
    #[inline]
    pub fn files_failed(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Clone)]
struct CorpusSource {
    dir: PathBuf,
    parser: Arc<dyn DocumentParser>,
}

/// Loads every supported file under `<data>/pdfs` and `<data>/notes`
#[derive(Clone)]
pub struct CorpusLoader {
    data_dir: PathBuf,
    label_root: PathBuf,
    sources: Vec<CorpusSource>,
}

impl CorpusLoader {
    #[inline]
    pub fn new(config: &Config) -> Self {
        Self::from_data_dir(config.data_dir()).with_label_root(config.get_base_dir())
    }

    /// Loader for `data_dir`, labelling sources relative to its parent directory
    #[inline]
    pub fn from_data_dir(data_dir: PathBuf) -> Self {
        let pdf_dir = data_dir.join("pdfs");
        let notes_dir = data_dir.join("notes");

        let sources = vec![
            CorpusSource {
                dir: pdf_dir,
                parser: Arc::new(PdfParser),
            },
            CorpusSource {
                dir: notes_dir.clone(),
                parser: Arc::new(TextParser),
            },
            CorpusSource {
                dir: notes_dir,
                parser: Arc::new(WordParser),
            },
        ];

        let label_root = data_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            data_dir,
            label_root,
            sources,
        }
    }

    /// Directory that document sources are reported relative to
    #[inline]
    #[must_use]
    pub fn with_label_root(mut self, root: &Path) -> Self {
        self.label_root = root.to_path_buf();
        self
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create the data directory layout if any part of it is missing
    #[inline]
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.data_dir.join("vectorstore"))?;
        for source in &self.sources {
            fs::create_dir_all(&source.dir)?;
        }
        Ok(())
    }

    /// Load every document in the corpus.
    ///
    /// A file that fails to parse is recorded in [`LoadReport::failures`] and does not
    /// affect the other files. Only directory-level IO problems abort the load.
    #[inline]
    pub fn load(&self) -> Result<LoadReport> {
        self.ensure_layout()?;

        let mut report = LoadReport::default();

        for source in &self.sources {
            let files = list_matching_files(&source.dir, source.parser.as_ref())?;
            debug!(
                "Found {} {} files in {}",
                files.len(),
                source.parser.format(),
                source.dir.display()
            );

            for path in files {
                let label = source_label(&path, &self.label_root);
                match source.parser.parse(&path, &label) {
                    Ok(documents) => {
                        debug!("Loaded {} documents from {}", documents.len(), path.display());
                        report.documents.extend(documents);
                    }
                    Err(e) => {
                        warn!("Skipping unreadable {} file: {}", source.parser.format(), e);
                        report.failures.push(e);
                    }
                }
            }
        }

        info!(
            "Loaded {} documents from {} ({} files failed)",
            report.documents.len(),
            self.data_dir.display(),
            report.files_failed()
        );

        Ok(report)
    }
}

/// Files directly inside `dir` accepted by `parser`, in path order
fn list_matching_files(dir: &Path, parser: &dyn DocumentParser) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        let extension = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        if extension.is_some_and(|ext| parser.accepts(&ext)) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// `path` relative to `root` for use as a document `source`, or the full path when it lies
/// outside `root`
#[inline]
pub fn source_label(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
