use super::*;

fn document(content: &str) -> Document {
    Document {
        content: content.to_string(),
        metadata: DocumentMetadata {
            source: "data/notes/sample.txt".to_string(),
            page: None,
        },
    }
}

fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size,
        chunk_overlap,
    }
}

fn sample_text() -> String {
    let mut text = String::new();
    for paragraph in 0..12 {
        for sentence in 0..6 {
            text.push_str(&format!(
                "Paragraph {paragraph} sentence {sentence} talks about ingestion and retrieval. "
            ));
        }
        text.push_str("\n\n");
    }
    text.push_str("Ünïcödé tail with emoji 🦀 so char boundaries matter.");
    text
}

/// Rebuild the source text by dropping the shared prefix from every later window
fn reconstruct(windows: &[String], overlap: usize) -> String {
    let mut rebuilt = String::new();
    for (i, window) in windows.iter().enumerate() {
        if i == 0 {
            rebuilt.push_str(window);
        } else {
            rebuilt.extend(window.chars().skip(overlap));
        }
    }
    rebuilt
}

#[test]
fn small_text_is_single_chunk() {
    let windows = split_text("The capital of France is Paris.", &ChunkingConfig::default());
    assert_eq!(windows, vec!["The capital of France is Paris.".to_string()]);
}

#[test]
fn blank_text_has_no_chunks() {
    assert!(split_text("", &ChunkingConfig::default()).is_empty());
    assert!(split_text(" \n\n\t ", &ChunkingConfig::default()).is_empty());
}

#[test]
fn windows_reconstruct_the_text() {
    let text = sample_text();
    for (size, overlap) in [(1000, 200), (120, 30), (64, 0), (50, 49), (7, 3)] {
        let windows = split_text(&text, &config(size, overlap));
        assert!(windows.len() > 1, "size {size} should split the sample");
        assert_eq!(reconstruct(&windows, overlap), text, "size {size} overlap {overlap}");
    }
}

#[test]
fn windows_respect_max_size() {
    let text = sample_text();
    for (size, overlap) in [(1000, 200), (120, 30), (33, 10)] {
        for window in split_text(&text, &config(size, overlap)) {
            assert!(window.chars().count() <= size);
        }
    }
}

#[test]
fn adjacent_windows_share_exactly_the_overlap() {
    let text = sample_text();
    let overlap = 40;
    let windows = split_text(&text, &config(200, overlap));

    for pair in windows.windows(2) {
        let previous: Vec<char> = pair[0].chars().collect();
        let next: Vec<char> = pair[1].chars().collect();
        assert!(next.len() > overlap);
        assert_eq!(
            previous[previous.len() - overlap..],
            next[..overlap],
            "windows {:?} / {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn prefers_paragraph_breaks() {
    let text = format!("{}\n\n{}", "a".repeat(70), "b".repeat(70));
    let windows = split_text(&text, &config(100, 0));

    assert_eq!(windows.len(), 2);
    assert!(windows[0].ends_with("\n\n"));
    assert_eq!(windows[1], "b".repeat(70));
}

#[test]
fn hard_cut_without_separators() {
    let text = "x".repeat(250);
    let windows = split_text(&text, &config(100, 20));

    assert_eq!(windows[0].len(), 100);
    assert_eq!(windows[1].len(), 100);
    assert_eq!(reconstruct(&windows, 20), text);
}

#[test]
fn chunking_is_deterministic() {
    let chunker = Chunker::new(config(150, 25)).expect("valid config");
    let doc = document(&sample_text());

    assert_eq!(chunker.split_document(&doc), chunker.split_document(&doc));
}

#[test]
fn chunks_inherit_metadata_and_index() {
    let chunker = Chunker::new(config(100, 10)).expect("valid config");
    let pdf_page = Document {
        content: sample_text(),
        metadata: DocumentMetadata {
            source: "data/pdfs/report.pdf".to_string(),
            page: Some(3),
        },
    };

    let chunks = chunker.split_documents(&[document("short note"), pdf_page]);

    assert_eq!(chunks[0].metadata.source, "data/notes/sample.txt");
    assert_eq!(chunks[0].chunk_index, 0);
    let pdf_chunks: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| c.metadata.source == "data/pdfs/report.pdf")
        .collect();
    assert!(pdf_chunks.len() > 1);
    for (i, chunk) in pdf_chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert_eq!(chunk.metadata.page, Some(3));
        assert!(chunk.embedding.is_empty());
    }
}

#[test]
fn invalid_config_is_rejected() {
    assert!(Chunker::new(config(0, 0)).is_err());
    assert!(Chunker::new(config(100, 100)).is_err());
    assert!(Chunker::new(config(100, 150)).is_err());
    assert!(Chunker::new(config(100, 0)).is_ok());
}
