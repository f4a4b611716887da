use super::*;
use lopdf::content::{Content, Operation};
use lopdf::{Object, Stream, dictionary};
use std::fs::File;
use std::io::Write;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn write_docx(path: &Path, paragraphs: &[&str]) {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    );

    let file = File::create(path).expect("should create docx");
    let mut archive = zip::ZipWriter::new(file);
    archive
        .start_file("word/document.xml", SimpleFileOptions::default())
        .expect("should start zip entry");
    archive
        .write_all(xml.as_bytes())
        .expect("should write document.xml");
    archive.finish().expect("should finish docx");
}

fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("should encode page content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = i64::try_from(kids.len()).expect("page count fits");
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("should save pdf");
}

#[test]
fn creates_layout_for_empty_corpus() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let data_dir = temp_dir.path().join("data");
    let loader = CorpusLoader::from_data_dir(data_dir.clone());

    let report = loader.load().expect("empty corpus should load");

    assert!(report.documents.is_empty());
    assert!(report.failures.is_empty());
    assert!(data_dir.join("pdfs").is_dir());
    assert!(data_dir.join("notes").is_dir());
    assert!(data_dir.join("vectorstore").is_dir());
}

#[test]
fn loads_text_and_word_notes() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let data_dir = temp_dir.path().join("data");
    let loader = CorpusLoader::from_data_dir(data_dir.clone());
    loader.ensure_layout().expect("should create layout");

    let notes = data_dir.join("notes");
    fs::write(notes.join("b.txt"), "Second note").expect("should write");
    fs::write(notes.join("a.TXT"), "First note").expect("should write");
    fs::write(notes.join("ignored.md"), "# not part of the corpus").expect("should write");
    write_docx(
        &notes.join("minutes.docx"),
        &["Meeting minutes", "Budget &amp; staffing were approved."],
    );

    let report = loader.load().expect("should load corpus");

    assert!(report.failures.is_empty());
    let contents: Vec<&str> = report
        .documents
        .iter()
        .map(|d| d.content.as_str())
        .collect();
    assert_eq!(
        contents,
        vec![
            "First note",
            "Second note",
            "Meeting minutes\n\nBudget & staffing were approved."
        ]
    );
    assert!(report.documents.iter().all(|d| d.metadata.page.is_none()));
    assert_eq!(report.documents[2].metadata.source, "data/notes/minutes.docx");
}

#[test]
fn malformed_files_do_not_block_the_rest() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let data_dir = temp_dir.path().join("data");
    let loader = CorpusLoader::from_data_dir(data_dir.clone());
    loader.ensure_layout().expect("should create layout");

    fs::write(data_dir.join("pdfs").join("broken.pdf"), b"definitely not a pdf")
        .expect("should write");
    fs::write(data_dir.join("notes").join("legacy.doc"), b"\xd0\xcf\x11\xe0 binary")
        .expect("should write");
    fs::write(data_dir.join("notes").join("latin1.txt"), b"caf\xe9").expect("should write");
    fs::write(
        data_dir.join("notes").join("capital.txt"),
        "The capital of France is Paris.",
    )
    .expect("should write");

    let report = loader.load().expect("file errors must not abort the load");

    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.documents[0].content, "The capital of France is Paris.");

    let mut failed: Vec<String> = report
        .failures
        .iter()
        .filter_map(|f| f.path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["broken.pdf", "latin1.txt", "legacy.doc"]);

    let message = report.failures[0].to_string();
    assert!(message.starts_with("Failed to ingest"));
}

#[test]
fn docx_without_document_part_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("empty.docx");
    let file = File::create(&path).expect("should create file");
    let mut archive = zip::ZipWriter::new(file);
    archive
        .start_file("word/styles.xml", SimpleFileOptions::default())
        .expect("should start entry");
    archive.write_all(b"<styles/>").expect("should write");
    archive.finish().expect("should finish");

    let err = WordParser
        .parse(&path, "empty.docx")
        .expect_err("missing document part should fail");
    assert_eq!(err.path, path);
    assert!(err.reason.contains("word/document.xml"));
}

#[test]
fn word_parser_handles_tabs_and_breaks() {
    let xml = r#"<w:document xmlns:w="x"><w:body>
        <w:p><w:r><w:t>Name</w:t><w:tab/><w:t>Value</w:t></w:r></w:p>
        <w:p></w:p>
        <w:p><w:r><w:t xml:space="preserve">line one</w:t><w:br/><w:t>line two</w:t></w:r></w:p>
    </w:body></w:document>"#;

    let paragraphs = word::extract_paragraphs(xml).expect("should parse xml");

    assert_eq!(paragraphs, vec!["Name\tValue", "line one\nline two"]);
}

#[test]
fn parsers_match_extensions() {
    assert!(PdfParser.accepts("pdf"));
    assert!(!PdfParser.accepts("txt"));
    assert!(TextParser.accepts("txt"));
    assert!(WordParser.accepts("doc"));
    assert!(WordParser.accepts("docx"));
    assert!(WordParser.accepts("docm"));
    assert!(!WordParser.accepts("odt"));
}

#[test]
fn pdf_pages_become_separate_documents() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let data_dir = temp_dir.path().join("data");
    let loader = CorpusLoader::from_data_dir(data_dir.clone());
    loader.ensure_layout().expect("should create layout");
    write_pdf(
        &data_dir.join("pdfs").join("report.pdf"),
        &["First page text", "Second page text"],
    );

    let report = loader.load().expect("should load corpus");

    assert!(report.failures.is_empty());
    assert_eq!(report.documents.len(), 2);
    let pages: Vec<Option<u32>> = report.documents.iter().map(|d| d.metadata.page).collect();
    assert_eq!(pages, vec![Some(0), Some(1)]);
    assert!(report.documents[0].content.contains("First page text"));
    assert!(!report.documents[0].content.contains("Second"));
    assert!(report.documents[1].content.contains("Second page text"));
    assert!(
        report
            .documents
            .iter()
            .all(|d| d.metadata.source == "data/pdfs/report.pdf")
    );
}

#[test]
fn sources_are_relative_to_the_label_root() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let project = temp_dir.path().join("project");
    let data_dir = project.join("corpus").join("data");
    let loader = CorpusLoader::from_data_dir(data_dir.clone()).with_label_root(&project);
    loader.ensure_layout().expect("should create layout");
    fs::write(data_dir.join("notes").join("capital.txt"), "Paris").expect("should write");

    let report = loader.load().expect("should load corpus");

    assert_eq!(
        report.documents[0].metadata.source,
        "corpus/data/notes/capital.txt"
    );
}

#[test]
fn source_label_falls_back_to_full_path() {
    let root = Path::new("/srv/project");

    assert_eq!(
        source_label(Path::new("/srv/project/data/pdfs/report.pdf"), root),
        "data/pdfs/report.pdf"
    );
    assert_eq!(
        source_label(Path::new("/elsewhere/notes/a.txt"), root),
        "/elsewhere/notes/a.txt"
    );
}

#[test]
fn config_loader_labels_against_the_base_dir() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    let loader = CorpusLoader::new(&config);
    loader.ensure_layout().expect("should create layout");
    fs::write(config.notes_dir().join("capital.txt"), "Paris").expect("should write");

    let report = loader.load().expect("should load corpus");

    assert_eq!(report.documents[0].metadata.source, "data/notes/capital.txt");
}
