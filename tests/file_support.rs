//! Integration tests for PDF, DOCX and plain text uploads.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use socratic_harness::extract::{load_source_file, FileExtractor, MIME_DOCX, MIME_PDF};
use socratic_harness::pipeline::{Pipeline, PipelineSettings};
use socratic_harness_core::index::TextExtractor;
use socratic_harness_core::store::memory::InMemoryStore;
use socratic_harness_core::store::Store;
use socratic_harness_core::testing::MockModel;

/// Minimal valid PDF whose only page shows "light energy phrase".
/// The xref offsets are computed while writing so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 51 >> stream\nBT /F1 12 Tf 100 700 Td (light energy phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[test]
fn file_support_pdf_text_is_extracted() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("lecture.pdf");
    fs::write(&path, minimal_pdf_with_phrase()).unwrap();

    let file = load_source_file(&path).unwrap();
    assert_eq!(file.filename, "lecture.pdf");
    assert_eq!(file.content_type, MIME_PDF);

    let extraction = FileExtractor.extract(&file);
    assert!(extraction.errors.is_empty(), "{:?}", extraction.errors);
    assert!(extraction.text.unwrap().contains("light energy phrase"));
}

#[test]
fn file_support_docx_paragraphs_are_extracted() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("handout.docx");
    fs::write(
        &path,
        minimal_docx_with_paragraphs(&["Chlorophyll absorbs light.", "Water is split."]),
    )
    .unwrap();

    let file = load_source_file(&path).unwrap();
    assert_eq!(file.content_type, MIME_DOCX);
    assert_eq!(
        FileExtractor.extract(&file).text.as_deref(),
        Some("Chlorophyll absorbs light.\n\nWater is split.")
    );
}

#[test]
fn file_support_missing_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    assert!(load_source_file(&tmp.path().join("nope.pdf")).is_err());
}

#[tokio::test]
async fn file_support_broken_file_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let good = tmp.path().join("notes.md");
    let bad = tmp.path().join("scan.docx");
    fs::write(&good, "Photosynthesis stores light energy as sugar.").unwrap();
    fs::write(&bad, b"not a zip").unwrap();
    let files = vec![
        load_source_file(&bad).unwrap(),
        load_source_file(&good).unwrap(),
    ];

    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(MockModel::new()),
        PipelineSettings::default(),
    );
    let doc = pipeline.create_document("Photosynthesis").await.unwrap();
    let report = pipeline.index_document(&doc.id, &files).await.unwrap();

    assert_eq!(report.files_seen, 2);
    assert_eq!(report.chunks_created, 1);
    assert!(report.errors.iter().any(|e| e.starts_with("scan.docx")));

    let chunks = store.list_chunks(&doc.id).await.unwrap();
    assert_eq!(chunks[0].source, "notes.md");
    assert_eq!(chunks[0].sequence, 0);
}

#[tokio::test]
async fn file_support_only_broken_files_fail_indexing() {
    let tmp = TempDir::new().unwrap();
    let bad = tmp.path().join("scan.docx");
    fs::write(&bad, b"not a zip").unwrap();

    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(MockModel::new()),
        PipelineSettings::default(),
    );
    let doc = pipeline.create_document("Photosynthesis").await.unwrap();
    let err = pipeline
        .index_document(&doc.id, &[load_source_file(&bad).unwrap()])
        .await
        .unwrap_err();
    assert!(err.reasons().iter().any(|r| r.contains("DOCX extraction failed")));

    let doc = store.get_document(&doc.id).await.unwrap().unwrap();
    assert!(!doc.is_processed());
}
