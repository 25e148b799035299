//! Document indexing: extract, chunk, embed, store.
//!
//! [`DocumentIndexer::index`] runs one unit of work over all files of a
//! document. Per-file extraction problems and per-chunk embedding failures
//! are recorded and skipped, as are embeddings whose length differs from
//! [`LanguageModel::dims`]. The run fails only when no chunk at all was
//! embedded. On success the document transitions to processed.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::capability::LanguageModel;
use crate::chunk::{content_hash, TextChunker};
use crate::error::{PipelineError, Result};
use crate::models::{Chunk, SourceFile};
use crate::store::Store;

/// Output of a text extractor for one file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// `None` when no text could be recovered.
    pub text: Option<String>,
    pub errors: Vec<String>,
}

impl Extraction {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            errors: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            text: None,
            errors: vec![error.into()],
        }
    }
}

/// Converts a raw source file into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, file: &SourceFile) -> Extraction;
}

/// Extractor that decodes the file bytes as UTF-8, lossily.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, file: &SourceFile) -> Extraction {
        Extraction::text(String::from_utf8_lossy(&file.bytes).into_owned())
    }
}

/// Processing summary of one indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub document_id: String,
    pub files_seen: usize,
    pub chunks_created: usize,
    pub errors: Vec<String>,
}

pub struct DocumentIndexer {
    store: Arc<dyn Store>,
    model: Arc<dyn LanguageModel>,
    extractor: Arc<dyn TextExtractor>,
    chunker: TextChunker,
}

impl DocumentIndexer {
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<dyn LanguageModel>,
        extractor: Arc<dyn TextExtractor>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            store,
            model,
            extractor,
            chunker,
        }
    }

    pub async fn index(&self, document_id: &str, files: &[SourceFile]) -> Result<IndexReport> {
        if self.store.get_document(document_id).await?.is_none() {
            return Err(PipelineError::input(format!(
                "document {} not found",
                document_id
            )));
        }
        if files.is_empty() {
            return Err(PipelineError::input(format!(
                "document {} has no attached files",
                document_id
            )));
        }

        let mut report = IndexReport {
            document_id: document_id.to_string(),
            files_seen: files.len(),
            chunks_created: 0,
            errors: Vec::new(),
        };
        let mut sequence = 0i64;
        let dims = self.model.dims();

        for file in files {
            let extraction = self.extractor.extract(file);
            report.errors.extend(
                extraction
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", file.filename, e)),
            );

            let text = match extraction.text {
                Some(t) if !t.trim().is_empty() => t,
                _ => {
                    warn!(document_id, file = %file.filename, "no text extracted, skipping file");
                    report
                        .errors
                        .push(format!("{}: no text could be extracted", file.filename));
                    continue;
                }
            };

            for (ordinal, piece) in self.chunker.chunk(&text).into_iter().enumerate() {
                let position = sequence;
                sequence += 1;

                let embedding = match self.model.embed(&piece).await {
                    Ok(v) if v.is_empty() => {
                        warn!(document_id, file = %file.filename, ordinal, "empty embedding");
                        report.errors.push(format!(
                            "{} chunk {}: empty embedding",
                            file.filename, ordinal
                        ));
                        continue;
                    }
                    Ok(v) if dims > 0 && v.len() != dims => {
                        warn!(document_id, file = %file.filename, ordinal, len = v.len(), dims, "embedding dimension mismatch");
                        report.errors.push(format!(
                            "{} chunk {}: embedding has {} dimensions, expected {}",
                            file.filename,
                            ordinal,
                            v.len(),
                            dims
                        ));
                        continue;
                    }
                    Ok(v) => v,
                    Err(e) => {
                        warn!(document_id, file = %file.filename, ordinal, error = %e, "embedding failed");
                        report
                            .errors
                            .push(format!("{} chunk {}: {:#}", file.filename, ordinal, e));
                        continue;
                    }
                };

                let chunk = Chunk {
                    id: uuid::Uuid::new_v4().to_string(),
                    document_id: document_id.to_string(),
                    source: file.filename.clone(),
                    ordinal: ordinal as i64,
                    sequence: position,
                    hash: content_hash(&piece),
                    text: piece,
                    embedding,
                };
                self.store.insert_chunk(&chunk).await?;
                report.chunks_created += 1;
            }
        }

        if report.chunks_created == 0 {
            let mut reasons = report.errors;
            reasons.push(format!("no chunks were embedded for document {}", document_id));
            return Err(PipelineError::capability(reasons));
        }

        self.store.mark_document_processed(document_id).await?;
        info!(
            document_id,
            chunks = report.chunks_created,
            errors = report.errors.len(),
            "document indexed"
        );
        Ok(report)
    }
}
