use crate::chunking::{self, ChunkingConfig};
use crate::embeddings::EmbeddingClient;
use crate::extractor::{load_document, PdfExtractor};
use crate::traits::VectorIndex;
use crate::{
    Chunk, Document, IndexEntry, IngestError, IngestionOptions, IngestionReport, RagError, SkippedPdf,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Names a document by its path below the ingestion folder, without the
/// extension: `Tiny.pdf` becomes `Tiny`, `leases/2024/Tiny.pdf` becomes
/// `leases/2024/Tiny`.
pub fn source_name_for(folder: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(folder).ok()?;
    let stem = relative.file_stem()?.to_string_lossy();

    let mut parts: Vec<String> = relative
        .parent()
        .into_iter()
        .flat_map(|parent| parent.components())
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.push(stem.into_owned());
    Some(parts.join("/"))
}

/// Offline half of the system: load → chunk → embed → commit.
pub struct IngestionPipeline {
    extractor: Arc<dyn PdfExtractor>,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    embed_batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        options: &IngestionOptions,
    ) -> Result<Self, RagError> {
        let chunking = ChunkingConfig::from(options);
        chunking.validate()?;
        if options.embed_batch_size == 0 {
            return Err(RagError::InvalidConfig(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            extractor,
            embedder,
            index,
            chunking,
            embed_batch_size: options.embed_batch_size,
        })
    }

    /// Rebuilds the index from every PDF under `folder`.
    ///
    /// Unreadable documents are reported and skipped. Embedding or index
    /// failures abort the run before anything is committed, leaving the
    /// previous index in place.
    pub async fn ingest(&self, folder: &Path) -> Result<IngestionReport, RagError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(RagError::NoDocuments(folder.display().to_string()));
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut skipped_files = Vec::new();
        let mut documents_processed = 0usize;
        let mut seen_names = HashSet::new();

        for path in files {
            info!(path = %path.display(), "processing pdf");
            let source_name = source_name_for(folder, &path);
            if let Some(name) = &source_name {
                if !seen_names.insert(name.clone()) {
                    warn!(path = %path.display(), source = %name, "skipped pdf with duplicate source name");
                    skipped_files.push(SkippedPdf {
                        path,
                        reason: format!("another file already uses the source name {name:?}"),
                    });
                    continue;
                }
            }

            match self.load(path.clone()).await {
                Ok(mut document) => {
                    if let Some(name) = source_name {
                        document.source_name = name;
                    }
                    debug!(
                        source = %document.source_name,
                        checksum = %document.checksum,
                        pages = document.pages.len(),
                        "document loaded"
                    );
                    documents_processed += 1;
                    chunks.extend(chunking::split(&document, self.chunking)?);
                }
                Err(error) => {
                    warn!(path = %path.display(), reason = %error, "skipped pdf");
                    skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            documents = documents_processed,
            failed = skipped_files.len(),
            chunks = chunks.len(),
            "chunking finished"
        );

        let chunks_produced = chunks.len();
        let index_rewritten = if chunks.is_empty() {
            warn!("no chunks produced; keeping the existing vector index");
            false
        } else {
            let entries = self.embed_chunks(chunks).await?;
            self.index.upsert_all(entries).await?;
            true
        };

        Ok(IngestionReport {
            documents_processed,
            chunks_produced,
            skipped_files,
            index_rewritten,
        })
    }

    async fn load(&self, path: PathBuf) -> Result<Document, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || load_document(extractor.as_ref(), &path))
            .await
            .map_err(|error| IngestError::PdfParse(format!("extraction task failed: {error}")))?
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<IndexEntry>, RagError> {
        info!(
            chunks = chunks.len(),
            model = %self.embedder.model(),
            "embedding chunks"
        );

        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::MalformedEmbedding(format!(
                    "requested {} embeddings, received {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, embedding)| IndexEntry { chunk, embedding }),
            );
        }

        Ok(entries)
    }
}
