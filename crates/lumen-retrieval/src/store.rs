//! The retrieval store: ingestion, admin mutation, reload, and query over
//! the documents folder.
//!
//! Writer operations (add/delete/reload) are serialised by an async mutex
//! while queries run against the current index snapshot, so a reload never
//! blocks a query for longer than one snapshot swap.
//!
//! Each ingested document also persists its chunk vectors to the index
//! directory, so a restart only re-embeds files that actually changed. A
//! `meta.json` records the embedding model id and dimension; opening an
//! index written by a different model discards it and forces a reingest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chunker::Chunker;
use crate::embedding::EmbeddingService;
use crate::error::RetrievalError;
use crate::extract;
use crate::index::{ChunkEntry, DocumentEntry, Fingerprint, Passage, VectorIndex};

/// A document as reported by the admin listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    pub chunk_count: usize,
}

/// Outcome of a reload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadReport {
    pub ingested: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// On-disk form of one document's vectors.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedDocument {
    document_id: String,
    model_id: String,
    dimensions: usize,
    len: u64,
    mtime_secs: i64,
    chunks: Vec<PersistedChunk>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedChunk {
    chunk_index: usize,
    text: String,
    embedding: Vec<f32>,
}

/// Index-level metadata guarding embedding compatibility.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct IndexMeta {
    model_id: String,
    dimensions: usize,
}

/// Vector index over a documents folder with admin-mutable contents.
pub struct RetrievalStore {
    embedding: Arc<dyn EmbeddingService>,
    index: VectorIndex,
    docs_folder: PathBuf,
    index_dir: PathBuf,
    chunker: Chunker,
    writer: Mutex<()>,
    min_score: f64,
}

impl RetrievalStore {
    /// Open the store, loading any compatible persisted vectors.
    ///
    /// Does not scan the documents folder; call [`reload`](Self::reload)
    /// afterwards to synchronise with disk.
    pub fn open(
        embedding: Arc<dyn EmbeddingService>,
        docs_folder: impl Into<PathBuf>,
        index_dir: impl Into<PathBuf>,
        chunker: Chunker,
        min_score: f64,
    ) -> Result<Self, RetrievalError> {
        let docs_folder = docs_folder.into();
        let index_dir = index_dir.into();
        std::fs::create_dir_all(&docs_folder)?;
        std::fs::create_dir_all(&index_dir)?;

        let store = Self {
            embedding,
            index: VectorIndex::new(),
            docs_folder,
            index_dir,
            chunker,
            writer: Mutex::new(()),
            min_score,
        };

        store.check_meta()?;
        store.load_persisted()?;
        Ok(store)
    }

    /// Verify the persisted index was written by the current embedding
    /// model; wipe it otherwise so reload reingests everything.
    fn check_meta(&self) -> Result<(), RetrievalError> {
        let meta_path = self.index_dir.join("meta.json");
        let current = IndexMeta {
            model_id: self.embedding.model_id().to_string(),
            dimensions: self.embedding.dimensions(),
        };

        let compatible = match std::fs::read_to_string(&meta_path) {
            Ok(raw) => serde_json::from_str::<IndexMeta>(&raw)
                .map(|stored| stored == current)
                .unwrap_or(false),
            Err(_) => false,
        };

        if !compatible {
            let mut wiped = 0usize;
            if let Ok(entries) = std::fs::read_dir(&self.index_dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json")
                        && path.file_name().and_then(|n| n.to_str()) != Some("meta.json")
                    {
                        let _ = std::fs::remove_file(&path);
                        wiped += 1;
                    }
                }
            }
            if wiped > 0 {
                info!(
                    wiped,
                    model_id = self.embedding.model_id(),
                    "Embedding model changed; discarded persisted vectors for reingest"
                );
            }
            std::fs::write(&meta_path, serde_json::to_string_pretty(&current)?)?;
        }
        Ok(())
    }

    /// Load persisted per-document vectors into the in-memory index.
    fn load_persisted(&self) -> Result<(), RetrievalError> {
        let entries = match std::fs::read_dir(&self.index_dir) {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        let mut loaded = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if name == "meta.json" || !name.ends_with(".vec.json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(RetrievalError::from)
                .and_then(|raw| Ok(serde_json::from_str::<PersistedDocument>(&raw)?))
            {
                Ok(doc) => {
                    self.index.replace_document(
                        &doc.document_id.clone(),
                        DocumentEntry {
                            fingerprint: Fingerprint {
                                len: doc.len,
                                mtime_secs: doc.mtime_secs,
                            },
                            chunks: doc
                                .chunks
                                .into_iter()
                                .map(|c| ChunkEntry {
                                    chunk_index: c.chunk_index,
                                    text: c.text,
                                    embedding: c.embedding,
                                })
                                .collect(),
                        },
                    );
                    loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping corrupt vector snapshot");
                }
            }
        }
        if loaded > 0 {
            info!(documents = loaded, "Loaded persisted vector index");
        }
        Ok(())
    }

    /// Folder currently being indexed.
    pub fn docs_folder(&self) -> &Path {
        &self.docs_folder
    }

    /// Add (or replace) a document from uploaded bytes and index it.
    pub async fn add_document(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<DocumentInfo, RetrievalError> {
        validate_name(filename)?;
        if extract::extract_from_bytes(filename, bytes)?.is_none() {
            return Err(RetrievalError::Extraction(format!(
                "unsupported document format: {}",
                filename
            )));
        }

        let _writer = self.writer.lock().await;
        let path = self.docs_folder.join(filename);
        std::fs::write(&path, bytes)?;
        let chunk_count = self.ingest_file(&path).await?;
        info!(document = filename, chunk_count, "Document added");
        Ok(DocumentInfo {
            name: filename.to_string(),
            chunk_count,
        })
    }

    /// Remove a document's file, chunks, and persisted vectors.
    ///
    /// The old chunks are gone from the next query after this returns.
    pub async fn delete_document(&self, name: &str) -> Result<(), RetrievalError> {
        validate_name(name)?;
        let _writer = self.writer.lock().await;

        let file_path = self.docs_folder.join(name);
        let file_existed = file_path.exists();
        if file_existed {
            std::fs::remove_file(&file_path)?;
        }

        let indexed = self.index.remove_document(name);
        let _ = std::fs::remove_file(self.snapshot_path(name));

        if !file_existed && !indexed {
            return Err(RetrievalError::DocumentNotFound(name.to_string()));
        }
        info!(document = name, "Document deleted");
        Ok(())
    }

    /// List indexed documents.
    pub fn list_documents(&self) -> Vec<DocumentInfo> {
        self.index
            .read()
            .documents()
            .map(|(name, entry)| DocumentInfo {
                name: name.clone(),
                chunk_count: entry.chunks.len(),
            })
            .collect()
    }

    /// Re-scan the documents folder and converge the index onto it.
    ///
    /// New files are ingested, vanished files are removed, changed files
    /// (size or mtime) are re-ingested. Unchanged files are not re-embedded,
    /// so calling reload twice in a row is a no-op. Queries keep running
    /// against the previous snapshot throughout.
    pub async fn reload(&self) -> Result<ReloadReport, RetrievalError> {
        let _writer = self.writer.lock().await;
        let mut report = ReloadReport::default();

        let mut on_disk: Vec<(String, PathBuf, Fingerprint)> = Vec::new();
        for entry in std::fs::read_dir(&self.docs_folder)?.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if !extract::is_supported(&path) {
                debug!(path = %path.display(), "Skipping unsupported file");
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            match file_fingerprint(&path) {
                Ok(fp) => on_disk.push((name, path, fp)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to stat document");
                    report.failed += 1;
                }
            }
        }

        // Ingest new or changed files.
        for (name, path, fingerprint) in &on_disk {
            let unchanged = self
                .index
                .read()
                .get(name)
                .map(|entry| entry.fingerprint == *fingerprint)
                .unwrap_or(false);
            if unchanged {
                report.unchanged += 1;
                continue;
            }
            match self.ingest_file(path).await {
                Ok(_) => report.ingested += 1,
                Err(e) => {
                    warn!(document = %name, error = %e, "Ingestion failed; document skipped");
                    report.failed += 1;
                }
            }
        }

        // Drop index entries whose files are gone.
        let stale: Vec<String> = self
            .index
            .read()
            .documents()
            .map(|(name, _)| name.clone())
            .filter(|name| !on_disk.iter().any(|(n, _, _)| n == name))
            .collect();
        for name in stale {
            self.index.remove_document(&name);
            let _ = std::fs::remove_file(self.snapshot_path(&name));
            report.removed += 1;
        }

        info!(
            ingested = report.ingested,
            removed = report.removed,
            unchanged = report.unchanged,
            failed = report.failed,
            "Reload complete"
        );
        Ok(report)
    }

    /// Retrieve up to `k` ranked passages for a free-text query.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let query_vector = self.embedding.embed(text).await?;
        Ok(self.index.read().search(&query_vector, k, self.min_score))
    }

    /// Extract, chunk, embed, and commit one file. Returns the chunk count.
    async fn ingest_file(&self, path: &Path) -> Result<usize, RetrievalError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RetrievalError::InvalidName(path.display().to_string()))?
            .to_string();

        let text = extract::extract_text(path)?.ok_or_else(|| {
            RetrievalError::Extraction(format!("unsupported document format: {}", name))
        })?;
        let fingerprint = file_fingerprint(path)?;

        let mut chunks = Vec::new();
        for (chunk_index, chunk_text) in self.chunker.split(&text).into_iter().enumerate() {
            let embedding = self.embedding.embed(&chunk_text).await?;
            chunks.push(ChunkEntry {
                chunk_index,
                text: chunk_text,
                embedding,
            });
        }

        self.persist_document(&name, &fingerprint, &chunks)?;
        // Commit point: the new chunks become queryable here, all at once.
        self.index.replace_document(
            &name,
            DocumentEntry {
                fingerprint,
                chunks,
            },
        );
        debug!(document = %name, "Document ingested");
        Ok(self
            .index
            .read()
            .get(&name)
            .map(|e| e.chunks.len())
            .unwrap_or(0))
    }

    fn persist_document(
        &self,
        name: &str,
        fingerprint: &Fingerprint,
        chunks: &[ChunkEntry],
    ) -> Result<(), RetrievalError> {
        let persisted = PersistedDocument {
            document_id: name.to_string(),
            model_id: self.embedding.model_id().to_string(),
            dimensions: self.embedding.dimensions(),
            len: fingerprint.len,
            mtime_secs: fingerprint.mtime_secs,
            chunks: chunks
                .iter()
                .map(|c| PersistedChunk {
                    chunk_index: c.chunk_index,
                    text: c.text.clone(),
                    embedding: c.embedding.clone(),
                })
                .collect(),
        };
        let path = self.snapshot_path(name);
        std::fs::write(&path, serde_json::to_string(&persisted)?)?;
        Ok(())
    }

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.index_dir.join(format!("{}.vec.json", name))
    }
}

/// Reject names that could escape the documents folder.
fn validate_name(name: &str) -> Result<(), RetrievalError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(RetrievalError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn file_fingerprint(path: &Path) -> Result<Fingerprint, RetrievalError> {
    let metadata = std::fs::metadata(path)?;
    let mtime_secs = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(Fingerprint {
        len: metadata.len(),
        mtime_secs,
    })
}
