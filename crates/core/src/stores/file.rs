use super::Collection;
use crate::traits::VectorIndex;
use crate::{IndexEntry, RagError, RetrievalResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

const SNAPSHOT_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub format_version: u32,
    pub generation: Uuid,
    pub model: String,
    pub dimensions: usize,
    pub built_at: DateTime<Utc>,
    pub entry_count: usize,
    /// Source names in first-seen order.
    pub sources: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Default)]
struct LoadedState {
    manifest: Option<IndexManifest>,
    collection: Arc<Collection>,
    /// Modification time of the snapshot this state was read from.
    modified: Option<SystemTime>,
}

/// Vector index persisted as one JSON snapshot inside a directory.
///
/// Rebuilds go to a temporary file that is synced and renamed over the
/// snapshot, so other processes opening the directory see a complete old or
/// new index. In-process readers hold an `Arc` of the collection they
/// started with.
pub struct FileVectorIndex {
    directory: PathBuf,
    model: String,
    state: RwLock<LoadedState>,
    writer: Mutex<()>,
}

impl FileVectorIndex {
    /// Opens the index at `directory` without creating anything. A missing
    /// snapshot yields an empty index.
    pub async fn open(directory: impl Into<PathBuf>, model: impl Into<String>) -> Result<Self, RagError> {
        let directory = directory.into();
        let model = model.into();
        let state = load_state(&directory, &model).await?;

        Ok(Self {
            directory,
            model,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.directory.join(SNAPSHOT_FILE)
    }

    pub async fn manifest(&self) -> Option<IndexManifest> {
        self.state.read().await.manifest.clone()
    }

    /// Re-reads the snapshot from disk, picking up a rebuild made by another
    /// process.
    pub async fn reload(&self) -> Result<(), RagError> {
        let state = load_state(&self.directory, &self.model).await?;
        *self.state.write().await = state;
        Ok(())
    }

    /// Reloads only when the snapshot on disk differs from the one in memory.
    /// Returns whether a reload happened.
    pub async fn reload_if_changed(&self) -> Result<bool, RagError> {
        let on_disk = snapshot_modified(&self.snapshot_path()).await?;
        if on_disk == self.state.read().await.modified {
            return Ok(false);
        }

        self.reload().await?;
        info!(directory = %self.directory.display(), "vector index reloaded from disk");
        Ok(true)
    }
}

#[async_trait]
impl VectorIndex for FileVectorIndex {
    async fn upsert_all(&self, entries: Vec<IndexEntry>) -> Result<(), RagError> {
        let _writer = self.writer.lock().await;

        let collection = Collection::build(entries)?;
        let mut sources: Vec<String> = Vec::new();
        for entry in &collection.entries {
            if !sources.contains(&entry.chunk.source_name) {
                sources.push(entry.chunk.source_name.clone());
            }
        }

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            generation: Uuid::new_v4(),
            model: self.model.clone(),
            dimensions: collection.dimensions,
            built_at: Utc::now(),
            entry_count: collection.entries.len(),
            sources,
        };

        let persisted = PersistedIndex {
            manifest,
            entries: collection.entries,
        };
        let bytes = serde_json::to_vec(&persisted)?;
        let PersistedIndex { manifest, entries } = persisted;

        let directory = self.directory.clone();
        let generation = manifest.generation;
        let modified = tokio::task::spawn_blocking(move || write_snapshot(&directory, generation, &bytes))
            .await
            .map_err(|error| RagError::Storage(format!("snapshot writer panicked: {error}")))??;

        info!(
            directory = %self.directory.display(),
            generation = %manifest.generation,
            entries = manifest.entry_count,
            dimensions = manifest.dimensions,
            "vector index rebuilt"
        );

        let collection = Arc::new(Collection {
            dimensions: manifest.dimensions,
            entries,
        });
        *self.state.write().await = LoadedState {
            manifest: Some(manifest),
            collection,
            modified: Some(modified),
        };
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<RetrievalResult, RagError> {
        let collection = Arc::clone(&self.state.read().await.collection);
        collection.search(query_vector, k)
    }
}

async fn load_state(directory: &Path, model: &str) -> Result<LoadedState, RagError> {
    let path = directory.join(SNAPSHOT_FILE);
    let Some(modified) = snapshot_modified(&path).await? else {
        return Ok(LoadedState::default());
    };

    let bytes = tokio::fs::read(&path).await?;
    let persisted: PersistedIndex = serde_json::from_slice(&bytes)
        .map_err(|error| RagError::Storage(format!("{}: {error}", path.display())))?;

    if persisted.manifest.format_version != FORMAT_VERSION {
        return Err(RagError::Storage(format!(
            "{} has format version {}, expected {FORMAT_VERSION}",
            path.display(),
            persisted.manifest.format_version
        )));
    }
    if persisted.manifest.model != model {
        warn!(
            stored = %persisted.manifest.model,
            configured = %model,
            "index was built with a different embedding model; similarity scores are not comparable"
        );
    }

    let collection = Collection::build(persisted.entries)?;
    Ok(LoadedState {
        manifest: Some(persisted.manifest),
        collection: Arc::new(collection),
        modified: Some(modified),
    })
}

async fn snapshot_modified(path: &Path) -> Result<Option<SystemTime>, RagError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.modified()?)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Writes the snapshot under a per-generation temporary name, then renames
/// it into place. Returns the new snapshot's modification time.
fn write_snapshot(directory: &Path, generation: Uuid, bytes: &[u8]) -> Result<SystemTime, RagError> {
    fs::create_dir_all(directory)?;

    let snapshot_path = directory.join(SNAPSHOT_FILE);
    let tmp_path = directory.join(format!("{SNAPSHOT_FILE}.{generation}.tmp"));

    let written = File::create(&tmp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(error) = written.and_then(|()| fs::rename(&tmp_path, &snapshot_path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error.into());
    }

    Ok(fs::metadata(&snapshot_path)?.modified()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::tests::entry;
    use tempfile::tempdir;

    fn leftover_temp_files(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for item in fs::read_dir(directory)? {
            let path = item?.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                found.push(path);
            }
        }
        Ok(found)
    }

    #[tokio::test]
    async fn missing_snapshot_opens_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = FileVectorIndex::open(dir.path().join("vector_db"), "model").await?;

        assert!(index.manifest().await.is_none());
        assert!(matches!(index.search(&[1.0], 3).await, Err(RagError::IndexEmpty)));
        assert!(!index.directory().exists());
        Ok(())
    }

    #[tokio::test]
    async fn index_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("vector_db");

        let index = FileVectorIndex::open(&path, "model").await?;
        index
            .upsert_all(vec![entry("a", 0, vec![1.0, 0.0]), entry("b", 0, vec![0.0, 1.0])])
            .await?;
        let written = index.manifest().await.ok_or("manifest missing")?;
        drop(index);

        let reopened = FileVectorIndex::open(&path, "model").await?;
        let manifest = reopened.manifest().await.ok_or("manifest missing")?;
        assert_eq!(manifest, written);
        assert_eq!(manifest.entry_count, 2);
        assert_eq!(manifest.dimensions, 2);
        assert_eq!(manifest.sources, vec!["a".to_string(), "b".to_string()]);

        let result = reopened.search(&[0.0, 1.0], 1).await?;
        assert_eq!(result.hits[0].chunk.source_name, "b");
        assert!(leftover_temp_files(&path)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_replaces_snapshot_wholesale() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = FileVectorIndex::open(dir.path(), "model").await?;

        index.upsert_all(vec![entry("old", 0, vec![1.0, 0.0, 0.0])]).await?;
        let first = index.manifest().await.ok_or("manifest missing")?;
        index.upsert_all(vec![entry("new", 0, vec![0.0, 1.0])]).await?;
        let second = index.manifest().await.ok_or("manifest missing")?;

        assert_ne!(first.generation, second.generation);
        assert_eq!(second.dimensions, 2);
        let result = index.search(&[0.0, 1.0], 5).await?;
        assert_eq!(result.len(), 1);
        assert_eq!(result.hits[0].chunk.source_name, "new");
        Ok(())
    }

    #[tokio::test]
    async fn reload_sees_rebuild_from_another_handle() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let reader = FileVectorIndex::open(dir.path(), "model").await?;
        let writer = FileVectorIndex::open(dir.path(), "model").await?;

        writer.upsert_all(vec![entry("fresh", 0, vec![1.0])]).await?;
        assert!(matches!(reader.search(&[1.0], 1).await, Err(RagError::IndexEmpty)));

        reader.reload().await?;
        let result = reader.search(&[1.0], 1).await?;
        assert_eq!(result.hits[0].chunk.source_name, "fresh");
        Ok(())
    }

    #[tokio::test]
    async fn reload_if_changed_tracks_the_snapshot_on_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let reader = FileVectorIndex::open(dir.path(), "model").await?;
        let writer = FileVectorIndex::open(dir.path(), "model").await?;

        assert!(!reader.reload_if_changed().await?);

        writer.upsert_all(vec![entry("first", 0, vec![1.0, 0.0])]).await?;
        assert!(reader.reload_if_changed().await?);
        assert!(!reader.reload_if_changed().await?);
        assert!(!writer.reload_if_changed().await?);

        let generation = writer.manifest().await.ok_or("manifest missing")?.generation;
        assert_eq!(reader.manifest().await.ok_or("manifest missing")?.generation, generation);
        let result = reader.search(&[1.0, 0.0], 1).await?;
        assert_eq!(result.hits[0].chunk.source_name, "first");
        Ok(())
    }

    #[test]
    fn snapshot_writes_use_a_per_generation_temp_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let blocker = dir.path().join(SNAPSHOT_FILE);
        fs::create_dir(&blocker)?;
        fs::write(blocker.join("occupied"), b"x")?;

        let generation = Uuid::new_v4();
        let result = write_snapshot(dir.path(), generation, b"{}");

        assert!(result.is_err());
        assert!(leftover_temp_files(dir.path())?.is_empty());
        assert!(!dir.path().join(format!("{SNAPSHOT_FILE}.{generation}.tmp")).exists());

        fs::remove_dir_all(&blocker)?;
        write_snapshot(dir.path(), generation, b"{}")?;
        assert_eq!(fs::read(&blocker)?, b"{}");
        assert!(leftover_temp_files(dir.path())?.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn searches_during_rebuild_see_one_whole_generation() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = Arc::new(FileVectorIndex::open(dir.path(), "model").await?);

        let old: Vec<IndexEntry> = (0..3).map(|i| entry("old", i, vec![1.0, i as f32])).collect();
        index.upsert_all(old).await?;

        let mut readers = Vec::new();
        for _ in 0..4 {
            let index = Arc::clone(&index);
            readers.push(tokio::spawn(async move {
                let mut saw_new = false;
                for _ in 0..500 {
                    match index.search(&[1.0, 0.0], 10).await {
                        Ok(result) => {
                            assert!(!saw_new, "old generation visible after the new one");
                            assert_eq!(result.len(), 3);
                            assert!(result.chunks().all(|chunk| chunk.source_name == "old"));
                        }
                        Err(RagError::DimensionMismatch {
                            expected: 3,
                            actual: 2,
                        }) => {
                            saw_new = true;
                            let result = index
                                .search(&[1.0, 0.0, 0.0], 10)
                                .await
                                .expect("new generation searchable");
                            assert_eq!(result.len(), 5);
                            assert!(result.chunks().all(|chunk| chunk.source_name == "new"));
                        }
                        Err(other) => panic!("search during rebuild failed: {other}"),
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        let new: Vec<IndexEntry> = (0..5)
            .map(|i| entry("new", i, vec![1.0, 0.0, i as f32]))
            .collect();
        index.upsert_all(new).await?;

        for reader in readers {
            reader.await?;
        }

        let result = index.search(&[1.0, 0.0, 0.0], 10).await?;
        assert_eq!(result.len(), 5);
        assert!(leftover_temp_files(dir.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_storage_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join(SNAPSHOT_FILE), b"{ not json")?;

        let result = FileVectorIndex::open(dir.path(), "model").await;
        assert!(matches!(result, Err(RagError::Storage(_))));
        Ok(())
    }
}
