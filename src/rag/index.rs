//! Brute-force L2 vector index with in-memory and persistent backings

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RagError, RagResult};
use crate::log_debug;
use crate::rag::embeddings::Embedding;

/// Snapshot filename inside a persistent index directory
pub const SNAPSHOT_FILENAME: &str = "index.json";
const SNAPSHOT_VERSION: u32 = 1;

/// One stored vector with its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Embedding,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Exact-equality constraint on metadata keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter(BTreeMap<String, Value>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Filter on the `category` metadata key
    pub fn category(category: impl Into<String>) -> Self {
        Self::new().with("category", category.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.0
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// A query hit and its Euclidean distance from the query vector
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub entry: IndexEntry,
    pub distance: f32,
}

/// Storage and nearest-neighbour lookup of embedded documents
pub trait VectorIndex: Send + Sync {
    /// Insert entries; an existing id is replaced in place
    fn upsert(&self, entries: Vec<IndexEntry>) -> RagResult<()>;

    /// Up to `k` entries nearest-first; ties keep insertion order
    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<Neighbor>>;

    fn get(&self, id: &str) -> Option<IndexEntry>;

    fn count(&self) -> usize;

    /// All entries in insertion order
    fn entries(&self) -> Vec<IndexEntry>;

    /// Drop every entry
    fn reset(&self) -> RagResult<()>;

    /// Vector length of stored entries, if any are stored
    fn dimension(&self) -> Option<usize>;
}

/// Euclidean distance between equal-length vectors
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Ephemeral index guarded by a read-mostly lock
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn replace(&self, entries: Vec<IndexEntry>) {
        *self.entries.write() = entries;
    }
}

/// Apply `batch` to `entries`: replace matching ids in place, append the rest
fn merge_batch(entries: &mut Vec<IndexEntry>, batch: Vec<IndexEntry>) -> RagResult<()> {
    check_batch(entries.first().map(|e| e.vector.len()), &batch)?;
    for entry in batch {
        if let Some(slot) = entries.iter_mut().find(|e| e.id == entry.id) {
            *slot = entry;
        } else {
            entries.push(entry);
        }
    }
    Ok(())
}

fn check_batch(existing: Option<usize>, batch: &[IndexEntry]) -> RagResult<()> {
    let mut expected = existing;
    for entry in batch {
        match expected {
            Some(dim) if dim != entry.vector.len() => {
                return Err(RagError::DimensionMismatch {
                    expected: dim,
                    actual: entry.vector.len(),
                });
            }
            Some(_) => {}
            None => expected = Some(entry.vector.len()),
        }
    }
    Ok(())
}

impl VectorIndex for InMemoryIndex {
    fn upsert(&self, batch: Vec<IndexEntry>) -> RagResult<()> {
        merge_batch(&mut self.entries.write(), batch)
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<Neighbor>> {
        let entries = self.entries.read();
        if let Some(first) = entries.first()
            && first.vector.len() != vector.len()
        {
            return Err(RagError::DimensionMismatch {
                expected: first.vector.len(),
                actual: vector.len(),
            });
        }

        let mut hits: Vec<Neighbor> = entries
            .iter()
            .filter(|e| filter.is_none_or(|f| f.matches(&e.metadata)))
            .map(|e| Neighbor {
                distance: l2_distance(&e.vector, vector),
                entry: e.clone(),
            })
            .collect();

        // Stable sort keeps insertion order among equal distances
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn get(&self, id: &str) -> Option<IndexEntry> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    fn count(&self) -> usize {
        self.entries.read().len()
    }

    fn entries(&self) -> Vec<IndexEntry> {
        self.entries.read().clone()
    }

    fn reset(&self) -> RagResult<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn dimension(&self) -> Option<usize> {
        self.entries.read().first().map(|e| e.vector.len())
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<IndexEntry>,
}

/// Index snapshotted to `<dir>/index.json` on every mutation
///
/// The snapshot is written before memory is updated, so a failed write
/// leaves both unchanged.
#[derive(Debug)]
pub struct PersistentIndex {
    dir: PathBuf,
    inner: InMemoryIndex,
    write_lock: Mutex<()>,
}

impl PersistentIndex {
    /// Open (or create) the index stored under `dir`
    pub fn open(dir: impl AsRef<Path>) -> RagResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let path = dir.join(SNAPSHOT_FILENAME);
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&content)?;
            log_debug!(
                "Loaded {} index entries from {} (snapshot v{})",
                snapshot.entries.len(),
                path.display(),
                snapshot.version
            );
            snapshot.entries
        } else {
            Vec::new()
        };

        Ok(Self {
            dir,
            inner: InMemoryIndex::from_entries(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_snapshot(&self, entries: Vec<IndexEntry>) -> RagResult<Vec<IndexEntry>> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &snapshot)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(SNAPSHOT_FILENAME))?;
        Ok(snapshot.entries)
    }
}

impl VectorIndex for PersistentIndex {
    fn upsert(&self, entries: Vec<IndexEntry>) -> RagResult<()> {
        let _guard = self.write_lock.lock();
        let mut next = self.inner.entries();
        merge_batch(&mut next, entries)?;
        let next = self.write_snapshot(next)?;
        self.inner.replace(next);
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<Neighbor>> {
        self.inner.query(vector, k, filter)
    }

    fn get(&self, id: &str) -> Option<IndexEntry> {
        self.inner.get(id)
    }

    fn count(&self) -> usize {
        self.inner.count()
    }

    fn entries(&self) -> Vec<IndexEntry> {
        self.inner.entries()
    }

    fn reset(&self) -> RagResult<()> {
        let _guard = self.write_lock.lock();
        self.write_snapshot(Vec::new())?;
        self.inner.reset()
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, vector: Vec<f32>, category: &str) -> IndexEntry {
        let mut metadata = Map::new();
        metadata.insert("category".into(), json!(category));
        IndexEntry {
            id: id.into(),
            vector,
            content: format!("content of {id}"),
            metadata,
        }
    }

    #[test]
    fn query_orders_nearest_first() {
        let index = InMemoryIndex::new();
        index
            .upsert(vec![
                entry("far", vec![0.0, 1.0], "ai"),
                entry("near", vec![1.0, 0.0], "ai"),
                entry("mid", vec![0.8, 0.6], "software"),
            ])
            .expect("upsert");

        let hits = index.query(&[1.0, 0.0], 2, None).expect("query");
        let ids: Vec<_> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = InMemoryIndex::new();
        index
            .upsert(vec![
                entry("b", vec![0.0, 1.0], "ai"),
                entry("a", vec![0.0, -1.0], "ai"),
            ])
            .expect("upsert");
        let hits = index.query(&[1.0, 0.0], 5, None).expect("query");
        assert_eq!(hits[0].entry.id, "b");
        assert_eq!(hits[1].entry.id, "a");
    }

    #[test]
    fn filter_requires_exact_metadata_match() {
        let index = InMemoryIndex::new();
        index
            .upsert(vec![
                entry("x", vec![1.0, 0.0], "ai"),
                entry("y", vec![1.0, 0.0], "software"),
            ])
            .expect("upsert");
        let filter = MetadataFilter::category("software");
        let hits = index.query(&[1.0, 0.0], 5, Some(&filter)).expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, "y");
    }

    #[test]
    fn upsert_replaces_existing_id_in_place() {
        let index = InMemoryIndex::new();
        index
            .upsert(vec![entry("a", vec![1.0, 0.0], "ai"), entry("b", vec![0.0, 1.0], "ai")])
            .expect("upsert");
        index.upsert(vec![entry("a", vec![0.6, 0.8], "software")]).expect("upsert");

        let ids: Vec<_> = index.entries().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(index.get("a").expect("present").vector, vec![0.6, 0.8]);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let index = InMemoryIndex::new();
        index.upsert(vec![entry("a", vec![1.0, 0.0], "ai")]).expect("upsert");
        assert!(matches!(
            index.upsert(vec![entry("b", vec![1.0, 0.0, 0.0], "ai")]),
            Err(RagError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(index.query(&[1.0], 1, None).is_err());
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn persistent_index_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let index = PersistentIndex::open(dir.path()).expect("open");
            index
                .upsert(vec![entry("a", vec![1.0, 0.0], "ai"), entry("b", vec![0.0, 1.0], "ai")])
                .expect("upsert");
        }

        let reopened = PersistentIndex::open(dir.path()).expect("reopen");
        assert_eq!(reopened.count(), 2);
        assert_eq!(reopened.entries()[1].id, "b");

        reopened.reset().expect("reset");
        assert_eq!(PersistentIndex::open(dir.path()).expect("reopen").count(), 0);
    }

    #[test]
    fn failed_snapshot_leaves_index_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("kb");
        let index = PersistentIndex::open(&root).expect("open");
        index.upsert(vec![entry("a", vec![1.0, 0.0], "ai")]).expect("upsert");

        fs::remove_dir_all(&root).expect("remove");
        assert!(index.upsert(vec![entry("b", vec![0.0, 1.0], "ai")]).is_err());
        assert!(index.reset().is_err());

        assert_eq!(index.count(), 1);
        assert!(index.get("b").is_none());
    }
}
