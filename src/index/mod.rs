//! The per-user vector index.
//!
//! One on-disk approximate-nearest-neighbor structure per user — not per
//! space. Space filtering happens via the auxiliary mapping, which avoids
//! rebuilding many tiny indexes and lets global search reuse one structure.
//!
//! # State
//!
//! | Field | Purpose |
//! |-------|---------|
//! | `graph` | HNSW payload; node position == internal id |
//! | `forward` | internal id → (item id, space id) for live entries |
//! | `reverse` | item id → internal id (inverse bijection over live entries) |
//! | `next_id` | monotonic id counter; ids are never reused after deletion |
//! | `tombstones` | retired ids the graph may still return; search post-filters |
//!
//! # Concurrency
//!
//! Readers-writer discipline: any number of concurrent searches, one
//! mutation at a time, writers exclude readers. `add`, `delete`, and
//! `search` never suspend; no other lock is ever acquired while the writer
//! lock is held. `persist` serializes the snapshot under the read lock and
//! performs the disk write outside any lock, committing by rename.
//!
//! # Snapshot format
//!
//! bincode of [`IndexInner`] — version and `next_id` with the ANN payload
//! first, then the forward/reverse/tombstone maps — terminated by a
//! trailing SHA-256 checksum. A missing file loads an empty index; a
//! checksum or version mismatch discards the snapshot.

pub mod hnsw;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::vector;
use hnsw::{HnswGraph, HnswParams};

const SNAPSHOT_VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 32;
const NORM_TOLERANCE: f32 = 1e-4;

/// A scored hit from the index, pre-hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub item_id: String,
    pub space_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    item_id: String,
    space_id: String,
}

#[derive(Serialize, Deserialize)]
struct IndexInner {
    version: u32,
    next_id: u64,
    graph: HnswGraph,
    forward: HashMap<u64, EntryMeta>,
    reverse: HashMap<String, u64>,
    tombstones: HashSet<u64>,
}

impl IndexInner {
    fn empty(dims: usize, params: HnswParams) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_id: 0,
            graph: HnswGraph::new(dims, params),
            forward: HashMap::new(),
            reverse: HashMap::new(),
            tombstones: HashSet::new(),
        }
    }

    fn tombstone_ratio(&self) -> f64 {
        let total = self.forward.len() + self.tombstones.len();
        if total == 0 {
            return 0.0;
        }
        self.tombstones.len() as f64 / total as f64
    }
}

/// Persistent ANN index plus the item/space mapping that scopes it.
pub struct VectorIndex {
    path: PathBuf,
    dims: usize,
    params: HnswParams,
    compact_threshold: f64,
    inner: RwLock<IndexInner>,
}

impl VectorIndex {
    /// Open the index at `path`, restoring the snapshot when one exists.
    /// A missing, corrupt, or dimension-mismatched snapshot yields an
    /// empty index.
    pub fn open(
        path: impl AsRef<Path>,
        dims: usize,
        params: HnswParams,
        compact_threshold: f64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = match load_snapshot(&path)? {
            Some(inner) if inner.graph.dims() == dims => inner,
            Some(_) => {
                eprintln!(
                    "Warning: index snapshot at {} has a different dimension; starting empty (run admin reindex)",
                    path.display()
                );
                IndexInner::empty(dims, params.clone())
            }
            None => IndexInner::empty(dims, params.clone()),
        };

        Ok(Self {
            path,
            dims,
            params,
            compact_threshold,
            inner: RwLock::new(inner),
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstone_count(&self) -> usize {
        self.inner.read().unwrap().tombstones.len()
    }

    /// Insert a unit vector for `item_id`, returning the assigned internal
    /// id. Fails without mutating anything on a duplicate item, a dimension
    /// mismatch, or a non-normalized vector.
    pub fn add(&self, item_id: &str, embedding: Vec<f32>, space_id: &str) -> Result<u64> {
        if embedding.len() != self.dims {
            return Err(Error::Internal(format!(
                "dimension mismatch: expected {}, got {}",
                self.dims,
                embedding.len()
            )));
        }
        if !vector::is_normalized(&embedding, NORM_TOLERANCE) {
            return Err(Error::Internal(format!(
                "vector for item {} is not normalized (norm {})",
                item_id,
                vector::norm(&embedding)
            )));
        }

        let mut inner = self.inner.write().unwrap();
        if inner.reverse.contains_key(item_id) {
            return Err(Error::Conflict(format!(
                "item {} is already indexed",
                item_id
            )));
        }

        let internal_id = inner.next_id;
        let graph_id = inner.graph.insert(embedding) as u64;
        debug_assert_eq!(graph_id, internal_id, "graph position tracks next_id");

        inner.forward.insert(
            internal_id,
            EntryMeta {
                item_id: item_id.to_string(),
                space_id: space_id.to_string(),
            },
        );
        inner.reverse.insert(item_id.to_string(), internal_id);
        inner.next_id += 1;

        Ok(internal_id)
    }

    /// Remove `item_id`'s entry. Returns `false` (not-found, informational)
    /// for unknown ids; calling twice leaves the same state as calling once.
    ///
    /// The ANN payload is not touched — the id is tombstoned and search
    /// post-filters — which keeps delete O(1) at the cost of recall decay
    /// until compaction. Crossing the tombstone-ratio threshold triggers an
    /// inline compaction.
    pub fn delete(&self, item_id: &str) -> Result<bool> {
        let should_compact = {
            let mut inner = self.inner.write().unwrap();
            let Some(internal_id) = inner.reverse.remove(item_id) else {
                return Ok(false);
            };
            inner.forward.remove(&internal_id);
            inner.tombstones.insert(internal_id);
            inner.tombstone_ratio() >= self.compact_threshold
        };

        if should_compact {
            self.compact()?;
        }
        Ok(true)
    }

    /// K nearest live entries within `space_id`, best first, ties broken by
    /// lower internal id. Over-fetches to tolerate post-filtering losses;
    /// returns fewer than K when fewer survive, never padding.
    pub fn search(&self, query: &[f32], space_id: &str, k: usize) -> Result<Vec<IndexHit>> {
        self.search_filtered(query, Some(space_id), k)
    }

    /// Like [`search`](Self::search) with no space filter. The index is
    /// per-user, so every entry already belongs to the caller.
    pub fn global_search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        self.search_filtered(query, None, k)
    }

    fn search_filtered(
        &self,
        query: &[f32],
        space_id: Option<&str>,
        k: usize,
    ) -> Result<Vec<IndexHit>> {
        if query.len() != self.dims {
            return Err(Error::Internal(format!(
                "dimension mismatch: expected {}, got {}",
                self.dims,
                query.len()
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().unwrap();
        let over_fetch = (4 * k).max(64);
        let candidates = inner.graph.search(query, over_fetch);

        let mut hits = Vec::with_capacity(k);
        for (graph_id, score) in candidates {
            let internal_id = graph_id as u64;
            // Tombstoned ids have no forward entry; both filters are this lookup.
            let Some(meta) = inner.forward.get(&internal_id) else {
                continue;
            };
            if let Some(wanted) = space_id {
                if meta.space_id != wanted {
                    continue;
                }
            }
            hits.push(IndexHit {
                item_id: meta.item_id.clone(),
                space_id: meta.space_id.clone(),
                score,
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    /// Write a consistent snapshot: serialize under the read lock, then
    /// write-and-rename outside any lock.
    pub fn persist(&self) -> Result<()> {
        let bytes = {
            let inner = self.inner.read().unwrap();
            snapshot_bytes(&inner)?
        };
        write_atomic(&self.path, &bytes)
    }

    /// Rebuild the ANN payload from live entries, dropping tombstones and
    /// re-assigning internal ids. The rebuilt state is persisted before the
    /// in-memory swap is considered done.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        // Stable rebuild order: old internal id.
        let mut live: Vec<(u64, EntryMeta)> = inner
            .forward
            .iter()
            .map(|(id, meta)| (*id, meta.clone()))
            .collect();
        live.sort_by_key(|(id, _)| *id);

        let mut rebuilt = IndexInner::empty(self.dims, self.params.clone());
        for (old_id, meta) in live {
            let embedding = inner
                .graph
                .vector(old_id as usize)
                .ok_or_else(|| {
                    Error::Internal(format!("forward entry {} missing from graph", old_id))
                })?
                .to_vec();
            let new_id = rebuilt.graph.insert(embedding) as u64;
            rebuilt.forward.insert(new_id, meta.clone());
            rebuilt.reverse.insert(meta.item_id, new_id);
            rebuilt.next_id = new_id + 1;
        }

        let bytes = snapshot_bytes(&rebuilt)?;
        write_atomic(&self.path, &bytes)?;

        *inner = rebuilt;
        Ok(())
    }

    /// Drop every entry and persist the empty state. Used by full reindex.
    pub fn clear(&self) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            *inner = IndexInner::empty(self.dims, self.params.clone());
        }
        self.persist()
    }
}

fn snapshot_bytes(inner: &IndexInner) -> Result<Vec<u8>> {
    let mut bytes = bincode::serialize(inner)
        .map_err(|e| Error::Internal(format!("serialize index snapshot: {}", e)))?;
    let digest = Sha256::digest(&bytes);
    bytes.extend_from_slice(&digest);
    Ok(bytes)
}

fn load_snapshot(path: &Path) -> Result<Option<IndexInner>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if bytes.len() < CHECKSUM_LEN {
        eprintln!(
            "Warning: index snapshot at {} is truncated; starting empty",
            path.display()
        );
        return Ok(None);
    }

    let (payload, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let digest = Sha256::digest(payload);
    if digest.as_slice() != checksum {
        eprintln!(
            "Warning: index snapshot at {} failed its checksum; starting empty",
            path.display()
        );
        return Ok(None);
    }

    match bincode::deserialize::<IndexInner>(payload) {
        Ok(inner) if inner.version == SNAPSHOT_VERSION => Ok(Some(inner)),
        Ok(_) => {
            eprintln!(
                "Warning: index snapshot at {} has an unknown version; starting empty",
                path.display()
            );
            Ok(None)
        }
        Err(e) => {
            eprintln!(
                "Warning: index snapshot at {} failed to parse ({}); starting empty",
                path.display(),
                e
            );
            Ok(None)
        }
    }
}

/// Write to a temporary sibling, fsync, then rename over the target so a
/// crash mid-write leaves the previous snapshot intact.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Error::from(e)
    })
}
