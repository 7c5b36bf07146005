//! Persistent per-patient vector store.
//!
//! The store file (`vectors.json`) is columnar: parallel `vectors` and
//! `metadata` arrays with a fixed dimension. Next to it lives a flat
//! inner-product index file (`vectors.ann`) holding the L2-normalized rows;
//! search is an exact scan, per-patient corpora stay in the tens to low
//! hundreds of chunks. The index is rebuilt from the stored vectors
//! whenever it is missing or its count disagrees with the store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use mediserve_core::ChunkRecord;

use crate::embeddings::{dot, l2_normalize};
use crate::RagError;

/// Store file name inside a patient directory.
pub const STORE_FILE: &str = "vectors.json";
/// ANN index file name inside a patient directory.
pub const ANN_FILE: &str = "vectors.ann";

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    dim: usize,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<ChunkRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnnFile {
    dim: usize,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

/// Flat inner-product index over normalized vectors.
#[derive(Debug, Default, Clone)]
struct FlatIpIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIpIndex {
    fn len(&self) -> usize {
        self.ids.len()
    }

    /// Top-k by inner product, descending, with a stable id tie-break.
    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let mut hits: Vec<(String, f32)> = self
            .ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(id, v)| (id.clone(), dot(query, v)))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        hits
    }
}

/// Vector + metadata store for one patient corpus.
#[derive(Debug)]
pub struct VectorStore {
    dir: PathBuf,
    dim: usize,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<ChunkRecord>,
    id_map: HashMap<String, usize>,
    index: FlatIpIndex,
    loaded: bool,
}

impl VectorStore {
    /// Unloaded handle on the store under `dir`. Every operation except
    /// `load` fails with `NotLoaded` until `load` has run.
    pub fn new(dir: impl AsRef<Path>, dim: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            dim,
            vectors: Vec::new(),
            metadata: Vec::new(),
            id_map: HashMap::new(),
            index: FlatIpIndex::default(),
            loaded: false,
        }
    }

    /// Load and return the store under `dir` in one step.
    pub fn open(dir: impl AsRef<Path>, dim: usize) -> Result<Self, RagError> {
        let mut store = Self::new(dir, dim);
        store.load()?;
        Ok(store)
    }

    /// Load the store file if present, or initialize an empty store of the
    /// configured dimension. Builds the id→record map and brings the ANN
    /// index in line with the stored rows. Never creates files.
    pub fn load(&mut self) -> Result<(), RagError> {
        let store_path = self.dir.join(STORE_FILE);
        self.vectors.clear();
        self.metadata.clear();
        self.id_map.clear();
        self.index = FlatIpIndex::default();
        self.loaded = true;

        if store_path.exists() {
            let raw = fs::read_to_string(&store_path)
                .map_err(|e| RagError::Storage(format!("cannot read {}: {e}", store_path.display())))?;
            let file: StoreFile = serde_json::from_str(&raw)
                .map_err(|e| RagError::Storage(format!("corrupt store file {}: {e}", store_path.display())))?;

            if file.dim != self.dim {
                return Err(RagError::Storage(format!(
                    "store dimension {} does not match configured dimension {}",
                    file.dim, self.dim
                )));
            }
            if file.vectors.len() != file.metadata.len() {
                return Err(RagError::Storage(format!(
                    "row count {} does not match metadata count {}",
                    file.vectors.len(),
                    file.metadata.len()
                )));
            }

            self.vectors = file.vectors;
            self.metadata = file.metadata;
            for (row, record) in self.metadata.iter_mut().enumerate() {
                if record.id.is_empty() {
                    // Lenient policy: id-less records get a positional id.
                    record.id = row.to_string();
                }
            }
            for vector in &mut self.vectors {
                l2_normalize(vector);
            }
            self.rebuild_id_map()?;
            self.ensure_index_consistency()?;
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Resolve a chunk id against the in-memory metadata snapshot.
    pub fn record(&self, id: &str) -> Option<&ChunkRecord> {
        self.id_map.get(id).map(|&row| &self.metadata[row])
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.metadata
    }

    /// Stored (normalized) vector for a chunk id.
    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        self.id_map.get(id).map(|&row| self.vectors[row].as_slice())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_map.contains_key(id)
    }

    /// Merge new rows into the store and persist. A row whose id already
    /// exists replaces the previous one (supersede, not duplicate). Fails
    /// without touching disk on a dimension mismatch.
    pub fn append(
        &mut self,
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<(), RagError> {
        if !self.loaded {
            return Err(RagError::NotLoaded);
        }
        if vectors.len() != records.len() {
            return Err(RagError::Storage(format!(
                "vector count {} does not match metadata count {}",
                vectors.len(),
                records.len()
            )));
        }
        for vector in &vectors {
            if vector.len() != self.dim {
                return Err(RagError::Storage(format!(
                    "vector dimension {} does not match store dimension {}",
                    vector.len(),
                    self.dim
                )));
            }
        }

        for (mut vector, mut record) in vectors.into_iter().zip(records) {
            l2_normalize(&mut vector);
            if record.id.is_empty() {
                record.id = self.metadata.len().to_string();
            }
            match self.id_map.get(&record.id) {
                Some(&row) => {
                    self.vectors[row] = vector;
                    self.metadata[row] = record;
                }
                None => {
                    self.id_map.insert(record.id.clone(), self.metadata.len());
                    self.vectors.push(vector);
                    self.metadata.push(record);
                }
            }
        }

        self.persist()?;
        self.rebuild_index()?;
        Ok(())
    }

    /// Top-k similarity search. The query is normalized, scores are inner
    /// products against the normalized rows (cosine). An empty store yields
    /// an empty result, not an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, RagError> {
        if !self.loaded {
            return Err(RagError::NotLoaded);
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(RagError::Search(format!(
                "query dimension {} does not match store dimension {}",
                query.len(),
                self.dim
            )));
        }
        let mut query = query.to_vec();
        l2_normalize(&mut query);
        Ok(self.index.search(&query, k))
    }

    /// Bring the ANN index file in line with the stored vectors: if the file
    /// is missing, unreadable, or its count disagrees with the row count,
    /// rebuild it deterministically from the store.
    pub fn ensure_index_consistency(&mut self) -> Result<(), RagError> {
        if !self.loaded {
            return Err(RagError::NotLoaded);
        }
        let ann_path = self.dir.join(ANN_FILE);

        if let Some(index) = load_ann(&ann_path, self.dim) {
            if index.len() == self.vectors.len() {
                self.index = index;
                return Ok(());
            }
            tracing::warn!(
                indexed = index.len(),
                stored = self.vectors.len(),
                "ANN index out of sync with store, rebuilding"
            );
        } else if self.vectors.is_empty() {
            self.index = FlatIpIndex::default();
            return Ok(());
        } else {
            tracing::warn!(
                path = %ann_path.display(),
                "ANN index missing, rebuilding from stored vectors"
            );
        }

        self.rebuild_index()
    }

    fn rebuild_id_map(&mut self) -> Result<(), RagError> {
        self.id_map.clear();
        for (row, record) in self.metadata.iter().enumerate() {
            if self.id_map.insert(record.id.clone(), row).is_some() {
                return Err(RagError::Storage(format!(
                    "duplicate chunk id in store: {}",
                    record.id
                )));
            }
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), RagError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| RagError::Storage(format!("cannot create {}: {e}", self.dir.display())))?;
        let file = StoreFile {
            dim: self.dim,
            vectors: self.vectors.clone(),
            metadata: self.metadata.clone(),
        };
        let raw = serde_json::to_string(&file)
            .map_err(|e| RagError::Storage(format!("cannot serialize store: {e}")))?;
        let path = self.dir.join(STORE_FILE);
        fs::write(&path, raw)
            .map_err(|e| RagError::Storage(format!("cannot write {}: {e}", path.display())))
    }

    fn rebuild_index(&mut self) -> Result<(), RagError> {
        self.index = FlatIpIndex {
            ids: self.metadata.iter().map(|r| r.id.clone()).collect(),
            vectors: self.vectors.clone(),
        };

        fs::create_dir_all(&self.dir)
            .map_err(|e| RagError::Storage(format!("cannot create {}: {e}", self.dir.display())))?;
        let file = AnnFile {
            dim: self.dim,
            ids: self.index.ids.clone(),
            vectors: self.index.vectors.clone(),
        };
        let raw = serde_json::to_string(&file)
            .map_err(|e| RagError::Storage(format!("cannot serialize index: {e}")))?;
        let path = self.dir.join(ANN_FILE);
        fs::write(&path, raw)
            .map_err(|e| RagError::Storage(format!("cannot write {}: {e}", path.display())))
    }
}

fn load_ann(path: &Path, dim: usize) -> Option<FlatIpIndex> {
    if !path.exists() {
        return None;
    }
    let raw = fs::read_to_string(path).ok()?;
    let file: AnnFile = serde_json::from_str(&raw).ok()?;
    if file.dim != dim || file.ids.len() != file.vectors.len() {
        return None;
    }
    Some(FlatIpIndex {
        ids: file.ids,
        vectors: file.vectors,
    })
}
