//! Per-patient corpus unit.
//!
//! One directory per patient holds the vector store file, its ANN index
//! file and the sparse-index subdirectory. The two indexes are persisted
//! independently; the sparse side is a best-effort mirror of the vector
//! store, never the authority.

use std::path::{Path, PathBuf};

use crate::sparse_index::SparseIndex;
use crate::vector_store::{VectorStore, STORE_FILE};
use crate::RagError;

/// Sparse-index subdirectory inside a patient directory.
pub const SPARSE_DIR: &str = "bm25";

/// A patient's complete indexed corpus.
pub struct CorpusStore {
    patient_id: String,
    dir: PathBuf,
    pub vectors: VectorStore,
    pub sparse: Option<SparseIndex>,
}

impl CorpusStore {
    /// Open a patient corpus under `dir`. With `use_sparse`, a failure to
    /// create or open the sparse index propagates as a configuration error;
    /// callers wanting dense-only degradation reopen without it.
    pub fn open(
        dir: impl AsRef<Path>,
        patient_id: impl Into<String>,
        dim: usize,
        use_sparse: bool,
    ) -> Result<Self, RagError> {
        let dir = dir.as_ref().to_path_buf();
        let vectors = VectorStore::open(&dir, dim)?;
        let sparse = if use_sparse {
            Some(SparseIndex::open(dir.join(SPARSE_DIR))?)
        } else {
            None
        };
        Ok(Self {
            patient_id: patient_id.into(),
            dir,
            vectors,
            sparse,
        })
    }

    /// Whether a corpus has been persisted under `dir`.
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(STORE_FILE).exists()
    }

    /// Remove every persisted artifact of the corpus.
    pub fn purge(dir: impl AsRef<Path>) -> Result<(), RagError> {
        let dir = dir.as_ref();
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .map_err(|e| RagError::Storage(format!("cannot purge {}: {e}", dir.display())))?;
        }
        Ok(())
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Maintenance entry point: repair the ANN index if it drifted.
    pub fn ensure_index_consistency(&mut self) -> Result<(), RagError> {
        self.vectors.ensure_index_consistency()
    }
}
