use std::path::{Path, PathBuf};

use crate::{
    corpus::{Record, RecordMetadata},
    embedding::Embedder,
    error::{Error, Result},
    flat_index::{FlatIndex, Neighbor, write_atomic},
};

pub const INDEX_FILE: &str = "index.bin";
pub const TEXTS_FILE: &str = "texts.json";
pub const METADATAS_FILE: &str = "metadatas.json";

/// The three artifacts that together make up a searchable index.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub index: PathBuf,
    pub texts: PathBuf,
    pub metadatas: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            index: dir.join(INDEX_FILE),
            texts: dir.join(TEXTS_FILE),
            metadatas: dir.join(METADATAS_FILE),
        }
    }

    pub fn all_exist(&self) -> bool {
        self.index.is_file() && self.texts.is_file() && self.metadatas.is_file()
    }
}

/// Vectors plus the positionally aligned texts and metadata.
///
/// `index.len() == texts.len() == metadatas.len()` holds for every value of
/// this type; both constructors check it.
#[derive(Debug, Clone)]
pub struct IndexStore {
    index: FlatIndex,
    texts: Vec<String>,
    metadatas: Vec<RecordMetadata>,
    model_id: String,
}

impl IndexStore {
    /// Assemble a store from records and their vectors, in the same order.
    pub fn from_parts(
        records: &[Record],
        vectors: Vec<Vec<f32>>,
        dimension: usize,
        model_id: &str,
    ) -> Result<Self> {
        let mut index = FlatIndex::new(dimension);
        for vector in &vectors {
            index.add(vector)?;
        }

        Self::checked(
            index,
            records.iter().map(|r| r.text.clone()).collect(),
            records.iter().map(|r| r.metadata.clone()).collect(),
            model_id.to_string(),
        )
    }

    /// Load all three artifacts from `dir`. Any one missing, or a length
    /// disagreement between them, is an error.
    pub fn open(dir: &Path) -> Result<Self> {
        let paths = ArtifactPaths::in_dir(dir);
        for path in [&paths.index, &paths.texts, &paths.metadatas] {
            if !path.is_file() {
                return Err(Error::NotFound {
                    kind: "index artifact",
                    name: path.display().to_string(),
                });
            }
        }

        let (index, model_id) = FlatIndex::read(&paths.index)?;
        let texts: Vec<String> =
            serde_json::from_slice(&std::fs::read(&paths.texts)?)?;
        let metadatas: Vec<RecordMetadata> =
            serde_json::from_slice(&std::fs::read(&paths.metadatas)?)?;

        let store = Self::checked(index, texts, metadatas, model_id)?;
        tracing::info!(
            verses = store.len(),
            model = %store.model_id,
            dir = %dir.display(),
            "index loaded"
        );
        Ok(store)
    }

    fn checked(
        index: FlatIndex,
        texts: Vec<String>,
        metadatas: Vec<RecordMetadata>,
        model_id: String,
    ) -> Result<Self> {
        if index.len() != texts.len() || texts.len() != metadatas.len() {
            return Err(Error::IndexMismatch(format!(
                "{} vectors, {} texts, {} metadata entries",
                index.len(),
                texts.len(),
                metadatas.len()
            )));
        }
        Ok(Self {
            index,
            texts,
            metadatas,
            model_id,
        })
    }

    /// Write the three artifacts into `dir`, replacing any previous build.
    pub fn save(&self, dir: &Path) -> Result<ArtifactPaths> {
        std::fs::create_dir_all(dir).map_err(|_| Error::DataDir(dir.to_path_buf()))?;
        let paths = ArtifactPaths::in_dir(dir);

        write_atomic(&paths.texts, &serde_json::to_vec_pretty(&self.texts)?)?;
        write_atomic(
            &paths.metadatas,
            &serde_json::to_vec_pretty(&self.metadatas)?,
        )?;
        self.index.write(&paths.index, &self.model_id)?;

        Ok(paths)
    }

    /// Refuse to search with a different encoder than the one that built
    /// the index; distances across embedding spaces are meaningless.
    pub fn check_embedder(&self, embedder: &dyn Embedder) -> Result<()> {
        if embedder.model_id() != self.model_id {
            return Err(Error::IndexMismatch(format!(
                "index was built with '{}' but the loaded embedding model is '{}'; rebuild the index",
                self.model_id,
                embedder.model_id()
            )));
        }
        if embedder.dimension() != self.index.dimension() {
            return Err(Error::IndexMismatch(format!(
                "index vectors have {} dimensions, embedder produces {}",
                self.index.dimension(),
                embedder.dimension()
            )));
        }
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.index.search(query, k)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn text(&self, position: usize) -> Option<&str> {
        self.texts.get(position).map(String::as_str)
    }

    pub fn metadata(&self, position: usize) -> Option<&RecordMetadata> {
        self.metadatas.get(position)
    }
}
