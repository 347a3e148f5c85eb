use std::path::Path;

use kdam::{BarExt, tqdm};
use serde::Serialize;

use crate::{
    corpus::Record,
    embedding::Embedder,
    error::{Error, Result},
    persona::Mentor,
    retriever::Retriever,
    store::{ArtifactPaths, IndexStore},
};

pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Queries run against a fresh index to confirm each partition answers.
pub const SMOKE_QUERIES: [(&str, Mentor); 3] = [
    ("How do I find inner peace and calm my mind?", Mentor::Buddha),
    ("What is my duty and purpose in life?", Mentor::Krishna),
    ("How should I love and forgive others?", Mentor::Jesus),
];

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub batch_size: usize,
    pub show_progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }
}

/// Encode every record and assemble an in-memory [`IndexStore`].
///
/// Batch size only affects throughput; the resulting vectors are the same.
pub fn build_index(
    records: &[Record],
    embedder: &dyn Embedder,
    options: &BuildOptions,
) -> Result<IndexStore> {
    if records.is_empty() {
        return Err(Error::Config("no records to index".into()));
    }
    if options.batch_size == 0 {
        return Err(Error::Config("batch size must be at least 1".into()));
    }

    let mut progress = options
        .show_progress
        .then(|| tqdm!(total = records.len(), desc = "Embedding"));

    let mut vectors = Vec::with_capacity(records.len());
    for batch in records.chunks(options.batch_size) {
        let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
        let embedded = embedder.embed_batch(&texts)?;
        if embedded.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "encoder returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);

        if let Some(pb) = progress.as_mut() {
            pb.update(batch.len())?;
        }
    }

    if let Some(pb) = progress.as_mut() {
        pb.refresh()?;
        eprintln!();
    }

    tracing::info!(
        vectors = vectors.len(),
        dimension = embedder.dimension(),
        model = embedder.model_id(),
        "embeddings computed"
    );

    IndexStore::from_parts(
        records,
        vectors,
        embedder.dimension(),
        embedder.model_id(),
    )
}

/// What a finished build wrote, plus the smoke query answers.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub artifacts: ArtifactPaths,
    pub vectors: usize,
    pub dimension: usize,
    pub model_id: String,
    pub smoke: Vec<SmokeResult>,
}

/// [`build_index`], then write the artifacts into `out_dir` and run the
/// smoke queries against the new index.
pub fn build_and_save(
    records: &[Record],
    embedder: &dyn Embedder,
    out_dir: &Path,
    options: &BuildOptions,
) -> Result<BuildReport> {
    let store = build_index(records, embedder, options)?;
    let artifacts = store.save(out_dir)?;
    tracing::info!(dir = %out_dir.display(), "index artifacts written");

    let smoke = run_smoke_queries(&store, embedder)?;
    Ok(BuildReport {
        artifacts,
        vectors: store.len(),
        dimension: store.dimension(),
        model_id: store.model_id().to_string(),
        smoke,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeResult {
    pub query: &'static str,
    pub mentor: Mentor,
    pub top_reference: Option<String>,
    pub similarity: Option<f32>,
}

/// Run [`SMOKE_QUERIES`] without glosses and report each top match.
pub fn run_smoke_queries(
    store: &IndexStore,
    embedder: &dyn Embedder,
) -> Result<Vec<SmokeResult>> {
    let retriever = Retriever::new(store, embedder);
    SMOKE_QUERIES
        .iter()
        .map(|&(query, mentor)| {
            let top = retriever.retrieve(query, mentor, 1)?.into_iter().next();
            Ok(SmokeResult {
                query,
                mentor,
                top_reference: top.as_ref().map(|h| h.reference.clone()),
                similarity: top.map(|h| h.similarity),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{corpus::RecordMetadata, embedding::HashEmbedder};

    fn records() -> Vec<Record> {
        let rows = [
            ("Perform your duty without attachment to results", Mentor::Krishna, "2.47"),
            ("The mind is restless and hard to restrain", Mentor::Krishna, "6.34"),
            ("Peace comes from within, calm the mind", Mentor::Buddha, "Verse 96"),
            ("Hatred is never appeased by hatred", Mentor::Buddha, "Verse 5"),
            ("Love your enemies and forgive them", Mentor::Jesus, "Matthew 5:44"),
        ];
        rows.iter()
            .map(|(text, mentor, reference)| Record {
                text: text.to_string(),
                metadata: RecordMetadata {
                    mentor: *mentor,
                    source: "Test".into(),
                    reference: reference.to_string(),
                    chapter: 0,
                    verse: 0,
                    book: None,
                },
            })
            .collect()
    }

    #[test]
    fn builds_one_vector_per_record() {
        let embedder = HashEmbedder::default();
        let store =
            build_index(&records(), &embedder, &BuildOptions::default()).unwrap();

        assert_eq!(store.len(), 5);
        assert_eq!(store.dimension(), embedder.dimension());
        assert_eq!(store.model_id(), embedder.model_id());
    }

    #[test]
    fn batch_size_does_not_change_vectors() {
        let embedder = HashEmbedder::default();
        let tmp = tempfile::tempdir().unwrap();

        let small = BuildOptions {
            batch_size: 2,
            show_progress: false,
        };
        build_index(&records(), &embedder, &small)
            .unwrap()
            .save(&tmp.path().join("a"))
            .unwrap();
        build_index(&records(), &embedder, &BuildOptions::default())
            .unwrap()
            .save(&tmp.path().join("b"))
            .unwrap();

        let a = std::fs::read(tmp.path().join("a/index.bin")).unwrap();
        let b = std::fs::read(tmp.path().join("b/index.bin")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rebuild_overwrites_artifacts() {
        let embedder = HashEmbedder::default();
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("index");

        let first =
            build_and_save(&records(), &embedder, &out, &BuildOptions::default())
                .unwrap();
        let bytes = std::fs::read(&first.artifacts.index).unwrap();
        let second =
            build_and_save(&records(), &embedder, &out, &BuildOptions::default())
                .unwrap();

        assert!(second.artifacts.all_exist());
        assert_eq!(second.vectors, 5);
        assert_eq!(second.smoke.len(), SMOKE_QUERIES.len());
        assert_eq!(std::fs::read(&second.artifacts.index).unwrap(), bytes);
        assert_eq!(IndexStore::open(&out).unwrap().len(), 5);
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let embedder = HashEmbedder::default();
        assert!(build_index(&[], &embedder, &BuildOptions::default()).is_err());
    }

    #[test]
    fn smoke_queries_hit_their_partition() {
        let embedder = HashEmbedder::default();
        let store =
            build_index(&records(), &embedder, &BuildOptions::default()).unwrap();
        let results = run_smoke_queries(&store, &embedder).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].top_reference.as_deref(), Some("Verse 96"));
        assert_eq!(results[2].top_reference.as_deref(), Some("Matthew 5:44"));
        for result in &results {
            let similarity = result.similarity.unwrap();
            assert!(similarity > 0.0 && similarity <= 1.0);
        }
    }
}
