use std::{path::Path, sync::Arc};

use crate::{
    embedding::Embedder,
    error::Result,
    generation::Generator,
    retriever::Retriever,
    store::IndexStore,
};

/// Everything a dialogue needs, loaded once and shared read-only.
///
/// Cheap to clone; wrap in an `Arc` to share across threads.
#[derive(Clone)]
pub struct DialogueContext {
    store: Arc<IndexStore>,
    embedder: Arc<dyn Embedder>,
    generator: Generator,
    glosses: bool,
}

impl DialogueContext {
    /// Pair a loaded index with an embedder, refusing mismatched models.
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<dyn Embedder>,
        generator: Generator,
    ) -> Result<Self> {
        store.check_embedder(embedder.as_ref())?;
        Ok(Self {
            store,
            embedder,
            generator,
            glosses: true,
        })
    }

    /// Load the index artifacts from `index_dir`.
    pub fn open(
        index_dir: &Path,
        embedder: Arc<dyn Embedder>,
        generator: Generator,
    ) -> Result<Self> {
        let store = IndexStore::open(index_dir)?;
        Self::new(Arc::new(store), embedder, generator)
    }

    /// Turn verse glosses on or off for dialogue and follow-up retrieval.
    pub fn with_glosses(mut self, glosses: bool) -> Self {
        self.glosses = glosses;
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Retriever used by dialogue turns, glossing when enabled.
    pub fn retriever(&self) -> Retriever<'_> {
        let retriever = self.plain_retriever();
        if self.glosses {
            retriever.with_glosses(&self.generator)
        } else {
            retriever
        }
    }

    /// Retriever that never calls the generator.
    pub fn plain_retriever(&self) -> Retriever<'_> {
        Retriever::new(&self.store, self.embedder.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::{Record, RecordMetadata},
        embedding::HashEmbedder,
        error::Error,
        generation::CompletionRequest,
        persona::Mentor,
    };

    fn store() -> IndexStore {
        let embedder = HashEmbedder::new(32);
        let records = vec![Record {
            text: "love one another".into(),
            metadata: RecordMetadata {
                mentor: Mentor::Jesus,
                source: "Gospel of John".into(),
                reference: "John 13:34".into(),
                chapter: 13,
                verse: 34,
                book: Some("John".into()),
            },
        }];
        let vectors = embedder.embed_batch(&[records[0].text.clone()]).unwrap();
        IndexStore::from_parts(&records, vectors, 32, embedder.model_id()).unwrap()
    }

    fn generator() -> Generator {
        Generator::new(Arc::new(|_: &CompletionRequest| Ok("gloss".to_string())))
    }

    #[test]
    fn rejects_mismatched_embedder() {
        let result = DialogueContext::new(
            Arc::new(store()),
            Arc::new(HashEmbedder::new(64)),
            generator(),
        );
        assert!(matches!(result, Err(Error::IndexMismatch(_))));
    }

    #[test]
    fn gloss_toggle_controls_retriever() {
        let ctx = DialogueContext::new(
            Arc::new(store()),
            Arc::new(HashEmbedder::new(32)),
            generator(),
        )
        .unwrap();

        let glossed = ctx.retriever().retrieve("love", Mentor::Jesus, 1).unwrap();
        assert_eq!(glossed[0].gloss.as_deref(), Some("gloss"));

        let ctx = ctx.with_glosses(false);
        let plain = ctx.retriever().retrieve("love", Mentor::Jesus, 1).unwrap();
        assert!(plain[0].gloss.is_none());
    }
}
