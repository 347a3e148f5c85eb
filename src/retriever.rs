use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    embedding::Embedder,
    error::Result,
    generation::Generator,
    persona::Mentor,
    prompts,
    store::IndexStore,
};

/// Candidates pulled from the whole index before filtering by mentor.
pub const SEARCH_K: usize = 50;

/// Verses per mentor turn.
pub const DEFAULT_K: usize = 3;

/// A verse returned for a query, scored and optionally explained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalHit {
    pub text: String,
    pub reference: String,
    pub source_name: String,
    /// `1 / (1 + d)` for squared L2 distance `d`, in `(0, 1]`.
    pub similarity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gloss: Option<String>,
}

pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Searches one mentor's partition of the index.
///
/// Without a generator, hits carry no gloss.
pub struct Retriever<'a> {
    store: &'a IndexStore,
    embedder: &'a dyn Embedder,
    glosser: Option<&'a Generator>,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a IndexStore, embedder: &'a dyn Embedder) -> Self {
        Self {
            store,
            embedder,
            glosser: None,
        }
    }

    pub fn with_glosses(mut self, generator: &'a Generator) -> Self {
        self.glosser = Some(generator);
        self
    }

    /// Up to `k` verses from `mentor`'s scripture, most similar first.
    ///
    /// The search looks at the [`SEARCH_K`] nearest verses overall, so a
    /// mentor whose verses are all far away can come back short or empty.
    pub fn retrieve(
        &self,
        query: &str,
        mentor: Mentor,
        k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let vector = self.embedder.embed_query(query)?;
        let neighbors = self.store.search(&vector, SEARCH_K.min(self.store.len()))?;

        let mut hits = Vec::with_capacity(k.min(neighbors.len()));
        for neighbor in neighbors {
            if hits.len() == k {
                break;
            }
            let (Some(meta), Some(text)) = (
                self.store.metadata(neighbor.position),
                self.store.text(neighbor.position),
            ) else {
                continue;
            };
            if meta.mentor != mentor {
                continue;
            }

            let gloss = self
                .glosser
                .and_then(|g| gloss(g, mentor, query, &meta.reference, text));

            hits.push(RetrievalHit {
                text: text.to_string(),
                reference: meta.reference.clone(),
                source_name: meta.source.clone(),
                similarity: similarity_from_distance(neighbor.distance),
                gloss,
            });
        }

        if hits.len() < k {
            tracing::warn!(
                mentor = %mentor,
                found = hits.len(),
                wanted = k,
                "fewer verses than requested"
            );
        }
        Ok(hits)
    }
}

/// One-sentence explanation of a verse in light of the question. Any
/// failure, or an empty answer, yields `None`.
fn gloss(
    generator: &Generator,
    mentor: Mentor,
    question: &str,
    reference: &str,
    text: &str,
) -> Option<String> {
    let prompt = prompts::gloss_prompt(mentor, question, reference, text);
    match generator.try_generate(
        prompts::GLOSS_SYSTEM_PROMPT,
        &prompt,
        prompts::GLOSS_MAX_TOKENS,
    ) {
        Ok(gloss) if !gloss.is_empty() => Some(gloss),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(reference, error = %e, "gloss generation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        corpus::{Record, RecordMetadata},
        embedding::HashEmbedder,
        generation::{CompletionRequest, GenerationError},
    };

    const WORDS: &[&str] = &[
        "peace", "mind", "duty", "love", "forgive", "anger", "calm", "action",
        "faith", "desire", "truth", "fear",
    ];

    fn record(text: &str, mentor: Mentor, reference: &str) -> Record {
        Record {
            text: text.to_string(),
            metadata: RecordMetadata {
                mentor,
                source: format!("{mentor} source"),
                reference: reference.to_string(),
                chapter: 0,
                verse: 0,
                book: None,
            },
        }
    }

    fn store_of(records: &[Record], embedder: &HashEmbedder) -> IndexStore {
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).unwrap();
        IndexStore::from_parts(
            records,
            vectors,
            embedder.dimension(),
            embedder.model_id(),
        )
        .unwrap()
    }

    fn sample() -> Vec<Record> {
        vec![
            record("calm the restless mind", Mentor::Buddha, "Verse 1"),
            record("the mind is calm in peace", Mentor::Buddha, "Verse 2"),
            record("do your duty without desire", Mentor::Krishna, "2.47"),
            record("love your neighbour", Mentor::Jesus, "Mark 12:31"),
        ]
    }

    #[test]
    fn filters_to_requested_mentor() {
        let embedder = HashEmbedder::default();
        let store = store_of(&sample(), &embedder);
        let hits = Retriever::new(&store, &embedder)
            .retrieve("calm mind", Mentor::Buddha, 3)
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.source_name == "Buddha source"));
        assert!(hits.iter().all(|h| h.gloss.is_none()));
    }

    #[test]
    fn mentor_without_verses_gets_empty_list() {
        let embedder = HashEmbedder::default();
        let records = vec![record("calm mind", Mentor::Buddha, "Verse 1")];
        let store = store_of(&records, &embedder);

        let hits = Retriever::new(&store, &embedder)
            .retrieve("calm mind", Mentor::Jesus, 3)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn exact_match_has_similarity_one() {
        let embedder = HashEmbedder::default();
        let store = store_of(&sample(), &embedder);
        let hits = Retriever::new(&store, &embedder)
            .retrieve("love your neighbour", Mentor::Jesus, 1)
            .unwrap();

        assert_eq!(hits[0].reference, "Mark 12:31");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn glosses_come_from_generator() {
        let embedder = HashEmbedder::default();
        let store = store_of(&sample(), &embedder);
        let generator = Generator::new(Arc::new(|req: &CompletionRequest| {
            assert_eq!(req.system, prompts::GLOSS_SYSTEM_PROMPT);
            assert_eq!(req.max_tokens, prompts::GLOSS_MAX_TOKENS);
            Ok("Duty done without craving frees the heart.".to_string())
        }));

        let hits = Retriever::new(&store, &embedder)
            .with_glosses(&generator)
            .retrieve("duty", Mentor::Krishna, 1)
            .unwrap();
        assert_eq!(
            hits[0].gloss.as_deref(),
            Some("Duty done without craving frees the heart.")
        );
    }

    #[test]
    fn gloss_failures_are_swallowed() {
        let embedder = HashEmbedder::default();
        let store = store_of(&sample(), &embedder);
        let generator = Generator::new(Arc::new(|_: &CompletionRequest| {
            Err(GenerationError::MissingApiKey)
        }));

        let hits = Retriever::new(&store, &embedder)
            .with_glosses(&generator)
            .retrieve("duty", Mentor::Krishna, 1)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].gloss.is_none());
    }

    #[test]
    fn huge_k_returns_existing_hits() {
        let embedder = HashEmbedder::default();
        let records = vec![record("calm the restless mind", Mentor::Buddha, "Verse 1")];
        let store = store_of(&records, &embedder);

        let hits = Retriever::new(&store, &embedder)
            .retrieve("calm", Mentor::Buddha, usize::MAX)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "Verse 1");
    }

    #[test]
    fn partition_beyond_search_window_comes_back_empty() {
        let embedder = HashEmbedder::default();
        let mut records: Vec<Record> = (0..60)
            .map(|i| {
                record(
                    &format!("peace mind calm verse{i}"),
                    Mentor::Krishna,
                    &format!("2.{i}"),
                )
            })
            .collect();
        records.push(record("bread fishes boat", Mentor::Jesus, "John 6:9"));
        let store = store_of(&records, &embedder);
        assert!(store.len() > SEARCH_K);

        let retriever = Retriever::new(&store, &embedder);
        let jesus = retriever
            .retrieve("peace mind calm", Mentor::Jesus, 3)
            .unwrap();
        assert!(jesus.is_empty());

        let krishna = retriever
            .retrieve("peace mind calm", Mentor::Krishna, 3)
            .unwrap();
        assert_eq!(krishna.len(), 3);
        assert!(krishna.iter().all(|h| h.source_name == "Krishna source"));
        for pair in krishna.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn similarity_is_bounded() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert!(similarity_from_distance(3.0) > 0.0);
        assert!(similarity_from_distance(3.0) < similarity_from_distance(1.0));
    }

    fn arb_records() -> impl Strategy<Value = Vec<Record>> {
        let mentor = prop_oneof![
            Just(Mentor::Krishna),
            Just(Mentor::Buddha),
            Just(Mentor::Jesus),
        ];
        let text = proptest::collection::vec(proptest::sample::select(WORDS), 1..6)
            .prop_map(|words| words.join(" "));
        proptest::collection::vec((text, mentor), 1..40).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (text, mentor))| record(&text, mentor, &format!("ref {i}")))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn hits_are_filtered_bounded_and_sorted(
            records in arb_records(),
            query in proptest::collection::vec(proptest::sample::select(WORDS), 1..4),
            k in 0usize..6,
            mentor_idx in 0usize..3,
        ) {
            let mentor = Mentor::ALL[mentor_idx];
            let embedder = HashEmbedder::new(64);
            let store = store_of(&records, &embedder);
            let hits = Retriever::new(&store, &embedder)
                .retrieve(&query.join(" "), mentor, k)
                .unwrap();

            prop_assert!(hits.len() <= k);
            let expected_source = format!("{mentor} source");
            for hit in &hits {
                prop_assert_eq!(&hit.source_name, &expected_source);
                prop_assert!(hit.similarity > 0.0 && hit.similarity <= 1.0);
            }
            for pair in hits.windows(2) {
                prop_assert!(pair[0].similarity >= pair[1].similarity);
            }
        }
    }
}
