use futures_util::stream::{self, StreamExt, TryStreamExt};

use super::IndexError;
use crate::embedding::EmbeddingClient;
use crate::processing::Chunk;

/// A retrieved chunk and its squared Euclidean distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// Chunk text and metadata.
    pub chunk: Chunk,
    /// Squared L2 distance; smaller is closer.
    pub distance: f32,
}

/// Flat exact-search index pairing each chunk with its embedding.
///
/// Immutable once built; search scans every vector.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    pub(super) dimension: usize,
    pub(super) vectors: Vec<Vec<f32>>,
    pub(super) chunks: Vec<Chunk>,
}

impl SimilarityIndex {
    /// Pair vectors with chunks, checking that counts and dimensions agree.
    pub fn new(vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Result<Self, IndexError> {
        if vectors.len() != chunks.len() {
            return Err(IndexError::CountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }
        let dimension = vectors.first().map_or(0, Vec::len);
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        Ok(Self {
            dimension,
            vectors,
            chunks,
        })
    }

    /// Embed `chunks` in batches and build an index over them.
    ///
    /// At most `concurrency` batches are in flight at once; vectors keep chunk order. Returns
    /// `Ok(None)` when there is nothing to embed.
    pub async fn from_chunks(
        chunks: Vec<Chunk>,
        client: &dyn EmbeddingClient,
        batch_size: usize,
        concurrency: usize,
    ) -> Result<Option<Self>, IndexError> {
        if chunks.is_empty() {
            tracing::warn!("No chunks to embed");
            return Ok(None);
        }

        let batches: Vec<Vec<String>> = chunks
            .chunks(batch_size.max(1))
            .map(|batch| batch.iter().map(|chunk| chunk.text.clone()).collect())
            .collect();
        let batch_count = batches.len();

        let embedded: Vec<Vec<Vec<f32>>> = stream::iter(
            batches
                .into_iter()
                .map(|texts| client.generate_embeddings(texts)),
        )
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;
        let vectors: Vec<Vec<f32>> = embedded.into_iter().flatten().collect();

        let index = Self::new(vectors, chunks)?;
        tracing::info!(
            chunks = index.len(),
            batches = batch_count,
            dimension = index.dimension,
            model = client.model(),
            "Built similarity index"
        );
        Ok(Some(index))
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Vector dimension shared by every entry.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Indexed chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Return the `k` chunks closest to `query`, nearest first.
    ///
    /// Ties keep insertion order. Asking for more than the index holds returns everything.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, squared_distance(query, vector)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, distance)| ScoredChunk {
                chunk: self.chunks[position].clone(),
                distance,
            })
            .collect())
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClientError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    fn chunk(text: &str, ordinal: usize) -> Chunk {
        Chunk {
            text: text.to_string(),
            page: 0,
            source: "doc.pdf".into(),
            ordinal,
        }
    }

    /// Embeds each text as `[len, first byte]` and records batch sizes.
    #[derive(Default)]
    struct RecordingEmbedder {
        batches: Mutex<Vec<usize>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for RecordingEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.batches.lock().await.push(texts.len());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|text| vec![text.len() as f32, f32::from(text.as_bytes()[0])])
                .collect())
        }

        fn model(&self) -> &str {
            "recording"
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingClient for FailingEmbedder {
        async fn generate_embeddings(
            &self,
            _texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Err(EmbeddingClientError::GenerationFailed("boom".into()))
        }

        fn model(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn search_orders_by_distance_and_truncates() {
        let index = SimilarityIndex::new(
            vec![vec![0.0, 0.0], vec![3.0, 4.0], vec![1.0, 0.0]],
            vec![chunk("origin", 0), chunk("far", 1), chunk("near", 2)],
        )
        .expect("index");

        let hits = index.search(&[0.9, 0.0], 2).expect("search");
        let texts: Vec<&str> = hits.iter().map(|hit| hit.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["near", "origin"]);
        assert!((hits[0].distance - 0.01).abs() < 1e-6);
    }

    #[test]
    fn search_keeps_insertion_order_for_ties() {
        let index = SimilarityIndex::new(
            vec![vec![1.0], vec![-1.0], vec![1.0]],
            vec![chunk("a", 0), chunk("b", 1), chunk("c", 2)],
        )
        .expect("index");

        let hits = index.search(&[0.0], 10).expect("search");
        let texts: Vec<&str> = hits.iter().map(|hit| hit.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let index = SimilarityIndex::new(vec![vec![1.0, 2.0]], vec![chunk("a", 0)]).expect("index");
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn new_rejects_count_mismatch() {
        assert!(matches!(
            SimilarityIndex::new(vec![vec![1.0]], vec![chunk("a", 0), chunk("b", 1)]),
            Err(IndexError::CountMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn from_chunks_batches_and_preserves_order() {
        let embedder = RecordingEmbedder::default();
        let chunks: Vec<Chunk> = ["alpha", "be", "gamma!", "d", "epsilon"]
            .iter()
            .enumerate()
            .map(|(i, text)| chunk(text, i))
            .collect();

        let index = SimilarityIndex::from_chunks(chunks.clone(), &embedder, 2, 2)
            .await
            .expect("build")
            .expect("non-empty");

        assert_eq!(index.len(), 5);
        assert_eq!(index.chunks(), chunks.as_slice());
        assert_eq!(index.vectors[2], vec![6.0, f32::from(b'g')]);
        let mut batches = embedder.batches.lock().await.clone();
        batches.sort_unstable();
        assert_eq!(batches, vec![1, 2, 2]);
        assert!(embedder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn from_chunks_returns_none_for_empty_input() {
        let index = SimilarityIndex::from_chunks(Vec::new(), &FailingEmbedder, 8, 1)
            .await
            .expect("empty is not an error");
        assert!(index.is_none());
    }

    #[tokio::test]
    async fn from_chunks_propagates_embedding_failure() {
        let error = SimilarityIndex::from_chunks(vec![chunk("a", 0)], &FailingEmbedder, 8, 1)
            .await
            .expect_err("should fail");
        assert!(matches!(error, IndexError::Embedding(_)));
    }
}
