use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};

use super::prompt;
use crate::completion::CompletionClient;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::index::SimilarityIndex;
use crate::processing::QaError;

/// Retrieval-augmented answering over a built index.
#[derive(Clone)]
pub struct QaPipeline {
    embedding: Arc<dyn EmbeddingClient>,
    completion: Arc<dyn CompletionClient>,
    top_k: usize,
    concurrency: usize,
}

impl QaPipeline {
    /// Create a pipeline retrieving `top_k` chunks per question with at most `concurrency`
    /// questions in flight.
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        completion: Arc<dyn CompletionClient>,
        top_k: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            embedding,
            completion,
            top_k: top_k.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Answer a single question: embed, retrieve, prompt, complete.
    pub async fn answer(
        &self,
        question: &str,
        index: &SimilarityIndex,
    ) -> Result<String, QaError> {
        let query = self
            .embedding
            .generate_embeddings(vec![question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EmbeddingClientError::GenerationFailed("no embedding returned for question".into())
            })?;

        let hits = index.search(&query, self.top_k)?;
        let context = hits
            .iter()
            .map(|hit| hit.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        tracing::debug!(
            retrieved = hits.len(),
            pages = ?hits.iter().map(|hit| hit.chunk.page).collect::<Vec<_>>(),
            "Retrieved context"
        );

        let answer = self
            .completion
            .complete(prompt::render(&context, question))
            .await?;
        Ok(answer)
    }

    /// Answer every question, returning answers in question order.
    ///
    /// The first failure aborts the batch.
    pub async fn answer_all(
        &self,
        questions: &[String],
        index: &SimilarityIndex,
    ) -> Result<Vec<String>, QaError> {
        let pending: Vec<_> = questions
            .iter()
            .map(|question| self.answer(question, index))
            .collect();
        stream::iter(pending)
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionClientError;
    use crate::processing::Chunk;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use tokio::sync::Mutex;

    /// Maps known phrases onto fixed axes so retrieval is predictable.
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingClient for KeywordEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts
                .iter()
                .map(|text| {
                    let text = text.to_lowercase();
                    vec![
                        f32::from(u8::from(text.contains("warranty"))),
                        f32::from(u8::from(text.contains("claim"))),
                    ]
                })
                .collect())
        }

        fn model(&self) -> &str {
            "keyword"
        }
    }

    #[derive(Default)]
    struct RecordingCompletion {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionClient for RecordingCompletion {
        async fn complete(&self, prompt: String) -> Result<String, CompletionClientError> {
            if self.fail {
                return Err(CompletionClientError::UnexpectedStatus {
                    status: StatusCode::BAD_GATEWAY,
                    body: "down".into(),
                });
            }
            let question = prompt
                .rsplit_once("QUESTION:\n")
                .map(|(_, rest)| rest.lines().next().unwrap_or_default().to_string())
                .unwrap_or_default();
            self.prompts.lock().await.push(prompt);
            Ok(format!("answer to {question}"))
        }

        fn model(&self) -> &str {
            "recording"
        }
    }

    fn index() -> SimilarityIndex {
        let texts = ["The warranty period is 24 months.", "A claim must be filed in 30 days."];
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(ordinal, text)| Chunk {
                text: text.to_string(),
                page: ordinal as u32,
                source: "policy.pdf".into(),
                ordinal,
            })
            .collect();
        SimilarityIndex::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]], chunks).expect("index")
    }

    #[tokio::test]
    async fn retrieves_nearest_chunk_into_prompt() {
        let completion = Arc::new(RecordingCompletion::default());
        let pipeline = QaPipeline::new(Arc::new(KeywordEmbedder), completion.clone(), 1, 2);

        let answer = pipeline
            .answer("How long is the warranty?", &index())
            .await
            .expect("answer");

        assert_eq!(answer, "answer to How long is the warranty?");
        let prompts = completion.prompts.lock().await;
        assert!(prompts[0].contains("The warranty period is 24 months."));
        assert!(!prompts[0].contains("30 days"));
    }

    #[tokio::test]
    async fn joins_context_with_blank_lines() {
        let completion = Arc::new(RecordingCompletion::default());
        let pipeline = QaPipeline::new(Arc::new(KeywordEmbedder), completion.clone(), 4, 1);

        pipeline
            .answer("warranty claim", &index())
            .await
            .expect("answer");

        let prompts = completion.prompts.lock().await;
        assert!(prompts[0].contains("24 months.\n\nA claim must be filed in 30 days."));
    }

    #[tokio::test]
    async fn answers_keep_question_order() {
        let completion = Arc::new(RecordingCompletion::default());
        let pipeline = QaPipeline::new(Arc::new(KeywordEmbedder), completion, 1, 3);
        let questions: Vec<String> = (0..6).map(|i| format!("claim question {i}")).collect();

        let answers = pipeline.answer_all(&questions, &index()).await.expect("answers");

        let expected: Vec<String> = questions.iter().map(|q| format!("answer to {q}")).collect();
        assert_eq!(answers, expected);
    }

    #[tokio::test]
    async fn batch_runs_on_a_spawned_task() {
        let completion = Arc::new(RecordingCompletion::default());
        let pipeline = QaPipeline::new(Arc::new(KeywordEmbedder), completion, 1, 2);
        let questions = vec!["warranty?".to_string(), "claim?".to_string()];
        let index = index();

        let answers = tokio::spawn(async move { pipeline.answer_all(&questions, &index).await })
            .await
            .expect("join")
            .expect("answers");

        assert_eq!(answers, vec!["answer to warranty?", "answer to claim?"]);
    }

    #[tokio::test]
    async fn completion_failure_aborts_batch() {
        let completion = Arc::new(RecordingCompletion {
            fail: true,
            ..Default::default()
        });
        let pipeline = QaPipeline::new(Arc::new(KeywordEmbedder), completion, 4, 2);

        let error = pipeline
            .answer_all(&["warranty?".to_string()], &index())
            .await
            .expect_err("should fail");
        assert!(matches!(error, QaError::Completion(_)));
    }
}
