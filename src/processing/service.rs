//! Query service coordinating download, conversion, chunking, indexing, and answering.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    completion::{CompletionClient, build_completion_client},
    config::Config,
    embedding::{EmbeddingClient, OpenAiEmbeddingClient},
    index::SimilarityIndex,
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        chunking::RecursiveSplitter,
        convert, extract,
        source::{DocumentSource, Downloader},
        types::PipelineError,
    },
    qa::QaPipeline,
};

/// Abstraction over the answering pipeline used by the HTTP surface.
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Answer `questions` against the document at `source`, preserving question order.
    async fn answer(
        &self,
        source: DocumentSource,
        questions: Vec<String>,
    ) -> Result<Vec<String>, PipelineError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Request lifecycle stages, logged as each one starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Downloading, converting, and reading the document.
    Extracting,
    /// Splitting page text into chunks.
    Chunking,
    /// Embedding chunks into a similarity index.
    Embedding,
    /// Persisting the index.
    Indexing,
    /// Running retrieval and completion per question.
    Answering,
    /// Returning answers to the caller.
    Responding,
    /// Request ended with an error.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexing => "indexing",
            Self::Answering => "answering",
            Self::Responding => "responding",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Runs the document QA pipeline for one request at a time; share it through an `Arc`.
///
/// Every request gets its own temporary workspace, removed when the request finishes, and its
/// own in-memory index. Nothing but counters is shared between requests.
pub struct QueryService {
    config: Arc<Config>,
    downloader: Downloader,
    splitter: RecursiveSplitter,
    embedding: Arc<dyn EmbeddingClient>,
    qa: QaPipeline,
    metrics: Arc<PipelineMetrics>,
}

impl QueryService {
    /// Build the service with the OpenAI embedding client and the configured completion client.
    pub fn new(config: Arc<Config>) -> Result<Self, PipelineError> {
        let embedding = OpenAiEmbeddingClient::new(&config)
            .map_err(|error| PipelineError::ClientSetup(error.to_string()))?;
        let completion = build_completion_client(&config)
            .map_err(|error| PipelineError::ClientSetup(error.to_string()))?;
        tracing::info!(
            embedding_model = %config.embedding_model_name,
            completion_model = %completion.model(),
            provider = ?config.qa_provider,
            "Upstream clients initialized"
        );
        Self::with_clients(config, Arc::new(embedding), Arc::new(completion))
    }

    /// Build the service around caller-supplied upstream clients.
    pub fn with_clients(
        config: Arc<Config>,
        embedding: Arc<dyn EmbeddingClient>,
        completion: Arc<dyn CompletionClient>,
    ) -> Result<Self, PipelineError> {
        let downloader = Downloader::new(config.download_timeout)
            .map_err(|error| PipelineError::ClientSetup(error.to_string()))?;
        let splitter = RecursiveSplitter::new(config.chunk_size, config.chunk_overlap)?;
        let qa = QaPipeline::new(
            embedding.clone(),
            completion,
            config.retrieval_top_k,
            config.qa_concurrency,
        );
        Ok(Self {
            config,
            downloader,
            splitter,
            embedding,
            qa,
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    /// Answer `questions` against an index previously written under `dir`.
    pub async fn answer_from_index(
        &self,
        dir: PathBuf,
        questions: Vec<String>,
    ) -> Result<Vec<String>, PipelineError> {
        validate_questions(&questions)?;
        let model = self.embedding.model().to_string();
        let index = run_blocking(move || Ok(SimilarityIndex::load(&dir, &model)?)).await?;
        Ok(self.qa.answer_all(&questions, &index).await?)
    }

    async fn run(
        &self,
        request_id: Uuid,
        source: DocumentSource,
        questions: &[String],
    ) -> Result<Vec<String>, PipelineError> {
        validate_questions(questions)?;
        let workspace = tempfile::Builder::new()
            .prefix("docqa-")
            .tempdir()
            .map_err(PipelineError::Workspace)?;

        log_stage(request_id, Stage::Extracting);
        let input = match source {
            DocumentSource::Remote(url) => self.downloader.fetch(&url, workspace.path()).await?,
            DocumentSource::Local(path) => path,
        };
        let workspace_path = workspace.path().to_path_buf();
        let records = run_blocking(move || {
            let pdf = convert::normalize(&input, &workspace_path)?;
            Ok(extract::extract_pages(&pdf)?)
        })
        .await?;

        log_stage(request_id, Stage::Chunking);
        let chunks = self.splitter.split_records(&records);
        tracing::info!(
            %request_id,
            pages = records.len(),
            chunks = chunks.len(),
            chunk_size = self.config.chunk_size,
            overlap = self.config.chunk_overlap,
            "Document chunked"
        );

        log_stage(request_id, Stage::Embedding);
        let index = SimilarityIndex::from_chunks(
            chunks,
            self.embedding.as_ref(),
            self.config.embedding_batch_size,
            self.config.embedding_concurrency,
        )
        .await?
        .ok_or(PipelineError::EmptyDocument)?;
        let index = Arc::new(index);
        self.metrics.record_document(index.len() as u64);

        if self.config.index_persist {
            log_stage(request_id, Stage::Indexing);
            self.persist(request_id, index.clone()).await;
        }

        log_stage(request_id, Stage::Answering);
        let answers = self.qa.answer_all(questions, &index).await?;

        log_stage(request_id, Stage::Responding);
        Ok(answers)
    }

    /// Write the index under `INDEX_DIR/<request id>`; failures are logged, not returned.
    async fn persist(&self, request_id: Uuid, index: Arc<SimilarityIndex>) {
        let dir = self.index_path(request_id);
        let model = self.embedding.model().to_string();
        let result = run_blocking(move || Ok(index.save(&dir, &model)?)).await;
        if let Err(error) = result {
            tracing::warn!(%request_id, error = %error, "Failed to persist index");
        }
    }

    /// Directory an index for `request_id` is persisted to.
    pub fn index_path(&self, request_id: Uuid) -> PathBuf {
        self.config.index_dir.join(request_id.to_string())
    }

    /// Root directory holding persisted indexes.
    pub fn index_root(&self) -> &Path {
        &self.config.index_dir
    }
}

#[async_trait]
impl QueryApi for QueryService {
    async fn answer(
        &self,
        source: DocumentSource,
        questions: Vec<String>,
    ) -> Result<Vec<String>, PipelineError> {
        let request_id = Uuid::new_v4();
        tracing::info!(
            %request_id,
            document = %source.display_name(),
            questions = questions.len(),
            "Processing query"
        );

        match self.run(request_id, source, &questions).await {
            Ok(answers) => {
                self.metrics.record_success(answers.len() as u64);
                tracing::info!(%request_id, answers = answers.len(), "Query answered");
                Ok(answers)
            }
            Err(error) => {
                self.metrics.record_failure();
                tracing::error!(
                    %request_id,
                    stage = %Stage::Failed,
                    error = ?error,
                    "Query failed"
                );
                Err(error)
            }
        }
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn validate_questions(questions: &[String]) -> Result<(), PipelineError> {
    if questions.is_empty() {
        return Err(PipelineError::InvalidRequest(
            "questions must not be empty".into(),
        ));
    }
    if questions.iter().any(|question| question.trim().is_empty()) {
        return Err(PipelineError::InvalidRequest(
            "questions must not contain blank entries".into(),
        ));
    }
    Ok(())
}

fn log_stage(request_id: Uuid, stage: Stage) {
    tracing::info!(%request_id, %stage, "Stage started");
}

async fn run_blocking<T, F>(task: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| PipelineError::TaskFailed(error.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionClientError;
    use crate::config::test_config;
    use crate::embedding::EmbeddingClientError;
    use crate::processing::pdf::render_text;
    use crate::processing::types::{ConversionError, ErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds texts on two axes: mentions of "warranty" and everything else.
    #[derive(Default)]
    struct StubEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for StubEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|text| {
                    if text.to_lowercase().contains("warranty") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }

        fn model(&self) -> &str {
            "stub-embedding"
        }
    }

    /// Echoes the first retrieved line of context back as the answer.
    #[derive(Default)]
    struct EchoCompletion {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for EchoCompletion {
        async fn complete(&self, prompt: String) -> Result<String, CompletionClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let context = prompt
                .split_once("CONTENT:\n")
                .and_then(|(_, rest)| rest.lines().next())
                .unwrap_or_default();
            Ok(context.to_string())
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    struct Harness {
        service: QueryService,
        embedder: Arc<StubEmbedder>,
        completion: Arc<EchoCompletion>,
    }

    fn harness(config: Config) -> Harness {
        let embedder = Arc::new(StubEmbedder::default());
        let completion = Arc::new(EchoCompletion::default());
        let service =
            QueryService::with_clients(Arc::new(config), embedder.clone(), completion.clone())
                .expect("service");
        Harness {
            service,
            embedder,
            completion,
        }
    }

    fn write_pdf(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("policy.pdf");
        std::fs::write(&path, render_text(text).expect("render")).expect("write");
        path
    }

    #[tokio::test]
    async fn answers_local_pdf_in_question_order() {
        let docs = tempfile::tempdir().expect("tempdir");
        let path = write_pdf(
            docs.path(),
            "Claims are settled within 15 days.\n\nThe warranty period is 24 months.",
        );
        let mut config = test_config();
        config.chunk_size = 40;
        config.chunk_overlap = 0;
        let h = harness(config);

        let answers = h
            .service
            .answer(
                DocumentSource::Local(path),
                vec!["What is the warranty?".into(), "How are claims settled?".into()],
            )
            .await
            .expect("answers");

        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0], "The warranty period is 24 months.");
        assert_eq!(answers[1], "Claims are settled within 15 days.");
        assert_eq!(h.completion.calls.load(Ordering::SeqCst), 2);

        let snapshot = h.service.metrics_snapshot();
        assert_eq!(snapshot.requests_served, 1);
        assert_eq!(snapshot.questions_answered, 2);
        assert_eq!(snapshot.documents_processed, 1);
    }

    #[tokio::test]
    async fn empty_question_list_is_rejected_before_work() {
        let h = harness(test_config());
        let error = h
            .service
            .answer(DocumentSource::Local(PathBuf::from("missing.pdf")), Vec::new())
            .await
            .expect_err("should fail");

        assert_eq!(error.kind(), ErrorKind::InvalidRequest);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.service.metrics_snapshot().requests_failed, 1);
    }

    #[tokio::test]
    async fn unsupported_format_skips_upstream_calls() {
        let docs = tempfile::tempdir().expect("tempdir");
        let path = docs.path().join("notes.txt");
        std::fs::write(&path, "plain text").expect("write");
        let h = harness(test_config());

        let error = h
            .service
            .answer(DocumentSource::Local(path), vec!["anything?".into()])
            .await
            .expect_err("should fail");

        assert!(matches!(
            error,
            PipelineError::Conversion(ConversionError::UnsupportedFormat(_))
        ));
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.completion.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_document_is_empty_document_error() {
        let docs = tempfile::tempdir().expect("tempdir");
        let path = write_pdf(docs.path(), "   \n\n  ");
        let h = harness(test_config());

        let error = h
            .service
            .answer(DocumentSource::Local(path), vec!["anything?".into()])
            .await
            .expect_err("should fail");

        assert!(matches!(error, PipelineError::EmptyDocument));
        assert_eq!(h.completion.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn persisted_index_can_be_queried_again() {
        let docs = tempfile::tempdir().expect("tempdir");
        let indexes = tempfile::tempdir().expect("tempdir");
        let path = write_pdf(docs.path(), "The warranty period is 24 months.");
        let mut config = test_config();
        config.index_persist = true;
        config.index_dir = indexes.path().to_path_buf();
        let h = harness(config);

        h.service
            .answer(DocumentSource::Local(path), vec!["warranty?".into()])
            .await
            .expect("answers");

        let saved: Vec<PathBuf> = std::fs::read_dir(h.service.index_root())
            .expect("read dir")
            .map(|entry| entry.expect("entry").path())
            .collect();
        assert_eq!(saved.len(), 1);

        let answers = h
            .service
            .answer_from_index(saved[0].clone(), vec!["warranty?".into()])
            .await
            .expect("answers");
        assert!(answers[0].contains("24 months"));
    }

    #[test]
    fn stages_render_lowercase() {
        assert_eq!(Stage::Extracting.to_string(), "extracting");
        assert_eq!(Stage::Failed.to_string(), "failed");
    }
}
