use std::sync::Arc;

use docqa::{
    completion::{CompletionClient, build_completion_client},
    config,
    embedding::{EmbeddingClient, OpenAiEmbeddingClient},
    processing::{DocumentSource, QueryApi, QueryService, pdf},
};

fn live_config() -> config::Config {
    config::load().expect("OPENAI_API_KEY and TEAM_BEARER_TOKEN must be set")
}

#[tokio::test]
#[ignore = "Requires live OpenAI embeddings"]
async fn live_openai_embedding_roundtrip() {
    let config = live_config();
    let client = OpenAiEmbeddingClient::new(&config).expect("embedding client");
    let vectors = client
        .generate_embeddings(vec!["docqa live embedding".to_string(), "second".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 2, "expected embedding per input chunk");
    assert!(!vectors[0].is_empty());
    assert_eq!(vectors[0].len(), vectors[1].len(), "embedding dimension drifted");
}

#[tokio::test]
#[ignore = "Requires live chat completions"]
async fn live_completion_replies() {
    let config = live_config();
    let client = build_completion_client(&config).expect("completion client");
    let reply = client
        .complete("Reply with the single word: ready".to_string())
        .await
        .expect("completion request failed");
    assert!(!reply.is_empty());
}

#[tokio::test]
#[ignore = "Requires live OpenAI embeddings and chat completions"]
async fn live_pipeline_answers_from_local_pdf() {
    let mut config = live_config();
    config.index_persist = false;
    let workspace = tempfile::tempdir().expect("tempdir");
    let path = workspace.path().join("policy.pdf");
    let bytes = pdf::render_text(
        "Policy schedule\n\nThe warranty period is 24 months.\n\nClaims are settled within 15 days.",
    )
    .expect("render pdf");
    std::fs::write(&path, bytes).expect("write pdf");

    let service = QueryService::new(Arc::new(config)).expect("service");
    let source = DocumentSource::parse(path.to_str().expect("utf-8 path")).expect("source");
    let answers = service
        .answer(source, vec!["What is the warranty period?".to_string()])
        .await
        .expect("pipeline run");
    assert_eq!(answers.len(), 1);
    assert!(
        answers[0].contains("24"),
        "answer should mention the warranty length: {}",
        answers[0]
    );
}
