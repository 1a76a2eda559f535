use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docqa::{
    api,
    config::{self, Config},
    index, logging,
    processing::{DocumentSource, QueryApi, QueryService},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "docqa",
    version,
    about = "Answer questions about documents with retrieval-augmented generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve {
        /// Interface to bind; overrides SERVER_HOST.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind; overrides SERVER_PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Answer questions about a single document and print the answers.
    Ask {
        /// Local path or http(s) URL of the document.
        #[arg(required_unless_present = "index", conflicts_with = "index")]
        document: Option<String>,
        /// Reuse an index directory written by an earlier run instead of a document.
        #[arg(long)]
        index: Option<PathBuf>,
        /// Question to ask; repeat for several.
        #[arg(short = 'q', long = "question", required = true)]
        questions: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(config::load().context("Failed to load configuration")?);
    let _log_guard = logging::init_tracing(&config.log_file);
    config.log_summary();

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Ask {
            document,
            index,
            questions,
        } => ask(config, document, index, questions).await,
    }
}

async fn serve(config: Arc<Config>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let service = Arc::new(
        QueryService::new(config.clone()).context("Failed to initialize query service")?,
    );

    if config.index_persist {
        index::spawn_reaper(
            config.index_dir.clone(),
            config.index_ttl,
            config.index_reap_interval,
        );
        tracing::info!(
            dir = %config.index_dir.display(),
            ttl_secs = config.index_ttl.as_secs(),
            "Index reaper started"
        );
    }

    let app = api::create_router(service, config.clone());
    let host = host.unwrap_or_else(|| config.server_host.clone());
    let port = port.unwrap_or(config.server_port);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    tracing::info!(
        "Listening on http://{}{}",
        listener.local_addr()?,
        config.api_prefix
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn ask(
    config: Arc<Config>,
    document: Option<String>,
    index: Option<PathBuf>,
    questions: Vec<String>,
) -> Result<()> {
    let service = QueryService::new(config).context("Failed to initialize query service")?;
    let answers = match (document, index) {
        (_, Some(dir)) => service.answer_from_index(dir, questions.clone()).await?,
        (Some(document), None) => {
            let source = DocumentSource::parse(&document)?;
            service.answer(source, questions.clone()).await?
        }
        (None, None) => bail!("either a document or --index is required"),
    };

    for (question, answer) in questions.iter().zip(&answers) {
        println!("Q: {question}\nA: {answer}\n");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
