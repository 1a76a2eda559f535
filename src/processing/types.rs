//! Core data types and error definitions for the document pipeline.

use crate::{completion::CompletionClientError, embedding::EmbeddingClientError, index::IndexError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page-scoped text produced by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    /// Text content of the page.
    pub text: String,
    /// Zero-based page number within the source PDF.
    pub page: u32,
    /// Number of pages in the source PDF.
    pub total_pages: u32,
    /// Identity of the file the page was read from.
    pub source: String,
}

/// Bounded text window used as the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text, whitespace-trimmed.
    pub text: String,
    /// Page of the record the chunk was split from.
    pub page: u32,
    /// Source identity inherited from the record.
    pub source: String,
    /// Position of the chunk within the document's chunk sequence.
    pub ordinal: usize,
}

/// Errors raised while resolving the requested document to a local file.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Input looked like a URL but could not be parsed, or was empty.
    #[error("Invalid document location: {0}")]
    InvalidLocation(String),
    /// HTTP layer failed before a response arrived, including timeouts.
    #[error("Failed to download document: {0}")]
    Download(#[from] reqwest::Error),
    /// Document host answered with a non-success status.
    #[error("Document host returned {status} for {url}")]
    UnexpectedStatus {
        /// Status returned by the host.
        status: StatusCode,
        /// URL that was requested.
        url: String,
    },
    /// Downloaded bytes could not be written to the request workspace.
    #[error("Failed to store downloaded document: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while normalizing an input file to PDF.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Extension is not one of the supported input formats.
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    /// ZIP archive did not contain any PDF entry.
    #[error("No PDF found in zip file")]
    NoPdfInArchive,
    /// ZIP archive could not be read.
    #[error("Failed to read zip archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    /// DOCX package could not be parsed.
    #[error("Failed to read DOCX document: {0}")]
    Docx(String),
    /// Spreadsheet could not be parsed.
    #[error("Failed to read spreadsheet: {0}")]
    Spreadsheet(String),
    /// Image could not be decoded.
    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    /// Outlook message could not be parsed.
    #[error("Failed to read email message: {0}")]
    Email(String),
    /// Generated PDF could not be serialized.
    #[error("Failed to render PDF: {0}")]
    Render(#[from] lopdf::Error),
    /// Input or output file access failed.
    #[error("File access failed during conversion: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading page text out of a PDF.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// PDF structure could not be parsed.
    #[error("Failed to parse PDF: {0}")]
    Pdf(#[from] lopdf::Error),
    /// PDF requires a password.
    #[error("PDF is encrypted")]
    Encrypted,
    /// PDF parsed but holds no pages.
    #[error("PDF contains no pages")]
    NoPages,
    /// Neither extractor could read text from any page.
    #[error("No page text could be extracted: {0}")]
    Unreadable(String),
    /// PDF file could not be read.
    #[error("Failed to read PDF: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while configuring the text splitter.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Splitting configured an impossible chunk size.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for new text in every chunk.
    #[error("chunk overlap {overlap} must be smaller than chunk size {size}")]
    InvalidOverlap {
        /// Configured overlap.
        overlap: usize,
        /// Configured chunk size.
        size: usize,
    },
}

/// Errors emitted while answering questions against an index.
#[derive(Debug, Error)]
pub enum QaError {
    /// Question embedding failed.
    #[error("Failed to embed question: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Retrieval against the index failed.
    #[error("Retrieval failed: {0}")]
    Index(#[from] IndexError),
    /// Chat model call failed.
    #[error("Failed to generate answer: {0}")]
    Completion(#[from] CompletionClientError),
}

/// Errors emitted by the request pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request failed validation before any work started.
    #[error("{0}")]
    InvalidRequest(String),
    /// Document could not be located or downloaded.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Document could not be converted to PDF.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// PDF text could not be extracted.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Splitter configuration was rejected.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// Document yielded no text to index.
    #[error("document contains no extractable text")]
    EmptyDocument,
    /// Embedding or index construction failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Question answering failed.
    #[error(transparent)]
    Qa(#[from] QaError),
    /// Upstream client could not be constructed.
    #[error("Failed to initialize upstream client: {0}")]
    ClientSetup(String),
    /// Request workspace could not be created.
    #[error("Failed to prepare request workspace: {0}")]
    Workspace(std::io::Error),
    /// Blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Coarse failure categories used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied an unusable request.
    InvalidRequest,
    /// Document extension is not supported.
    UnsupportedFormat,
    /// Document content could not be parsed.
    Parsing,
    /// Download, embedding, or completion service failed.
    Upstream,
    /// Local failure unrelated to the request content.
    Internal,
}

impl PipelineError {
    /// Classify the error for status mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Source(SourceError::InvalidLocation(_)) => ErrorKind::InvalidRequest,
            Self::Source(SourceError::Download(_) | SourceError::UnexpectedStatus { .. }) => {
                ErrorKind::Upstream
            }
            Self::Source(SourceError::Io(_)) => ErrorKind::Internal,
            Self::Conversion(ConversionError::UnsupportedFormat(_)) => ErrorKind::UnsupportedFormat,
            Self::Conversion(ConversionError::Io(_)) => ErrorKind::Internal,
            Self::Conversion(_) => ErrorKind::Parsing,
            Self::Extraction(ExtractionError::Io(_)) => ErrorKind::Internal,
            Self::Extraction(_) => ErrorKind::Parsing,
            Self::EmptyDocument => ErrorKind::Parsing,
            Self::Index(IndexError::Embedding(_)) => ErrorKind::Upstream,
            Self::Qa(QaError::Embedding(_) | QaError::Completion(_)) => ErrorKind::Upstream,
            Self::Qa(QaError::Index(IndexError::Embedding(_))) => ErrorKind::Upstream,
            Self::Index(_)
            | Self::Qa(QaError::Index(_))
            | Self::Chunking(_)
            | Self::ClientSetup(_)
            | Self::Workspace(_)
            | Self::TaskFailed(_) => ErrorKind::Internal,
        }
    }

    /// Message that is safe to show to API clients.
    pub fn client_message(&self) -> String {
        match self {
            Self::Conversion(ConversionError::NoPdfInArchive) => {
                ConversionError::NoPdfInArchive.to_string()
            }
            Self::Conversion(ConversionError::UnsupportedFormat(ext)) => {
                format!("Unsupported file type: {ext}")
            }
            Self::EmptyDocument => "Document contains no extractable text".into(),
            other => match other.kind() {
                ErrorKind::InvalidRequest => other.to_string(),
                ErrorKind::UnsupportedFormat | ErrorKind::Parsing => {
                    "Document could not be parsed".into()
                }
                ErrorKind::Upstream => "Upstream service failed".into(),
                ErrorKind::Internal => "Processing failed".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_without_pdf_keeps_explicit_message() {
        let error = PipelineError::from(ConversionError::NoPdfInArchive);
        assert_eq!(error.kind(), ErrorKind::Parsing);
        assert_eq!(error.client_message(), "No PDF found in zip file");
    }

    #[test]
    fn upstream_failures_hide_provider_text() {
        let error = PipelineError::from(QaError::Completion(
            CompletionClientError::UnexpectedStatus {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: "rate limited for org-secret".into(),
            },
        ));
        assert_eq!(error.kind(), ErrorKind::Upstream);
        assert_eq!(error.client_message(), "Upstream service failed");
    }

    #[test]
    fn unsupported_format_names_extension() {
        let error = PipelineError::from(ConversionError::UnsupportedFormat(".txt".into()));
        assert_eq!(error.kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(error.client_message(), "Unsupported file type: .txt");
    }

    #[test]
    fn parser_failures_are_generic_for_clients() {
        let error = PipelineError::from(ExtractionError::Encrypted);
        assert_eq!(error.kind(), ErrorKind::Parsing);
        assert_eq!(error.client_message(), "Document could not be parsed");
    }
}
