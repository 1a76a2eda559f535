//! Document processing pipeline: source resolution, PDF normalization, extraction, chunking,
//! and the query service that ties them to indexing and answering.

pub mod chunking;
pub mod convert;
pub mod extract;
pub mod pdf;
mod service;
pub mod source;
pub mod types;

pub use service::{QueryApi, QueryService, Stage};
pub use source::DocumentSource;
pub use types::{
    Chunk, ChunkingError, ConversionError, DocumentRecord, ErrorKind, ExtractionError,
    PipelineError, QaError, SourceError,
};
