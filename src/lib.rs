#![deny(missing_docs)]

//! Core library for the document question-answering server.

/// HTTP routing and REST handlers.
pub mod api;
/// Chat-completion client abstraction and adapters.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Similarity index construction, search, and persistence.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Document processing pipeline utilities.
pub mod processing;
/// Retrieval-augmented question answering.
pub mod qa;
