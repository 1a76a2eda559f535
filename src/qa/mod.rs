//! Question answering over a document index.

mod pipeline;
pub mod prompt;

pub use pipeline::QaPipeline;
