pub mod chunker;
pub mod embeddings;
mod retriever;

pub use embeddings::{EmbeddingClient, EmbeddingError, QueryEmbedding};
pub use retriever::{ContextRetriever, NewDocument, SearchOptions};
