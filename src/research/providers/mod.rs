//! Concrete [`TextGenerator`](crate::research::provider::TextGenerator) and
//! [`Embedder`](crate::research::retrieval::Embedder) implementations.
//!
//! Each submodule speaks one wire protocol while conforming to the contract
//! the agent tasks and the retriever rely on.

pub mod openai_compat;
pub mod openai_embeddings;
