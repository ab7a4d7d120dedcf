//! Retrieval-augmented answers: embed the question, search the vector index within the
//! requested scope, keep only published search entries, and ask the generator to answer from
//! the assembled context.

mod agent;
pub mod prompt;
mod types;

pub use agent::{NO_MATCH_ANSWER, RagAgent};
pub use types::{QueryAnswer, QueryError, QueryFailure, QueryRequest, QuerySettings, Source};
