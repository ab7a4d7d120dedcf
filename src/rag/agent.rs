//! Retrieval-augmented question answering over ingested documents.

use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    embedding::EmbeddingClient,
    generation::{GenerationClient, GenerationRequest},
    storage::MetadataStore,
    vector::{VectorIndex, VectorMatch},
};

use super::{
    prompt::{
        ContextPassage, SYSTEM_INSTRUCTION, TokenCounter, assemble_context, build_token_counter,
        build_user_prompt,
    },
    types::{QueryAnswer, QueryError, QueryFailure, QueryRequest, QuerySettings, Source},
};

/// Answer returned when retrieval finds nothing to ground on.
pub const NO_MATCH_ANSWER: &str = "No ingested documents matched the question.";

/// Read-only query agent: embed, search, assemble context, generate.
pub struct RagAgent {
    embedder: Arc<dyn EmbeddingClient>,
    vectors: Arc<dyn VectorIndex>,
    metadata: Arc<dyn MetadataStore>,
    generator: Arc<dyn GenerationClient>,
    settings: QuerySettings,
    counter: TokenCounter,
}

struct Retrieved {
    matched: VectorMatch,
    content: String,
}

impl RagAgent {
    /// Build an agent; the token counter is derived from the generation model.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        vectors: Arc<dyn VectorIndex>,
        metadata: Arc<dyn MetadataStore>,
        generator: Arc<dyn GenerationClient>,
        settings: QuerySettings,
    ) -> Self {
        let counter = build_token_counter(&settings.model);
        Self {
            embedder,
            vectors,
            metadata,
            generator,
            settings,
            counter,
        }
    }

    /// Answer `request` from ingested content only.
    pub async fn answer(&self, request: &QueryRequest) -> Result<QueryAnswer, QueryError> {
        let question = request.query.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let scope = request
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|scope| !scope.is_empty());

        let query_vector = self
            .embedder
            .generate_embeddings(vec![question.to_string()])
            .await
            .map_err(QueryFailure::from)?
            .pop()
            .ok_or_else(|| {
                QueryFailure::Embedding(crate::embedding::EmbeddingClientError::InvalidResponse(
                    "no vector returned for query".into(),
                ))
            })?;

        // Over-fetch so matches dropped by the visibility check do not shrink the result set.
        let candidates = self
            .vectors
            .search(query_vector, self.settings.top_k * 2, scope)
            .await
            .map_err(QueryFailure::from)?;

        let retrieved = self.visible_matches(candidates, scope).await?;
        if retrieved.is_empty() {
            tracing::info!(scope = ?scope, "Query matched no searchable documents");
            return Ok(no_match());
        }

        let passages: Vec<ContextPassage> = retrieved
            .iter()
            .map(|item| ContextPassage {
                document_id: item.matched.metadata.document_id.clone(),
                score: item.matched.score,
                text: item.content.clone(),
            })
            .collect();
        let (context, included) =
            assemble_context(&passages, self.settings.context_max_tokens, &self.counter);
        if included == 0 {
            tracing::info!(scope = ?scope, "No passage fits the context budget");
            return Ok(no_match());
        }

        let answer = self
            .generator
            .generate(GenerationRequest {
                model: self.settings.model.clone(),
                system: SYSTEM_INSTRUCTION.to_string(),
                prompt: build_user_prompt(&context, question),
            })
            .await
            .map_err(QueryFailure::from)?;

        let sources: Vec<Source> = retrieved
            .into_iter()
            .take(included)
            .map(|item| Source {
                document_id: item.matched.metadata.document_id,
                confidence: item.matched.score,
                snippet: item.matched.metadata.snippet,
            })
            .collect();
        let confidence = sources
            .iter()
            .map(|source| source.confidence)
            .fold(0.0_f32, f32::max);

        tracing::info!(
            scope = ?scope,
            sources = sources.len(),
            confidence,
            "Query answered"
        );
        Ok(QueryAnswer {
            answer,
            sources,
            confidence,
        })
    }

    /// Keep matches whose search entry is published, in scope, and points at the matched vector.
    async fn visible_matches(
        &self,
        candidates: Vec<VectorMatch>,
        scope: Option<&str>,
    ) -> Result<Vec<Retrieved>, QueryError> {
        let mut seen = HashSet::new();
        let mut retrieved = Vec::new();
        for matched in candidates {
            if retrieved.len() == self.settings.top_k {
                break;
            }
            if seen.contains(&matched.metadata.document_id) {
                continue;
            }
            let entry = self
                .metadata
                .get_searchable_entry(&matched.metadata.document_id)
                .await
                .map_err(QueryFailure::from)?;
            let Some(entry) = entry else {
                continue;
            };
            if entry.vector_id != matched.id {
                continue;
            }
            if let Some(scope) = scope
                && entry.transaction_id.as_deref() != Some(scope)
            {
                continue;
            }
            seen.insert(entry.document_id);
            retrieved.push(Retrieved {
                content: entry.content,
                matched,
            });
        }
        Ok(retrieved)
    }
}

fn no_match() -> QueryAnswer {
    QueryAnswer {
        answer: NO_MATCH_ANSWER.to_string(),
        sources: Vec::new(),
        confidence: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingClient;
    use crate::generation::GenerationClientError;
    use crate::storage::{MemoryMetadataStore, SearchIndexEntry};
    use crate::vector::{MemoryVectorIndex, VectorEntry, VectorMetadata};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl GenerationClient for RecordingGenerator {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<String, GenerationClientError> {
            if self.fail {
                return Err(GenerationClientError::ProviderUnavailable("offline".into()));
            }
            self.prompts.lock().expect("lock").push(request.prompt);
            Ok("The approved amount is 250,000.".into())
        }
    }

    struct Fixture {
        agent: RagAgent,
        generator: Arc<RecordingGenerator>,
    }

    async fn upsert_vector(
        embedder: &HashEmbeddingClient,
        vectors: &MemoryVectorIndex,
        vector_id: &str,
        id: &str,
        transaction: &str,
        text: &str,
    ) {
        let embedding = embedder
            .generate_embeddings(vec![text.to_string()])
            .await
            .expect("embed")
            .remove(0);
        vectors
            .upsert(VectorEntry {
                id: vector_id.into(),
                embedding,
                metadata: VectorMetadata {
                    document_id: id.into(),
                    snippet: text.into(),
                    timestamp: "2025-01-01T00:00:00Z".into(),
                    transaction_id: Some(transaction.into()),
                },
            })
            .await
            .expect("upsert");
    }

    async fn index_document(
        embedder: &HashEmbeddingClient,
        vectors: &MemoryVectorIndex,
        metadata: &MemoryMetadataStore,
        id: &str,
        transaction: &str,
        text: &str,
        publish: bool,
    ) {
        let vector_id = format!("vec-{id}");
        upsert_vector(embedder, vectors, &vector_id, id, transaction, text).await;
        metadata
            .insert_search_entry(SearchIndexEntry {
                document_id: id.into(),
                transaction_id: Some(transaction.into()),
                content: text.into(),
                vector_id,
                confidence: 0.5,
                indexed_at: "2025-01-01T00:00:00Z".into(),
                searchable: false,
            })
            .await
            .expect("insert");
        if publish {
            metadata.publish_search_entry(id).await.expect("publish");
        }
    }

    async fn fixture(fail: bool) -> Fixture {
        fixture_with(fail, QuerySettings::default()).await
    }

    async fn fixture_with(fail: bool, settings: QuerySettings) -> Fixture {
        let embedder = HashEmbeddingClient::new(32);
        let vectors = MemoryVectorIndex::new(32);
        let metadata = MemoryMetadataStore::new();
        index_document(&embedder, &vectors, &metadata, "doc-a", "tx-1", "Approved loan amount is 250,000", true).await;
        index_document(&embedder, &vectors, &metadata, "doc-b", "tx-2", "Approved loan amount is 900,000", true).await;
        index_document(&embedder, &vectors, &metadata, "doc-c", "tx-1", "Approved loan amount draft", false).await;

        let generator = Arc::new(RecordingGenerator {
            fail,
            ..RecordingGenerator::default()
        });
        let agent = RagAgent::new(
            Arc::new(embedder),
            Arc::new(vectors),
            Arc::new(metadata),
            generator.clone(),
            settings,
        );
        Fixture { agent, generator }
    }

    fn request(query: &str, scope: Option<&str>) -> QueryRequest {
        QueryRequest {
            query: query.into(),
            transaction_id: scope.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn scoped_answer_cites_only_published_documents_in_scope() {
        let fixture = fixture(false).await;
        let answer = fixture
            .agent
            .answer(&request("What is the approved loan amount?", Some("tx-1")))
            .await
            .expect("answer");

        let ids: Vec<_> = answer.sources.iter().map(|s| s.document_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-a"]);
        assert_eq!(answer.confidence, answer.sources[0].confidence);
        assert!(!answer.answer.is_empty());

        let prompts = fixture.generator.prompts.lock().expect("lock");
        assert!(prompts[0].contains("250,000"));
        assert!(!prompts[0].contains("900,000"));
    }

    #[tokio::test]
    async fn unscoped_sources_are_sorted_by_score() {
        let fixture = fixture(false).await;
        let answer = fixture
            .agent
            .answer(&request("approved loan amount", None))
            .await
            .expect("answer");
        assert_eq!(answer.sources.len(), 2);
        assert!(answer.sources[0].confidence >= answer.sources[1].confidence);
    }

    #[tokio::test]
    async fn empty_scope_returns_fixed_answer_without_generation() {
        let fixture = fixture(false).await;
        let answer = fixture
            .agent
            .answer(&request("anything", Some("tx-unknown")))
            .await
            .expect("answer");
        assert_eq!(answer.answer, NO_MATCH_ANSWER);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.confidence, 0.0);
        assert!(fixture.generator.prompts.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let fixture = fixture(false).await;
        let error = fixture
            .agent
            .answer(&request("   ", None))
            .await
            .expect_err("blank");
        assert!(matches!(error, QueryError::EmptyQuery));
    }

    #[tokio::test]
    async fn generator_failure_surfaces_as_query_failure() {
        let fixture = fixture(true).await;
        let error = fixture
            .agent
            .answer(&request("approved loan amount", Some("tx-1")))
            .await
            .expect_err("generator down");
        assert!(matches!(
            error,
            QueryError::Failed(QueryFailure::Generation(_))
        ));
    }

    #[tokio::test]
    async fn orphaned_vector_does_not_hide_the_published_one() {
        let embedder = HashEmbeddingClient::new(32);
        let vectors = MemoryVectorIndex::new(32);
        let metadata = MemoryMetadataStore::new();
        let text = "Approved loan amount is 250,000";
        // An interrupted embed run left a vector behind before the retry registered its own.
        upsert_vector(&embedder, &vectors, "vec-orphan", "doc-a", "tx-1", text).await;
        upsert_vector(&embedder, &vectors, "vec-real", "doc-a", "tx-1", text).await;
        metadata
            .insert_search_entry(SearchIndexEntry {
                document_id: "doc-a".into(),
                transaction_id: Some("tx-1".into()),
                content: text.into(),
                vector_id: "vec-real".into(),
                confidence: 0.9,
                indexed_at: "2025-01-01T00:00:00Z".into(),
                searchable: false,
            })
            .await
            .expect("insert");
        metadata.publish_search_entry("doc-a").await.expect("publish");

        let agent = RagAgent::new(
            Arc::new(embedder),
            Arc::new(vectors),
            Arc::new(metadata),
            Arc::new(RecordingGenerator::default()),
            QuerySettings::default(),
        );
        for _ in 0..20 {
            let answer = agent
                .answer(&request("approved loan amount", Some("tx-1")))
                .await
                .expect("answer");
            let ids: Vec<_> = answer.sources.iter().map(|s| s.document_id.as_str()).collect();
            assert_eq!(ids, vec!["doc-a"]);
        }
    }

    #[tokio::test]
    async fn nothing_is_cited_when_no_passage_fits_the_budget() {
        let fixture = fixture_with(
            false,
            QuerySettings {
                context_max_tokens: 0,
                ..QuerySettings::default()
            },
        )
        .await;
        let answer = fixture
            .agent
            .answer(&request("approved loan amount", Some("tx-1")))
            .await
            .expect("answer");
        assert_eq!(answer.answer, NO_MATCH_ANSWER);
        assert!(answer.sources.is_empty());
        assert!(fixture.generator.prompts.lock().expect("lock").is_empty());
    }
}
