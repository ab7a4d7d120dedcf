use std::{env, sync::Once};

use rustydocs::{
    config,
    embedding::{EmbeddingClient, build_embedding_client},
    generation::{GenerationClient, GenerationRequest, OllamaGenerationClient},
    qdrant::QdrantService,
    vector::VectorIndex,
};

static INIT: Once = Once::new();

fn set_default_env(key: &str, value: &str) {
    let needs_value = env::var(key).map(|v| v.trim().is_empty()).unwrap_or(true);
    if needs_value {
        // SAFETY: Tests run serially via Once and we intentionally mutate process env.
        unsafe {
            env::set_var(key, value);
        }
    }
}

fn init_config_once() {
    INIT.call_once(|| {
        set_default_env("VECTOR_INDEX_PROVIDER", "qdrant");
        set_default_env("QDRANT_URL", "http://127.0.0.1:6333");
        set_default_env("QDRANT_COLLECTION_NAME", "rusty-docs");
        set_default_env("EMBEDDING_PROVIDER", "ollama");
        set_default_env("EMBEDDING_MODEL", "nomic-embed-text");
        set_default_env("EMBEDDING_DIMENSION", "768");
        set_default_env("OLLAMA_URL", "http://127.0.0.1:11434");
        set_default_env("METADATA_SNAPSHOT_PATH", "");
        config::init_config();
    });
}

#[tokio::test]
#[ignore = "Requires live Qdrant"]
async fn live_qdrant_collection_is_healthy() {
    init_config_once();
    let config = config::get_config();
    let service = QdrantService::new(
        config.qdrant_url.as_deref().expect("qdrant url"),
        config.qdrant_collection_name.clone(),
        config.qdrant_api_key.clone(),
    )
    .expect("qdrant client");
    service
        .ensure_collection(config.embedding_dimension as u64)
        .await
        .expect("collection prepared");
    service.health_check().await.expect("Qdrant should be reachable");
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings"]
async fn live_ollama_embedding_roundtrip() {
    init_config_once();
    let config = config::get_config();
    let client = build_embedding_client(config).expect("embedding client");
    let vectors = client
        .generate_embeddings(vec!["rusty-docs live embedding".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 1, "expected one embedding per input");
    assert_eq!(
        vectors[0].len(),
        config.embedding_dimension,
        "embedding dimension mismatch"
    );
}

#[tokio::test]
#[ignore = "Requires live Ollama chat model"]
async fn live_ollama_generation_answers() {
    init_config_once();
    let config = config::get_config();
    let client = OllamaGenerationClient::new(config.ollama_url.clone()).expect("client");
    let answer = client
        .generate(GenerationRequest {
            model: config.generation_model.clone(),
            system: "Reply with one word.".into(),
            prompt: "Say ready.".into(),
        })
        .await
        .expect("generation");
    assert!(!answer.trim().is_empty());
}
