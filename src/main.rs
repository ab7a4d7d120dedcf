use anyhow::{Context, Result};
use rustydocs::{
    api,
    config::{self, Config, VectorIndexProvider},
    embedding::build_embedding_client,
    extraction::DocumentExtractor,
    gateway::DocumentGateway,
    generation::OllamaGenerationClient,
    logging,
    metrics::PipelineMetrics,
    qdrant::QdrantService,
    rag::RagAgent,
    storage::{FsBlobStore, MemoryMetadataStore, MetadataStore},
    vector::{MemoryVectorIndex, VectorIndex},
    vision::{OllamaVisionClient, VisionModel},
    workflow::{IngestionWorkflow, WorkflowDispatcher, WorkflowServices},
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let blobs = Arc::new(FsBlobStore::new(config.blob_store_dir.clone()));
    let metadata: Arc<dyn MetadataStore> = match &config.metadata_snapshot_path {
        Some(path) => Arc::new(
            MemoryMetadataStore::open(path.clone())
                .await
                .context("failed to open metadata snapshot")?,
        ),
        None => Arc::new(MemoryMetadataStore::new()),
    };
    let vectors = build_vector_index(config).await?;
    let embedder = build_embedding_client(config).context("failed to build embedding client")?;
    let vision: Option<Arc<dyn VisionModel>> = match &config.vision_model {
        Some(model) => Some(Arc::new(
            OllamaVisionClient::new(config.ollama_url.clone(), model.clone())
                .context("failed to build vision client")?,
        )),
        None => None,
    };
    let generator = Arc::new(
        OllamaGenerationClient::new(config.ollama_url.clone())
            .context("failed to build generation client")?,
    );
    let metrics = Arc::new(PipelineMetrics::new());

    let workflow = IngestionWorkflow::new(
        WorkflowServices {
            blobs: blobs.clone(),
            metadata: metadata.clone(),
            vectors: vectors.clone(),
            embedder: embedder.clone(),
            extractor: DocumentExtractor::new(vision),
            metrics: metrics.clone(),
        },
        config.workflow_settings(),
    );
    let dispatcher = WorkflowDispatcher::new(workflow, config.workflow_concurrency);
    let resumed = dispatcher
        .resume_unfinished()
        .await
        .context("failed to resume unfinished documents")?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed unfinished documents");
    }

    let agent = Arc::new(RagAgent::new(
        embedder,
        vectors.clone(),
        metadata.clone(),
        generator,
        config.query_settings(),
    ));
    let gateway = DocumentGateway::new(
        blobs,
        metadata,
        vectors,
        dispatcher,
        agent,
        metrics,
        config.max_upload_bytes,
    );
    let app = api::create_router(Arc::new(gateway));

    let (listener, port) = bind_listener().await.context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn build_vector_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.vector_index_provider {
        VectorIndexProvider::Memory => Ok(Arc::new(MemoryVectorIndex::new(
            config.embedding_dimension,
        ))),
        VectorIndexProvider::Qdrant => {
            let url = config
                .qdrant_url
                .as_deref()
                .context("QDRANT_URL is required for the qdrant vector index")?;
            let service = QdrantService::new(
                url,
                config.qdrant_collection_name.clone(),
                config.qdrant_api_key.clone(),
            )?;
            service
                .ensure_collection(config.embedding_dimension as u64)
                .await
                .context("failed to prepare Qdrant collection")?;
            Ok(Arc::new(service))
        }
    }
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
