//! Document ingestion: chunk the text, then persist it with its chunk
//! summaries through the resilient store.

use serde::{Deserialize, Serialize};

use crate::chunker::{Chunk, Chunker, EXCERPT_CHARS, excerpt, summarize};
use crate::error::Result;
use crate::models::{Document, NewDocument};
use crate::store::ResilientStore;

/// A document to be ingested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub model: String,
    pub metadata: Option<serde_json::Value>,
}

/// The stored document together with the chunks it was split into.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

pub async fn ingest_document(
    store: &ResilientStore,
    request: IngestRequest,
    chunker: &Chunker,
) -> Result<IngestedDocument> {
    let chunks = chunker.chunk(&request.content, Some(&request.title));
    let summaries = serde_json::to_value(summarize(&chunks))?;

    let document = store
        .create_document(NewDocument {
            user_id: request.user_id,
            excerpt: excerpt(request.content.trim(), EXCERPT_CHARS),
            title: request.title,
            content: request.content,
            model: request.model,
            metadata: request.metadata,
            chunks: Some(summaries),
        })
        .await;

    tracing::info!(
        document = %document.id,
        user_id = document.user_id,
        chunks = chunks.len(),
        "ingested document"
    );
    Ok(IngestedDocument { document, chunks })
}
