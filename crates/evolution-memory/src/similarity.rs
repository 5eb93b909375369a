//! Similarity index used by the HTTP worker's search endpoint.
//!
//! The index is a secondary collaborator: the store stays authoritative and
//! index failures never fail an ingest or a search.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::memory_db::{MemoryDatabase, WorkerObservation};
use crate::utils::TextUtils;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    pub id: i64,
    pub score: f32,
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn add(&self, id: i64, text: &str) -> anyhow::Result<()>;
    async fn query(&self, text: &str, n_results: usize) -> anyhow::Result<Vec<SimilarityMatch>>;
}

/// Text indexed for a worker observation.
pub fn indexed_text(observation: &WorkerObservation) -> String {
    format!("{}\n{}", observation.title, observation.semantic_summary)
}

/// In-process keyword index. Documents are kept lowercased and scored by
/// keyword density against the query's significant words.
#[derive(Default)]
pub struct KeywordSimilarityIndex {
    documents: RwLock<HashMap<i64, String>>,
}

impl KeywordSimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stored worker observation.
    pub async fn rebuild(&self, db: &MemoryDatabase) -> anyhow::Result<usize> {
        let observations = db.worker.all()?;
        let mut documents = self.documents.write().await;
        documents.clear();
        for observation in &observations {
            documents.insert(observation.id, indexed_text(observation));
        }
        info!("Similarity index rebuilt with {} documents", documents.len());
        Ok(documents.len())
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl SimilarityIndex for KeywordSimilarityIndex {
    async fn add(&self, id: i64, text: &str) -> anyhow::Result<()> {
        self.documents.write().await.insert(id, text.to_string());
        Ok(())
    }

    async fn query(&self, text: &str, n_results: usize) -> anyhow::Result<Vec<SimilarityMatch>> {
        let keywords = TextUtils::keywords(text);
        if keywords.is_empty() || n_results == 0 {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().await;
        let mut matches: Vec<SimilarityMatch> = documents
            .iter()
            .map(|(id, content)| SimilarityMatch {
                id: *id,
                score: TextUtils::keyword_relevance(content, &keywords),
            })
            .filter(|m| m.score > 0.0)
            .collect();

        // best score first, newest id on ties
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then(b.id.cmp(&a.id)));
        matches.truncate(n_results);
        debug!("Similarity query matched {} of {} documents", matches.len(), documents.len());
        Ok(matches)
    }
}

/// Index a document, logging a failure instead of returning it.
pub async fn add_or_warn(index: &dyn SimilarityIndex, id: i64, text: &str) -> bool {
    match index.add(id, text).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to index observation {}: {}", id, e);
            false
        }
    }
}

/// Query the index, returning no matches when it fails.
pub async fn query_or_empty(index: &dyn SimilarityIndex, text: &str, n_results: usize) -> Vec<SimilarityMatch> {
    match index.query(text, n_results).await {
        Ok(matches) => matches,
        Err(e) => {
            warn!("Similarity query failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnavailableIndex;

    #[async_trait]
    impl SimilarityIndex for UnavailableIndex {
        async fn add(&self, _id: i64, _text: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("index offline"))
        }

        async fn query(&self, _text: &str, _n: usize) -> anyhow::Result<Vec<SimilarityMatch>> {
            Err(anyhow::anyhow!("index offline"))
        }
    }

    #[tokio::test]
    async fn test_query_ranks_matching_documents() {
        let index = KeywordSimilarityIndex::new();
        index.add(1, "Parsed configuration file for database settings").await.unwrap();
        index.add(2, "Ran the test suite").await.unwrap();
        index.add(3, "database migration failed on startup").await.unwrap();

        let matches = index.query("database settings", 5).await.unwrap();
        let ids: Vec<i64> = matches.iter().map(|m| m.id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&3));
        assert!(!ids.contains(&2));
        assert_eq!(matches[0].id, 1);
    }

    #[tokio::test]
    async fn test_query_respects_limit_and_stopwords() {
        let index = KeywordSimilarityIndex::new();
        for id in 0..10 {
            index.add(id, "cargo build output").await.unwrap();
        }
        assert_eq!(index.query("cargo", 3).await.unwrap().len(), 3);
        assert!(index.query("the and", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_from_store() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.worker.insert("s1", "Edited router", "Added the search route", "{}").unwrap();
        db.worker.insert("s1", "Ran tests", "Everything passed", "{}").unwrap();

        let index = KeywordSimilarityIndex::new();
        assert_eq!(index.rebuild(&db).await.unwrap(), 2);
        assert_eq!(index.len().await, 2);

        let matches = index.query("router search", 5).await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_fatal() {
        let index = UnavailableIndex;
        assert!(!add_or_warn(&index, 1, "text").await);
        assert!(query_or_empty(&index, "text", 5).await.is_empty());
    }
}
