//! Freshness-gated retrieval.
//!
//! The primary index covers research PDFs ingested into object storage. When
//! the newest of those PDFs is older than the freshness threshold, or the
//! primary index has nothing for the query, the secondary index is consulted
//! as well and its hits are appended after the primary ones.
//!
//! ```text
//!   object store ──▶ newest .pdf ──▶ age (days)  ┐
//!                                                ├─▶ fallback? ──▶ secondary index
//!   primary index ──▶ hits ──▶ normalize ────────┘
//! ```
//!
//! An unreachable or empty store counts as maximally stale. An empty final
//! result is not an error: the caller gets a single marker document.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::error::{PipelineError, Result};
use crate::format::normalize_all;
use crate::index::DocumentIndex;
use crate::models::{RetrievedDocument, SourceFreshness};
use crate::prompts::NO_DOCUMENTS_FOUND;
use crate::storage::ObjectStore;

#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    pub threshold_days: i64,
    pub missing_age_days: i64,
    pub document_suffix: String,
}

impl FreshnessPolicy {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            threshold_days: config.freshness_threshold_days,
            missing_age_days: config.missing_age_days,
            document_suffix: config.document_suffix.clone(),
        }
    }

    pub fn needs_fallback(&self, age_days: i64, primary_empty: bool) -> bool {
        primary_empty || age_days > self.threshold_days
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

/// Outcome of one retrieval.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Primary hits first, then secondary. Holds only the marker document
    /// when nothing was found.
    pub documents: Vec<RetrievedDocument>,
    pub found: bool,
    pub age_days: i64,
    pub consulted_secondary: bool,
}

impl Retrieval {
    fn not_found(age_days: i64, consulted_secondary: bool) -> Self {
        Self {
            documents: vec![RetrievedDocument::from_text(NO_DOCUMENTS_FOUND)],
            found: false,
            age_days,
            consulted_secondary,
        }
    }
}

pub struct FreshnessGatedRetriever {
    primary: Arc<dyn DocumentIndex>,
    secondary: Arc<dyn DocumentIndex>,
    store: Arc<dyn ObjectStore>,
    policy: FreshnessPolicy,
}

impl FreshnessGatedRetriever {
    pub fn new(
        primary: Arc<dyn DocumentIndex>,
        secondary: Arc<dyn DocumentIndex>,
        store: Arc<dyn ObjectStore>,
        policy: FreshnessPolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Newest primary-source document. Store failures degrade to "absent".
    pub async fn freshness(&self) -> SourceFreshness {
        match self.store.latest_modified(&self.policy.document_suffix).await {
            Ok(last_modified) => SourceFreshness { last_modified },
            Err(e) => {
                warn!(target: "retriever", error = %format!("{:#}", e), "object store unreachable; treating primary source as stale");
                SourceFreshness {
                    last_modified: None,
                }
            }
        }
    }

    /// Age of the primary source in whole days, with the sentinel for "absent".
    pub async fn freshness_age_days(&self) -> i64 {
        self.freshness()
            .await
            .age_days(Utc::now(), self.policy.missing_age_days)
    }

    #[tracing::instrument(name = "retriever.retrieve", skip(self), fields(age_days = tracing::field::Empty, consulted_secondary = tracing::field::Empty))]
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        let (age_days, primary_hits) =
            tokio::join!(self.freshness_age_days(), self.primary.query(query));
        let primary_hits =
            primary_hits.map_err(|e| PipelineError::upstream(self.primary.name(), e))?;

        let mut documents = normalize_all(primary_hits)?;
        let consulted_secondary = self.policy.needs_fallback(age_days, documents.is_empty());

        tracing::Span::current().record("age_days", age_days);
        tracing::Span::current().record("consulted_secondary", consulted_secondary);

        if consulted_secondary {
            debug!(
                target: "retriever",
                age_days,
                primary_hits = documents.len(),
                "consulting secondary index"
            );
            let secondary_hits = self
                .secondary
                .query(query)
                .await
                .map_err(|e| PipelineError::upstream(self.secondary.name(), e))?;
            documents.extend(normalize_all(secondary_hits)?);
        }

        if documents.is_empty() {
            info!(target: "retriever", "no documents found");
            return Ok(Retrieval::not_found(age_days, consulted_secondary));
        }

        Ok(Retrieval {
            documents,
            found: true,
            age_days,
            consulted_secondary,
        })
    }
}
