//! External collaborator boundary (spec.md §1, §9: roster ingestion and
//! final ranking computation/export are explicitly out of scope). This
//! module defines only the trait seam `POST /api/admin/upload` and
//! `POST /api/admin/save_ranking` call through; the business logic behind
//! each implementation lives in whatever system owns those concerns.
//!
//! Grounded on the teacher's collaborator-boundary traits
//! (`knhk-workflow-engine/src/services/mod.rs`'s pattern of a narrow trait
//! plus an in-memory stand-in used until a real backend is wired in).

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CoreResult;
use crate::protocol::CompetitorInput;

/// One box's worth of roster data, as produced by spreadsheet ingestion.
#[derive(Debug, Clone)]
pub struct BoxRoster {
    pub box_id: u32,
    pub categorie: String,
    pub routes_count: u32,
    pub competitors: Vec<CompetitorInput>,
}

/// Turns an uploaded spreadsheet (or whatever format the roster tool emits)
/// into per-box rosters. Spec.md explicitly leaves the spreadsheet format
/// and ingestion rules to an external tool; this trait is only the seam.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn parse_upload(&self, raw: &[u8]) -> CoreResult<Vec<BoxRoster>>;
}

/// Computes and exports final rankings once all boxes for a category have
/// reported scores. Out of scope per spec.md §1/§9 beyond this seam:
/// tie-break rules, category aggregation, and export format are an external
/// collaborator's responsibility.
#[async_trait]
pub trait RankingExporter: Send + Sync {
    async fn save_ranking(&self, categorie: &str, ranked: Vec<RankedCompetitor>) -> CoreResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCompetitor {
    pub name: String,
    pub rank: u32,
    pub score: f64,
}

/// A no-op stand-in used until a real roster/ranking backend is wired in,
/// so the HTTP layer has something to call during local development and
/// tests without depending on an external service being reachable.
pub struct NullCollaborators;

#[async_trait]
impl RosterSource for NullCollaborators {
    async fn parse_upload(&self, _raw: &[u8]) -> CoreResult<Vec<BoxRoster>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl RankingExporter for NullCollaborators {
    async fn save_ranking(&self, _categorie: &str, _ranked: Vec<RankedCompetitor>) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_collaborators_accept_without_error() {
        let collaborators = NullCollaborators;
        assert!(collaborators.parse_upload(b"irrelevant").await.unwrap().is_empty());
        assert!(collaborators
            .save_ranking("Women Final", vec![RankedCompetitor { name: "A".into(), rank: 1, score: 25.0 }])
            .await
            .is_ok());
    }
}
