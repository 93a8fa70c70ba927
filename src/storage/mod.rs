//! Run reports.
//!
//! Saves and loads the outcome of one analysis run to/from a JSON file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{MatchAnalysis, Orchestrator};
use crate::types::BetRecommendation;

/// Summary of one run across all analyzed matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Sport -> leagues scanned.
    pub sports: BTreeMap<String, Vec<String>>,
    pub matches_analyzed: usize,
    pub failed_requests: usize,
    pub positive_edge_count: usize,
    /// Mean edge over all recommendations, 0 when there are none.
    pub average_edge: f64,
    /// Mean prediction confidence over analyzed matches.
    pub average_confidence: f64,
    pub top_value_bets: Vec<BetRecommendation>,
    pub analyses: Vec<MatchAnalysis>,
}

impl RunReport {
    pub fn build(
        sports: &BTreeMap<String, Vec<String>>,
        analyses: Vec<MatchAnalysis>,
        failed_requests: usize,
        top_n: usize,
    ) -> Self {
        let ranked = Orchestrator::rank_all(&analyses);
        let positive_edge_count = ranked.iter().filter(|r| r.edge > 0.0).count();
        let average_edge = mean(ranked.iter().map(|r| r.edge));
        let average_confidence = mean(analyses.iter().map(|a| a.prediction.confidence));

        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            sports: sports.clone(),
            matches_analyzed: analyses.len(),
            failed_requests,
            positive_edge_count,
            average_edge,
            average_confidence,
            top_value_bets: ranked.into_iter().take(top_n).collect(),
            analyses,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Write a report as pretty JSON.
pub fn save_report(report: &RunReport, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialise run report")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write report to {path}"))?;

    debug!(path, run_id = %report.run_id, matches = report.matches_analyzed, "Report saved");
    Ok(())
}

/// Load a report. Returns None if the file doesn't exist.
pub fn load_report(path: &str) -> Result<Option<RunReport>> {
    if !Path::new(path).exists() {
        info!(path, "No saved report found");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read report from {path}"))?;

    let report: RunReport = serde_json::from_str(&json)
        .context(format!("Failed to parse report from {path}"))?;

    info!(
        path,
        run_id = %report.run_id,
        matches = report.matches_analyzed,
        "Report loaded from disk"
    );

    Ok(Some(report))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
