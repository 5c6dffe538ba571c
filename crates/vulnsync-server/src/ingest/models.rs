//! Data models for ingestion
//!
//! Run-state records kept in the history list and the normalized vulnerability records
//! kept in the dataset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ingestion run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Processing,
    Completed,
    CompletedWithErrors,
}

impl RunStatus {
    /// Whether the run has stopped (successfully or not)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Processing)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Processing => write!(f, "PROCESSING"),
            RunStatus::Completed => write!(f, "COMPLETED"),
            RunStatus::CompletedWithErrors => write!(f, "COMPLETED_WITH_ERRORS"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PROCESSING" => Ok(RunStatus::Processing),
            "COMPLETED" => Ok(RunStatus::Completed),
            "COMPLETED_WITH_ERRORS" => Ok(RunStatus::CompletedWithErrors),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// One attempt to synchronize the advisory feed.
///
/// Plain data: the orchestrator derives each new state with the `with_*` helpers and
/// writes it back to the history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRun {
    pub started: DateTime<Utc>,
    /// Set on success or when a page fetch fails terminally
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
    /// Offset of the next page to fetch
    pub cursor: u32,
    pub page_size: u32,
    /// Advisories matching the window, unknown until the first page arrives
    #[serde(default)]
    pub total: Option<u32>,
    pub status: RunStatus,
    /// Lower bound of the last-modified window; `None` means a full sync
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

impl IngestionRun {
    /// A fresh run in `PROCESSING` state
    pub fn start(
        started: DateTime<Utc>,
        page_size: u32,
        since: Option<DateTime<Utc>>,
        cursor: u32,
    ) -> Self {
        Self {
            started,
            completed: None,
            cursor,
            page_size,
            total: None,
            status: RunStatus::Processing,
            since,
        }
    }

    pub fn with_status(self, status: RunStatus) -> Self {
        Self { status, ..self }
    }

    pub fn with_cursor(self, cursor: u32) -> Self {
        Self { cursor, ..self }
    }

    pub fn with_total(self, total: u32) -> Self {
        Self {
            total: Some(total),
            ..self
        }
    }

    pub fn with_completed(self, completed: Option<DateTime<Utc>>) -> Self {
        Self { completed, ..self }
    }
}

/// Normalized vulnerability record, keyed by its canonical identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityRecord {
    pub cve_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub affected: Vec<Affected>,
    #[serde(default)]
    pub severities: Vec<Severity>,
}

/// Affected package with its version ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affected {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<Range>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecosystem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purl: Option<String>,
}

/// Version range, e.g. `SEMVER` or `GIT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default)]
    pub events: Vec<RangeEvent>,
}

/// A single range boundary; exactly one field is normally set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_affected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

/// Severity score, e.g. `CVSS_V3` with its vector string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Severity {
    #[serde(rename = "type")]
    pub kind: String,
    pub score: String,
}

/// Alias index entry: external identifier to canonical identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub alias: String,
    pub canonical_id: String,
}
