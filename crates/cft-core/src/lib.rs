//! Core domain model for the climate funding tracker: canonical records,
//! comparison normalization, and content fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "cft-core";

/// Maximum number of link characters fed into a fingerprint.
pub const FINGERPRINT_LINK_MAX: usize = 100;

/// Hex width of a fingerprint (truncated sha-256 digest).
pub const FINGERPRINT_WIDTH: usize = 32;

/// Origin of a scraped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceLabel {
    #[serde(rename = "GEF")]
    Gef,
    #[serde(rename = "GCF")]
    Gcf,
    #[serde(rename = "OTHER")]
    Other,
    #[serde(rename = "CLIMATE_FUND")]
    ClimateFund,
}

impl SourceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLabel::Gef => "GEF",
            SourceLabel::Gcf => "GCF",
            SourceLabel::Other => "OTHER",
            SourceLabel::ClimateFund => "CLIMATE_FUND",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceLabel::Gef => "GEF (projects)",
            SourceLabel::Gcf => "GCF (projects)",
            SourceLabel::Other => "OECD / other",
            SourceLabel::ClimateFund => "Climate Funds (global)",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_uppercase().as_str() {
            "GEF" => Some(SourceLabel::Gef),
            "GCF" => Some(SourceLabel::Gcf),
            "OTHER" | "OECD" => Some(SourceLabel::Other),
            "CLIMATE_FUND" | "CLIMATE-FUND" => Some(SourceLabel::ClimateFund),
            _ => None,
        }
    }

    pub const ALL: [SourceLabel; 4] = [
        SourceLabel::Gef,
        SourceLabel::Gcf,
        SourceLabel::Other,
        SourceLabel::ClimateFund,
    ];
}

impl std::fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row from a scraped export, still in its source-specific shape.
/// Column names vary per origin; values are raw cell text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub label: SourceLabel,
    /// File name or scraper identifier the row came from.
    pub origin: String,
    pub columns: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(label: SourceLabel, origin: impl Into<String>) -> Self {
        Self {
            label,
            origin: origin.into(),
            columns: Vec::new(),
        }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value.as_str())
    }
}

/// Fully-populated project representation after source-specific mapping.
/// Every field holds a value; downstream code never branches on presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub title: String,
    pub source: SourceLabel,
    pub source_url: String,
    pub source_origin: String,
    pub description: String,
    pub organization: String,
    pub project_type: String,
    pub status: String,
    pub total_funding: String,
    pub funding_amount: Option<f64>,
    pub currency: String,
    pub country: String,
    pub region: String,
    pub document_url: String,
    pub additional_links: String,
    pub completeness_score: u8,
    pub needs_review: bool,
    pub fingerprint: String,
    pub scraped_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Stamp the content fingerprint from the discriminating fields.
    pub fn seal_fingerprint(&mut self) {
        self.fingerprint = fingerprint(
            &self.title,
            self.source,
            &self.organization,
            &self.additional_links,
        );
    }

    /// Comparison-ready projection used by the duplicate matcher.
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            title_norm: normalize_for_compare(&self.title),
            source: self.source,
            organization_norm: normalize_for_compare(&self.organization),
            link: self.additional_links.trim().to_string(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// The subset of fields the duplicate matcher compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub title_norm: String,
    pub source: SourceLabel,
    pub organization_norm: String,
    pub link: String,
    pub fingerprint: String,
}

/// Outcome of comparing one candidate against the existing-record index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchDecision {
    Accept,
    Reject {
        reason: RejectReason,
        /// Similarity ratio for fuzzy rejections, 1.0 for exact ones.
        ratio: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    #[serde(rename = "exact_fingerprint")]
    ExactFingerprint,
    #[serde(rename = "exact_link_same_source")]
    ExactLinkSameSource,
    #[serde(rename = "fuzzy_title_same_source_and_site")]
    FuzzyTitleSameSourceAndSite,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ExactFingerprint => "exact_fingerprint",
            RejectReason::ExactLinkSameSource => "exact_link_same_source",
            RejectReason::FuzzyTitleSameSourceAndSite => "fuzzy_title_same_source_and_site",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True for the blank markers that spreadsheet exports leave behind.
pub fn is_null_sentinel(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("null")
}

/// Trim a cell and map null sentinels to the empty string. Case and inner
/// spacing are preserved; this is the storage-facing cleanup, not the
/// comparison normalization.
pub fn clean_cell(value: &str) -> String {
    if is_null_sentinel(value) {
        String::new()
    } else {
        value.trim().to_string()
    }
}

/// Canonicalize free text for equality and similarity comparison: null
/// sentinels become empty, everything else is lowercased with punctuation
/// mapped to spaces and whitespace runs collapsed.
pub fn normalize_for_compare(value: &str) -> String {
    if is_null_sentinel(value) {
        return String::new();
    }
    value
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic content hash over the most discriminating fields. Identical
/// normalized inputs always produce identical fingerprints, so re-runs over
/// the same exports are idempotent.
pub fn fingerprint(title: &str, source: SourceLabel, organization: &str, link: &str) -> String {
    let bounded_link: String = link.trim().chars().take(FINGERPRINT_LINK_MAX).collect();
    let joined = [
        normalize_for_compare(title),
        source.as_str().to_string(),
        normalize_for_compare(organization),
        bounded_link,
    ]
    .join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_WIDTH].to_string()
}
