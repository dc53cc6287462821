//! Source loading, column mapping and data-quality scoring.
//!
//! Each origin exports rows with its own header vocabulary; `map_record`
//! folds them onto the canonical schema so nothing downstream ever branches
//! on "is this column present".

use std::path::{Path, PathBuf};

use chrono::Utc;
use cft_core::{clean_cell, is_null_sentinel, CanonicalRecord, RawRecord, SourceLabel};
use tracing::warn;

pub const CRATE_NAME: &str = "cft-ingest";

/// Headers matching one of these route a cell into the synthetic
/// climate-fund description and the total-funding scan.
const FUNDING_KEYWORDS: [&str; 5] = ["pledge", "deposit", "approval", "disbursement", "amount"];

/// Subset used for the total-funding amount scan.
const TOTAL_FUNDING_KEYWORDS: [&str; 4] = ["pledge", "deposit", "approval", "disbursement"];

const SUSPICIOUS_TITLE_KEYWORDS: [&str; 5] = ["test", "draft", "template", "example", "sample"];

const PLACEHOLDER_TITLES: [&str; 3] = ["projet", "project", "untitled"];

const CLIMATE_FUND_TITLE_PREFIX: &str = "[CLIMATE FUND] ";

const CLIMATE_FUND_FALLBACK_DESCRIPTION: &str =
    "Global Climate Fund for climate change mitigation and adaptation projects.";

#[derive(Debug, thiserror::Error)]
pub enum SourceLoadError {
    #[error("source file not found: {0}")]
    Missing(PathBuf),
    #[error("source file has no rows: {0}")]
    Empty(PathBuf),
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Canonical destination of a mapped source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Title,
    ProjectType,
    DocumentUrl,
    SourceUrl,
    Organization,
    AdditionalLinks,
    Description,
    TotalFunding,
    Status,
}

/// Static alias table: known header spellings across the GEF, GCF, OECD and
/// climate-fund exports. Extending coverage for a new export means adding
/// entries here, not another pipeline.
fn canonical_target(header: &str) -> Option<Target> {
    match header.trim() {
        "Titre" | "Title" | "Nom" | "Name" | "Fund Name" => Some(Target::Title),
        "Type" | "Project Type" | "Type de projet" | "Category" | "Catégorie" => {
            Some(Target::ProjectType)
        }
        "Document" | "Document URL" | "PDF" | "Fichier" => Some(Target::DocumentUrl),
        "nom_site" | "Site" | "Source URL" | "Website" | "Portal" => Some(Target::SourceUrl),
        "Organisation" | "Organization" | "Organisme" | "Agency" | "Agence" | "Institution" => {
            Some(Target::Organization)
        }
        "Lien" | "Link" | "URL" | "Project URL" | "Project Link" | "Fund URL" => {
            Some(Target::AdditionalLinks)
        }
        "Description" | "Résumé" | "Summary" | "Abstract" | "Détails" => {
            Some(Target::Description)
        }
        "Cofinancement Total" | "Total Funding" | "Budget" | "Montant" | "Amount"
        | "Financement" | "Funding" => Some(Target::TotalFunding),
        "Status" | "Statut" => Some(Target::Status),
        _ => None,
    }
}

/// Read one origin's export. Per-row parse failures are logged and skipped;
/// a missing or row-less file surfaces as an error the caller downgrades to
/// a warning.
pub fn load_source(path: &Path, label: SourceLabel) -> Result<Vec<RawRecord>, SourceLoadError> {
    if !path.exists() {
        return Err(SourceLoadError::Missing(path.to_path_buf()));
    }
    let origin = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|source| SourceLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let headers = reader
        .headers()
        .map_err(|source| SourceLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable row");
                continue;
            }
        };
        let mut raw = RawRecord::new(label, origin.clone());
        for (idx, header) in headers.iter().enumerate() {
            let value = record.get(idx).unwrap_or_default();
            raw.columns.push((header.to_string(), value.to_string()));
        }
        rows.push(raw);
    }

    if rows.is_empty() {
        return Err(SourceLoadError::Empty(path.to_path_buf()));
    }
    Ok(rows)
}

/// Map one raw row onto the canonical schema. Known header aliases are
/// applied, everything unmapped is dropped, and every canonical field ends
/// up populated with a value or a type-appropriate default.
pub fn map_record(raw: &RawRecord) -> CanonicalRecord {
    let now = Utc::now();
    let (country, region) = match raw.label {
        SourceLabel::ClimateFund => ("Global", "Global"),
        _ => ("Mauritania", "Africa"),
    };

    let mut record = CanonicalRecord {
        title: String::new(),
        source: raw.label,
        source_url: String::new(),
        source_origin: raw.origin.clone(),
        description: String::new(),
        organization: String::new(),
        project_type: String::new(),
        status: "Active".to_string(),
        total_funding: String::new(),
        funding_amount: None,
        currency: "USD".to_string(),
        country: country.to_string(),
        region: region.to_string(),
        document_url: String::new(),
        additional_links: String::new(),
        completeness_score: 0,
        needs_review: false,
        fingerprint: String::new(),
        scraped_at: now,
        last_updated: now,
    };

    for (header, value) in &raw.columns {
        let Some(target) = canonical_target(header) else {
            continue;
        };
        let cleaned = clean_cell(value);
        if cleaned.is_empty() {
            continue;
        }
        match target {
            Target::Title => record.title = cleaned,
            Target::ProjectType => record.project_type = cleaned,
            Target::DocumentUrl => record.document_url = cleaned,
            Target::SourceUrl => record.source_url = cleaned,
            Target::Organization => record.organization = cleaned,
            Target::AdditionalLinks => record.additional_links = cleaned,
            Target::Description => record.description = cleaned,
            Target::TotalFunding => record.total_funding = cleaned,
            Target::Status => record.status = cleaned,
        }
    }

    if raw.label == SourceLabel::ClimateFund {
        apply_climate_fund_transform(raw, &mut record);
    }

    record.funding_amount = parse_funding_amount(&record.total_funding);
    record
}

/// Climate-fund rows are fund listings, not country projects: tag the title,
/// assemble a description from whatever amount columns the export carries,
/// and derive the headline funding figure from the largest of them.
fn apply_climate_fund_transform(raw: &RawRecord, record: &mut CanonicalRecord) {
    if !record.title.is_empty() {
        record.title = format!("{CLIMATE_FUND_TITLE_PREFIX}{}", record.title);
    }

    let mut parts = Vec::new();
    for (header, value) in &raw.columns {
        let lower = header.to_lowercase();
        if !FUNDING_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            continue;
        }
        let cleaned = clean_cell(value);
        if cleaned.is_empty() || cleaned == "0" {
            continue;
        }
        let label = header.replace("(USD mn)", "").replace("USD", "");
        parts.push(format!("{}: {}", label.trim(), cleaned));
    }
    record.description = if parts.is_empty() {
        CLIMATE_FUND_FALLBACK_DESCRIPTION.to_string()
    } else {
        format!("Global Climate Fund. {}", parts.join(" | "))
    };

    if let Some((amount, header)) = largest_amount_column(raw) {
        let lower = header.to_lowercase();
        record.total_funding = if lower.contains("mn") || lower.contains("million") {
            format!("USD {} Million", format_amount(amount))
        } else {
            format!("USD {}", format_amount(amount))
        };
    }

    record.project_type = "Climate Fund".to_string();
    record.organization = "Climate Funds Update".to_string();
    record.country = "Global".to_string();
    record.region = "Global".to_string();
    record.source_url = "climatefundsupdate.org".to_string();
}

/// Largest numeric value across the amount-bearing columns, with the column
/// header it came from. Best guess at the headline figure.
fn largest_amount_column(raw: &RawRecord) -> Option<(f64, String)> {
    let mut best: Option<(f64, String)> = None;
    for (header, value) in &raw.columns {
        let lower = header.to_lowercase();
        if !TOTAL_FUNDING_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            continue;
        }
        let cleaned = clean_cell(value).replace(',', "");
        let Some(amount) = extract_numbers(&cleaned).into_iter().next() else {
            continue;
        };
        match &best {
            Some((current, _)) if *current >= amount => {}
            _ => best = Some((amount, header.clone())),
        }
    }
    best
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else {
        format!("{amount}")
    }
}

/// Pull every numeric token (digits plus one decimal point) out of a string.
fn extract_numbers(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut seen_dot = false;
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if ch == '.' && !seen_dot && !current.is_empty() {
            current.push(ch);
            seen_dot = true;
            continue;
        }
        if !current.is_empty() {
            if let Ok(v) = current.parse::<f64>() {
                out.push(v);
            }
            current.clear();
            seen_dot = false;
        }
    }
    if !current.is_empty() {
        if let Ok(v) = current.parse::<f64>() {
            out.push(v);
        }
    }
    out
}

/// Parse the numeric funding amount out of free text like "USD 2.5 Million".
/// Thousands separators are stripped; a million marker scales by 1e6.
pub fn parse_funding_amount(text: &str) -> Option<f64> {
    if is_null_sentinel(text) {
        return None;
    }
    let upper = text.to_uppercase().replace(',', "");
    let amount = extract_numbers(&upper).into_iter().next()?;
    if upper.contains("MILLION") || upper.contains(" M ") {
        Some(amount * 1_000_000.0)
    } else {
        Some(amount)
    }
}

fn populated(value: &str) -> bool {
    value.trim().chars().count() > 3
}

/// 0-100 data-quality score from which fields carry values. Three tiers:
/// required fields are worth 12.5 each, important 10, optional 10, and
/// climate-fund rows start from a flat 20 since they are curated listings.
pub fn completeness_score(record: &CanonicalRecord) -> u8 {
    let mut score: f64 = if record.source == SourceLabel::ClimateFund {
        20.0
    } else {
        0.0
    };

    for field in [
        record.title.as_str(),
        record.description.as_str(),
        record.organization.as_str(),
        record.source.as_str(),
    ] {
        if populated(field) {
            score += 12.5;
        }
    }
    for field in [
        record.total_funding.as_str(),
        record.project_type.as_str(),
        record.source_url.as_str(),
    ] {
        if populated(field) {
            score += 10.0;
        }
    }
    for field in [record.document_url.as_str(), record.additional_links.as_str()] {
        if populated(field) {
            score += 10.0;
        }
    }

    score.min(100.0) as u8
}

/// Whether a record should be queued for manual review before it is eligible
/// for conversion into a tracked project. Climate-fund rows are exempt.
pub fn needs_review(record: &CanonicalRecord, score: u8) -> bool {
    if record.source == SourceLabel::ClimateFund {
        return false;
    }
    if score < 40 {
        return true;
    }
    let title = record.title.trim();
    let title_lower = title.to_lowercase();
    if title.chars().count() < 10 || PLACEHOLDER_TITLES.contains(&title_lower.as_str()) {
        return true;
    }
    if record.organization.trim().chars().count() < 3 {
        return true;
    }
    SUSPICIOUS_TITLE_KEYWORDS
        .iter()
        .any(|kw| title_lower.contains(kw))
}

/// Compute and stamp the quality fields, then seal the fingerprint.
pub fn apply_quality(record: &mut CanonicalRecord) {
    let score = completeness_score(record);
    record.completeness_score = score;
    record.needs_review = needs_review(record, score);
    record.seal_fingerprint();
}

/// The one unconditional row filter, deliberately permissive: keep any title
/// longer than two characters that is not a blank marker.
pub fn retain_title(title: &str) -> bool {
    let trimmed = title.trim();
    !is_null_sentinel(trimmed) && trimmed.chars().count() > 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn raw(label: SourceLabel, columns: &[(&str, &str)]) -> RawRecord {
        let mut record = RawRecord::new(label, "test.csv");
        for (header, value) in columns {
            record
                .columns
                .push((header.to_string(), value.to_string()));
        }
        record
    }

    #[test]
    fn french_title_header_maps_and_defaults_fill_the_rest() {
        let record = map_record(&raw(
            SourceLabel::Other,
            &[("Titre", "Programme d'adaptation côtière")],
        ));
        assert_eq!(record.title, "Programme d'adaptation côtière");
        assert_eq!(record.source, SourceLabel::Other);
        assert_eq!(record.currency, "USD");
        assert_eq!(record.country, "Mauritania");
        assert_eq!(record.region, "Africa");
        assert_eq!(record.status, "Active");
        assert_eq!(record.organization, "");
    }

    #[test]
    fn unmapped_columns_are_dropped_and_sentinels_blanked() {
        let record = map_record(&raw(
            SourceLabel::Gef,
            &[
                ("Title", "Wetland Restoration"),
                ("Organisation", "nan"),
                ("Internal Ref", "xyz-42"),
            ],
        ));
        assert_eq!(record.title, "Wetland Restoration");
        assert_eq!(record.organization, "");
    }

    #[test]
    fn climate_fund_rows_get_prefixed_title_and_synthetic_description() {
        let record = map_record(&raw(
            SourceLabel::ClimateFund,
            &[
                ("Fund Name", "Adaptation Fund"),
                ("Fund URL", "https://climatefundsupdate.org/adaptation-fund"),
                ("Pledged (USD mn)", "512.5"),
                ("Deposited (USD mn)", "430"),
                ("Projects approved", "0"),
            ],
        ));
        assert_eq!(record.title, "[CLIMATE FUND] Adaptation Fund");
        assert_eq!(
            record.description,
            "Global Climate Fund. Pledged: 512.5 | Deposited: 430"
        );
        assert_eq!(record.total_funding, "USD 512.5 Million");
        assert_eq!(record.funding_amount, Some(512_500_000.0));
        assert_eq!(record.organization, "Climate Funds Update");
        assert_eq!(record.project_type, "Climate Fund");
        assert_eq!(record.country, "Global");
        assert_eq!(record.region, "Global");
        assert_eq!(record.source_url, "climatefundsupdate.org");
        assert_eq!(
            record.additional_links,
            "https://climatefundsupdate.org/adaptation-fund"
        );
    }

    #[test]
    fn climate_fund_amount_without_million_marker_stays_plain() {
        let record = map_record(&raw(
            SourceLabel::ClimateFund,
            &[
                ("Fund Name", "Readiness Facility"),
                ("Approval 2024", "2,500,000"),
                ("Disbursement 2024", "1200000"),
            ],
        ));
        assert_eq!(record.total_funding, "USD 2500000");
        assert_eq!(record.funding_amount, Some(2_500_000.0));
    }

    #[test]
    fn funding_amount_parses_common_shapes() {
        assert_eq!(parse_funding_amount("USD 2.5 Million"), Some(2_500_000.0));
        assert_eq!(parse_funding_amount("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_funding_amount("3.2 M USD"), Some(3_200_000.0));
        assert_eq!(parse_funding_amount("grant"), None);
        assert_eq!(parse_funding_amount("nan"), None);
    }

    fn empty_record(source: SourceLabel) -> CanonicalRecord {
        map_record(&raw(source, &[]))
    }

    #[test]
    fn score_bounds_for_empty_records() {
        // "GEF" is three characters, so even the source slot stays unfilled.
        let blank = empty_record(SourceLabel::Gef);
        assert_eq!(completeness_score(&blank), 0);

        // A climate-fund row with every text field blanked keeps its flat
        // base bonus plus the source slot ("CLIMATE_FUND" counts as
        // populated): 20 + 12.5, truncated.
        let mut fund = empty_record(SourceLabel::ClimateFund);
        fund.description = String::new();
        fund.organization = String::new();
        fund.project_type = String::new();
        fund.source_url = String::new();
        assert_eq!(completeness_score(&fund), 32);
    }

    #[test]
    fn score_tiers_sum_and_clamp() {
        let record = map_record(&raw(
            SourceLabel::Gcf,
            &[
                ("Title", "Coastal Resilience Program"),
                ("Description", "Mangrove restoration along the coast"),
                ("Organization", "Ministry of Environment"),
                ("Total Funding", "USD 12 Million"),
                ("Project Type", "Adaptation"),
                ("Website", "greenclimate.fund"),
                ("Document URL", "https://gcf.example/doc.pdf"),
                ("Project Link", "https://gcf.example/p/42"),
            ],
        ));
        // Source "GCF" is only three characters, so the source slot of the
        // required tier stays unfilled: 37.5 + 30 + 20, truncated to 87.
        assert_eq!(completeness_score(&record), 87);

        let mut maxed = record.clone();
        maxed.source = SourceLabel::ClimateFund;
        assert_eq!(completeness_score(&maxed), 100);
    }

    #[test]
    fn review_flags_short_generic_and_suspicious_titles() {
        let mut record = map_record(&raw(
            SourceLabel::Gef,
            &[
                ("Title", "Sahel Groundwater Mapping Initiative"),
                ("Description", "Regional aquifer survey and monitoring"),
                ("Organization", "Ministry of Water"),
                ("Total Funding", "USD 4 Million"),
                ("Project Type", "Assessment"),
                ("Website", "thegef.org"),
            ],
        ));
        let score = completeness_score(&record);
        assert!(!needs_review(&record, score));

        record.title = "Untitled".to_string();
        assert!(needs_review(&record, completeness_score(&record)));

        record.title = "Template for project submissions".to_string();
        assert!(needs_review(&record, completeness_score(&record)));

        record.title = "Sahel Groundwater Mapping Initiative".to_string();
        record.organization = "NA".to_string();
        assert!(needs_review(&record, completeness_score(&record)));
    }

    #[test]
    fn climate_funds_are_exempt_from_review() {
        let record = map_record(&raw(SourceLabel::ClimateFund, &[("Fund Name", "GCF")]));
        assert!(!needs_review(&record, completeness_score(&record)));
    }

    #[test]
    fn title_filter_is_permissive_but_drops_blanks() {
        assert!(retain_title("Dam"));
        assert!(retain_title("  Dam  "));
        assert!(!retain_title("ab"));
        assert!(!retain_title(""));
        assert!(!retain_title("nan"));
        assert!(!retain_title("None"));
    }

    #[test]
    fn load_source_reads_rows_and_flags_missing_or_empty_files() {
        let dir = tempfile::tempdir().expect("tempdir");

        let missing = dir.path().join("absent.csv");
        assert!(matches!(
            load_source(&missing, SourceLabel::Gef),
            Err(SourceLoadError::Missing(_))
        ));

        let empty = dir.path().join("empty.csv");
        std::fs::File::create(&empty).expect("create");
        assert!(matches!(
            load_source(&empty, SourceLabel::Gef),
            Err(SourceLoadError::Empty(_))
        ));

        let good = dir.path().join("GEF_Mauritania_Projects.csv");
        let mut file = std::fs::File::create(&good).expect("create");
        writeln!(file, "Title,Organization,Project Link").expect("write");
        writeln!(file, "Solar Grid Expansion,Ministry X,https://gef.example/123").expect("write");
        writeln!(file, "Wetland Restoration,Ministry Y,https://gef.example/124").expect("write");
        drop(file);

        let rows = load_source(&good, SourceLabel::Gef).expect("load");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].origin, "GEF_Mauritania_Projects.csv");
        assert_eq!(rows[0].get("Title"), Some("Solar Grid Expansion"));
        let record = map_record(&rows[0]);
        assert_eq!(record.additional_links, "https://gef.example/123");
    }
}
