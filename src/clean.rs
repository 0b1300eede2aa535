//! Offline data hygiene: dedup, attachment normalization, file merging.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::AssistantError;
use crate::record::{load_records_or_empty, save_records, KnowledgeRecord};

pub const SITE_BASE: &str = "https://www.nihs.tp.edu.tw";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub original: usize,
    pub after_url: usize,
    pub after_title_date: usize,
    pub removed: usize,
}

/// Drop duplicates by URL, then by (title, date). First occurrence wins.
pub fn dedupe(records: Vec<KnowledgeRecord>) -> (Vec<KnowledgeRecord>, CleanReport) {
    let original = records.len();

    let mut seen_urls: HashSet<String> = HashSet::new();
    let by_url: Vec<KnowledgeRecord> = records
        .into_iter()
        .filter(|r| !r.has_url() || seen_urls.insert(r.url.trim().to_string()))
        .collect();
    let after_url = by_url.len();

    let mut seen_keys: HashSet<(String, String)> = HashSet::new();
    let cleaned: Vec<KnowledgeRecord> = by_url
        .into_iter()
        .filter(|r| seen_keys.insert((r.title.trim().to_string(), r.date.trim().to_string())))
        .collect();
    let after_title_date = cleaned.len();

    let report = CleanReport {
        original,
        after_url,
        after_title_date,
        removed: original - after_title_date,
    };
    (cleaned, report)
}

/// Absolutize root-relative links, drop mailto/unnamed entries and duplicate URLs.
pub fn normalize_attachments(record: &mut KnowledgeRecord, base: &str) {
    let base = base.trim_end_matches('/');
    let mut seen = HashSet::new();
    let attachments = std::mem::take(&mut record.attachments);
    record.attachments = attachments
        .into_iter()
        .filter_map(|mut a| {
            a.name = a.name.trim().to_string();
            if a.name.is_empty() || a.url.is_empty() || a.url.to_lowercase().starts_with("mailto:") {
                return None;
            }
            if a.url.starts_with('/') {
                a.url = format!("{base}{}", a.url);
            }
            seen.insert(a.url.clone()).then_some(a)
        })
        .collect();
}

/// Normalize attachments against the school site, then dedupe.
pub fn clean_records(mut records: Vec<KnowledgeRecord>) -> (Vec<KnowledgeRecord>, CleanReport) {
    for r in &mut records {
        normalize_attachments(r, SITE_BASE);
    }
    dedupe(records)
}

/// Load, clean and write a cleaned copy.
pub fn clean_file(input: &Path, output: &Path) -> Result<CleanReport, AssistantError> {
    let (cleaned, report) = clean_records(load_records_or_empty(input)?);
    save_records(output, &cleaned)?;
    info!(
        original = report.original,
        kept = report.after_title_date,
        removed = report.removed,
        output = %output.display(),
        "cleaned records"
    );
    Ok(report)
}

#[derive(Debug, Serialize)]
pub struct MergeReport {
    pub inputs: Vec<(PathBuf, usize)>,
    pub total: usize,
}

/// Concatenate record files in order. Missing inputs contribute nothing.
pub fn merge_files(inputs: &[PathBuf], output: &Path) -> Result<MergeReport, AssistantError> {
    let mut merged = Vec::new();
    let mut counts = Vec::with_capacity(inputs.len());
    for path in inputs {
        let records = load_records_or_empty(path)?;
        counts.push((path.clone(), records.len()));
        merged.extend(records);
    }
    save_records(output, &merged)?;
    info!(total = merged.len(), output = %output.display(), "merged record files");
    Ok(MergeReport { inputs: counts, total: merged.len() })
}
