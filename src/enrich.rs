//! Offline enrichment: tags and a one-line summary per announcement.

use std::time::Duration;
use tracing::{info, warn};

use crate::ai::{self, AiConfig};
use crate::record::KnowledgeRecord;

pub const DEFAULT_MAX: usize = 50;

/// Text indexed in place of the raw content once a record is enriched.
pub fn enriched_content(tags: &[String], summary: &str, content: &str) -> String {
    format!("【標籤】{}\n【摘要】{}\n{}", tags.join(" "), summary, content)
}

/// Enrich up to `max` records that have no tags yet, pausing `delay` between calls.
///
/// A failed call leaves that record as it was. Returns how many were enriched.
pub async fn enrich_records(
    cfg: &AiConfig,
    records: &mut [KnowledgeRecord],
    max: usize,
    delay: Duration,
) -> usize {
    let mut done = 0;
    for rec in records.iter_mut().filter(|r| !r.has_tags()) {
        if done >= max {
            break;
        }
        match ai::enrich_record(cfg, &rec.title, &rec.content).await {
            Ok(e) => {
                let tags: Vec<String> = e
                    .tags
                    .iter()
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .map(|t| if t.starts_with('#') { t.to_string() } else { format!("#{t}") })
                    .collect();
                let summary = e.summary.trim().to_string();
                rec.content_enriched = Some(enriched_content(&tags, &summary, &rec.content));
                rec.tags = Some(tags);
                rec.summary = Some(summary);
                done += 1;
                info!(done, title = %rec.title, "enriched");
            }
            Err(e) => warn!(error = %e, title = %rec.title, "enrichment failed, skipping"),
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    done
}
