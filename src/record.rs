//! Knowledge records: announcements and static pages scraped from the school site.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::error::AssistantError;
use crate::util::char_prefix;

/// URL placeholder the crawler writes when it could not resolve a permalink.
pub const URL_UNAVAILABLE: &str = "無法取得";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawled_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_enriched: Option<String>,
}

impl KnowledgeRecord {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.content.trim().is_empty()
    }

    pub fn has_url(&self) -> bool {
        let u = self.url.trim();
        !u.is_empty() && u != URL_UNAVAILABLE
    }

    pub fn has_tags(&self) -> bool {
        self.tags.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Compact text used for embeddings.
    pub fn semantic_text(&self) -> String {
        format!(
            "日期:{}，單位:{}，標題:{}，內容:{}",
            self.date,
            self.unit,
            self.title,
            char_prefix(&self.content, 200)
        )
    }

    /// Everything worth matching keywords against, enriched content preferred.
    pub fn search_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.title, &self.unit, &self.category];
        let tags = self.tags.as_ref().map(|t| t.join(" ")).unwrap_or_default();
        parts.push(&tags);
        if let Some(ref s) = self.summary {
            parts.push(s);
        }
        match self.content_enriched {
            Some(ref c) if !c.is_empty() => parts.push(c),
            _ => parts.push(&self.content),
        }
        parts.retain(|p| !p.is_empty());
        parts.join("\n")
    }

    pub fn attachment_names(&self) -> String {
        self.attachments
            .iter()
            .map(|a| format!("[{}]", a.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<KnowledgeRecord>, AssistantError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let records: Vec<KnowledgeRecord> = serde_json::from_str(&raw)?;
    info!(path = %path.display(), count = records.len(), "loaded records");
    Ok(records)
}

/// Missing files count as empty; malformed files are still an error.
pub fn load_records_or_empty(path: impl AsRef<Path>) -> Result<Vec<KnowledgeRecord>, AssistantError> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "record file not found, treating as empty");
        return Ok(vec![]);
    }
    load_records(path)
}

pub fn save_records(path: impl AsRef<Path>, records: &[KnowledgeRecord]) -> Result<(), AssistantError> {
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path.as_ref(), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_to_empty() {
        let r: KnowledgeRecord = serde_json::from_str(r#"{"title": "公告", "extra": 1}"#).unwrap();
        assert_eq!(r.title, "公告");
        assert!(r.content.is_empty());
        assert!(r.attachments.is_empty());
        assert!(!r.is_valid());
    }

    #[test]
    fn semantic_text_caps_content() {
        let mut r = KnowledgeRecord::new("標題", "字".repeat(300));
        r.date = "2025/09/01".into();
        r.unit = "教務處".into();
        let text = r.semantic_text();
        assert!(text.starts_with("日期:2025/09/01，單位:教務處，標題:標題，內容:"));
        assert_eq!(text.matches('字').count(), 200);
    }

    #[test]
    fn search_text_prefers_enriched_content() {
        let mut r = KnowledgeRecord::new("段考", "原始內容");
        r.content_enriched = Some("【標籤】#考試\n原始內容".into());
        let text = r.search_text();
        assert!(text.contains("【標籤】#考試"));
        assert_eq!(text.matches("原始內容").count(), 1);
    }

    #[test]
    fn unavailable_url_is_not_a_url() {
        let mut r = KnowledgeRecord::new("a", "b");
        r.url = URL_UNAVAILABLE.into();
        assert!(!r.has_url());
        r.url = "https://www.nihs.tp.edu.tw/x".into();
        assert!(r.has_url());
    }
}
