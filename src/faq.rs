//! FAQ data (traffic + phone book) and the rule-based answers built on it.
//!
//! Traffic and phone questions are answered straight from this data; the LLM
//! is never asked, so these answers can't drift.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::AssistantError;
use crate::record::KnowledgeRecord;
use crate::util::char_prefix;

/// Marker the extraction prompt uses for "not found".
const NOT_FOUND_MARKER: &str = "查無";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traffic {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub mrt: String,
    #[serde(default)]
    pub bus: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

impl Contact {
    fn new(category: &str, title: &str, phone: &str) -> Self {
        Self {
            category: category.into(),
            title: title.into(),
            name: String::new(),
            phone: phone.into(),
        }
    }

    fn has_phone(&self) -> bool {
        !self.phone.trim().is_empty() && !self.phone.contains(NOT_FOUND_MARKER)
    }

    fn display(&self) -> String {
        if self.name.trim().is_empty() {
            format!("{}：{}", self.title, self.phone)
        } else {
            format!("{}（{}）：{}", self.title, self.name, self.phone)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faq {
    #[serde(default)]
    pub traffic: Traffic,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

impl Faq {
    /// Built-in data used whenever extraction comes back empty.
    pub fn fallback() -> Self {
        Self {
            traffic: Traffic {
                address: "114064 臺北市內湖區內湖路一段520號".into(),
                mrt: "捷運文湖線-港墘站 (2號出口步行約3分鐘)".into(),
                bus: "內捷運港墘站：21、28、110、222、247、267、268、286、287、620、646、677、紅2、藍7、藍26、棕16。港墘派出所站：0東、202、551、646、652、紅3。西湖圖書館站：214、278、552、553、1801、小2、藍20".into(),
            },
            contacts: vec![
                Contact::new("校級", "學校總機", "(02)2657-4874"),
                Contact::new("校級", "校安專線", "(02)2798-9025"),
                Contact::new("處室", "校長室", "分機 301"),
                Contact::new("處室", "秘書", "分機 302"),
                Contact::new("處室", "教務主任", "分機 311"),
                Contact::new("處室", "學務主任", "分機 201"),
                Contact::new("處室", "總務主任", "分機 121"),
                Contact::new("處室", "實習主任", "分機 321"),
                Contact::new("處室", "輔導主任", "分機 401"),
                Contact::new("處室", "圖書館主任", "分機 271"),
            ],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssistantError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Missing or broken FAQ file falls back to the built-in data.
    pub fn load_or_fallback(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::fallback();
        }
        match Self::load(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "FAQ file unreadable, using fallback");
                Self::fallback()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AssistantError> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn switchboard(&self) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.title.contains("總機"))
    }
}

fn usable(value: &str) -> bool {
    !value.trim().is_empty() && !value.contains(NOT_FOUND_MARKER) && value.chars().count() >= 5
}

/// Combine extracted data with the fallback, field by field.
///
/// Fallback contacts keep their order; an extracted entry with the same title
/// replaces one when it has a usable phone. New titles are appended.
pub fn merge_with_fallback(extracted: Option<Faq>) -> Faq {
    let fallback = Faq::fallback();
    let Some(ai) = extracted else { return fallback };

    let pick = |ai: &str, fb: &str| if usable(ai) { ai.to_string() } else { fb.to_string() };
    let traffic = Traffic {
        address: pick(&ai.traffic.address, &fallback.traffic.address),
        mrt: pick(&ai.traffic.mrt, &fallback.traffic.mrt),
        bus: pick(&ai.traffic.bus, &fallback.traffic.bus),
    };

    let mut contacts: Vec<Contact> = fallback
        .contacts
        .iter()
        .map(|fb| {
            ai.contacts
                .iter()
                .find(|c| c.title == fb.title && c.has_phone())
                .cloned()
                .unwrap_or_else(|| fb.clone())
        })
        .collect();
    for c in &ai.contacts {
        let known = fallback.contacts.iter().any(|fb| fb.title == c.title);
        if !known && c.has_phone() && !c.title.trim().is_empty() {
            contacts.push(c.clone());
        }
    }

    Faq { traffic, contacts }
}

const TRAFFIC_WORDS: [&str; 5] = ["地址", "捷運", "公車", "路線", "交通"];
const CONTACT_WORDS: [&str; 6] = ["電話", "分機", "總機", "主任", "組長", "校長"];

/// Text the FAQ extractor reads: (traffic, contacts).
pub fn filter_context(records: &[KnowledgeRecord]) -> (String, String) {
    let mut traffic = Vec::new();
    let mut contacts = Vec::new();
    for r in records {
        let full = format!("{}\n{}", r.title, r.content);
        if TRAFFIC_WORDS.iter().any(|k| full.contains(k)) {
            traffic.push(char_prefix(&full, 1000).to_string());
        }
        if CONTACT_WORDS.iter().any(|k| full.contains(k)) {
            contacts.push(char_prefix(&full, 3000).to_string());
        }
    }
    (traffic.join("\n"), contacts.join("\n"))
}

const TRAFFIC_TRIGGERS: [&str; 6] = ["地址", "捷運", "公車", "交通", "怎麼去", "在哪"];
const PHONE_TRIGGERS: [&str; 3] = ["電話", "分機", "總機"];

/// Answer traffic and phone questions directly. `None` means "ask the model".
pub fn check_rules(faq: &Faq, query: &str) -> Option<String> {
    let q = query.trim();
    if q.is_empty() {
        return None;
    }

    if PHONE_TRIGGERS.iter().any(|k| q.contains(k)) {
        let matched: Vec<&Contact> = faq
            .contacts
            .iter()
            .filter(|c| !c.title.is_empty() && c.has_phone() && mentions_title(q, &c.title))
            .collect();
        let mut lines = vec!["📞 內湖高工聯絡資訊：".to_string()];
        if matched.is_empty() {
            if let Some(main) = faq.switchboard() {
                lines.push(main.display());
            }
            lines.extend(
                faq.contacts
                    .iter()
                    .filter(|c| c.has_phone() && !c.title.contains("總機"))
                    .map(Contact::display),
            );
        } else {
            lines.extend(matched.iter().map(|c| c.display()));
            if let Some(main) = faq.switchboard() {
                if !matched.iter().any(|c| c.title == main.title) {
                    lines.push(format!("（分機請先撥{}）", main.display()));
                }
            }
        }
        return Some(lines.join("\n"));
    }

    if TRAFFIC_TRIGGERS.iter().any(|k| q.contains(k)) {
        let t = &faq.traffic;
        return Some(format!(
            "🚌 內湖高工交通資訊：\n📍 地址：{}\n🚇 捷運：{}\n🚌 公車：{}",
            t.address, t.mrt, t.bus
        ));
    }

    None
}

/// "教務處電話" should hit "教務主任": compare on the first two chars of the title too.
fn mentions_title(query: &str, title: &str) -> bool {
    if query.contains(title) {
        return true;
    }
    let stem = char_prefix(title, 2);
    stem.chars().count() == 2 && query.contains(stem)
}
