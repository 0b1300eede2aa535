//! School calendar: locating the official calendar PDF and month lookups.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

use crate::error::AssistantError;
use crate::record::KnowledgeRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// "YYYY/MM/DD"
    pub date: String,
    pub event: String,
    #[serde(default)]
    pub category: String,
}

impl CalendarEvent {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        let d = self.date.trim();
        NaiveDate::parse_from_str(d, "%Y/%m/%d")
            .or_else(|_| NaiveDate::parse_from_str(d, "%Y-%m-%d"))
            .ok()
    }
}

pub fn load_calendar(path: impl AsRef<Path>) -> Result<Vec<CalendarEvent>, AssistantError> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&raw)?)
}

/// Calendar events plus the page parents should be pointed at.
#[derive(Debug, Clone, Default)]
pub struct SchoolCalendar {
    pub events: Vec<CalendarEvent>,
    pub source_url: String,
}

impl SchoolCalendar {
    /// Events of the month a question is about, formatted for the prompt.
    /// Falls back to ignoring the year when the calendar file has no match for it.
    pub fn month_block(&self, query: &str, today: NaiveDate) -> Option<(String, u32)> {
        let (year, month) = detect_month(query, today);
        let mut events = events_for_month(&self.events, Some(year), month);
        if events.is_empty() {
            events = events_for_month(&self.events, None, month);
        }
        (!events.is_empty()).then(|| (format_month(&events), month))
    }
}

/// The announcement carrying the official semester calendar PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarSource {
    pub academic_year: u32,
    pub title: String,
    pub date: String,
    pub url: String,
}

static CALENDAR_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{3})學年度(第[一二12]學期)?行事曆").unwrap());

/// Newest "XXX學年度第X學期行事曆" announcement with a PDF attachment,
/// ordered by academic year, then announcement date.
pub fn find_official_calendar(records: &[KnowledgeRecord]) -> Option<CalendarSource> {
    records
        .iter()
        .filter_map(|r| {
            let caps = CALENDAR_TITLE.captures(&r.title)?;
            let year: u32 = caps.get(1)?.as_str().parse().ok()?;
            let pdf = r.attachments.iter().find(|a| a.url.to_lowercase().ends_with(".pdf"))?;
            Some(CalendarSource {
                academic_year: year,
                title: r.title.clone(),
                date: if r.date.is_empty() { "1900/01/01".into() } else { r.date.clone() },
                url: pdf.url.clone(),
            })
        })
        .max_by(|a, b| (a.academic_year, &a.date).cmp(&(b.academic_year, &b.date)))
}

const DATE_WORDS: [&str; 7] = ["何時", "日期", "幾號", "開學", "考試", "放假", "行事曆"];

pub fn is_date_question(query: &str) -> bool {
    DATE_WORDS.iter().any(|w| query.contains(w))
}

fn chinese_month(s: &str) -> Option<u32> {
    // longest first so "十二" isn't read as "十"
    const NAMES: [(&str, u32); 12] = [
        ("十一", 11), ("十二", 12), ("十", 10), ("一", 1), ("二", 2), ("三", 3),
        ("四", 4), ("五", 5), ("六", 6), ("七", 7), ("八", 8), ("九", 9),
    ];
    NAMES.iter().find(|(n, _)| s.ends_with(n)).map(|(_, m)| *m)
}

static MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2}|十[一二]?|[一二三四五六七八九])\s*月").unwrap());

/// The month a question is about: explicit "N月", relative words, else this month.
/// Returns (year, month); the year rolls over for December → January.
pub fn detect_month(query: &str, today: NaiveDate) -> (i32, u32) {
    let (y, m) = (today.year(), today.month());
    if query.contains("下個月") || query.contains("下月") {
        return if m == 12 { (y + 1, 1) } else { (y, m + 1) };
    }
    if query.contains("上個月") || query.contains("上月") {
        return if m == 1 { (y - 1, 12) } else { (y, m - 1) };
    }
    if let Some(caps) = MONTH.captures(query) {
        let raw = &caps[1];
        let month = raw.parse::<u32>().ok().or_else(|| chinese_month(raw));
        if let Some(month) = month.filter(|mm| (1..=12).contains(mm)) {
            // semester calendars run Aug → Jul: early months asked about late in the year mean next year
            let year = if month + 6 < m { y + 1 } else { y };
            return (year, month);
        }
    }
    (y, m)
}

pub fn events_for_month(events: &[CalendarEvent], year: Option<i32>, month: u32) -> Vec<CalendarEvent> {
    let mut out: Vec<CalendarEvent> = events
        .iter()
        .filter(|e| {
            e.parsed_date()
                .is_some_and(|d| d.month() == month && year.is_none_or(|y| d.year() == y))
        })
        .cloned()
        .collect();
    out.sort_by_key(|e| e.parsed_date());
    out
}

pub fn format_month(events: &[CalendarEvent]) -> String {
    events
        .iter()
        .map(|e| {
            if e.category.is_empty() {
                format!("{}：{}", e.date, e.event)
            } else {
                format!("{}：{}（{}）", e.date, e.event, e.category)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
