//! SQLite-backed knowledge store with FTS5 keyword search and an in-memory vector index.
//!
//! The whole record set is replaced at start-up and read-only afterwards.
//! Records are also kept as an in-memory snapshot so lookups never touch SQL.

mod fts;
mod vec;

pub use fts::{is_stopword, query_terms};

use std::collections::{BTreeMap, HashMap};
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::AssistantError;
use crate::record::{Attachment, KnowledgeRecord};

pub(crate) fn jieba() -> &'static jieba_rs::Jieba {
    static INSTANCE: OnceLock<jieba_rs::Jieba> = OnceLock::new();
    INSTANCE.get_or_init(jieba_rs::Jieba::new)
}

/// A panic while holding one of the in-memory locks leaves the data intact, so keep using it.
fn read_lock<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|e| {
        tracing::warn!(lock = name, "lock poisoned, recovering");
        PoisonError::into_inner(e)
    })
}

fn write_lock<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|e| {
        tracing::warn!(lock = name, "lock poisoned, recovering");
        PoisonError::into_inner(e)
    })
}

#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// A record plus its row id in the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: KnowledgeRecord,
}

#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub embedded: usize,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK Unified Basic
        | '\u{3400}'..='\u{4DBF}' // CJK Extension A
        | '\u{F900}'..='\u{FAFF}' // CJK Compatibility
        | '\u{3040}'..='\u{30FF}' // Hiragana + Katakana
        | '\u{AC00}'..='\u{D7AF}' // Hangul
    )
}

fn is_cjk_ideograph(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
    )
}

/// Space CJK/latin boundaries and keep only word characters.
/// "line bot怎麼用?" → "line bot 怎麼用"
pub(crate) fn space_boundaries(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    let mut prev_cjk: Option<bool> = None;
    for c in text.chars() {
        if c.is_alphanumeric() || is_cjk(c) {
            let cur = is_cjk(c);
            if let Some(prev) = prev_cjk {
                if cur != prev {
                    out.push(' ');
                }
            }
            out.push(c);
            prev_cjk = Some(cur);
        } else {
            out.push(' ');
            prev_cjk = None;
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Chinese words via jieba (search mode), longer than one char.
pub fn segment(text: &str) -> Vec<String> {
    if !text.chars().any(is_cjk_ideograph) {
        return vec![];
    }
    jieba()
        .cut_for_search(text, false)
        .into_iter()
        .map(str::trim)
        .filter(|w| w.chars().count() > 1 && w.chars().any(is_cjk))
        .map(str::to_string)
        .collect()
}

/// Append jieba segments so the unicode61 tokenizer can match Chinese words.
fn append_segmented(text: &str) -> String {
    let spaced = space_boundaries(text);
    let extra = segment(&spaced);
    if extra.is_empty() {
        spaced
    } else {
        format!("{} {}", spaced, extra.join(" "))
    }
}

/// Stable key for an embedding: the text that was embedded.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    category TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL DEFAULT '',
    unit TEXT NOT NULL DEFAULT '',
    title TEXT NOT NULL,
    url TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    crawled_at TEXT,
    tags TEXT,
    summary TEXT,
    content_enriched TEXT,
    fingerprint TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_category ON records(category);
CREATE INDEX IF NOT EXISTS idx_records_fingerprint ON records(fingerprint);

CREATE TABLE IF NOT EXISTS embeddings (
    fingerprint TEXT NOT NULL,
    model TEXT NOT NULL,
    vector BLOB NOT NULL,
    PRIMARY KEY (fingerprint, model)
);
"#;

// title is weighted separately from the body in bm25
const FTS_SCHEMA: &str =
    "CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(\
     id UNINDEXED, title, body, tokenize='unicode61')";

pub struct KnowledgeDB {
    pool: Pool<SqliteConnectionManager>,
    snapshot: RwLock<Vec<StoredRecord>>,
    vec_index: RwLock<HashMap<i64, Vec<f32>>>,
}

impl KnowledgeDB {
    fn conn(&self) -> Result<PooledConn, AssistantError> {
        self.pool.get().map_err(|e| AssistantError::Internal(format!("pool: {e}")))
    }

    /// Open (or create) a store. `:memory:` gets a private shared-cache database.
    pub fn open(path: &str) -> Result<Self, AssistantError> {
        let pool_size = if path == ":memory:" { 2 } else { 4 };
        let manager = if path == ":memory:" {
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| AssistantError::Internal(format!("pool: {e}")))?;

        let conn = pool.get().map_err(|e| AssistantError::Internal(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(FTS_SCHEMA, [])?;
        drop(conn);

        let db = Self {
            pool,
            snapshot: RwLock::new(Vec::new()),
            vec_index: RwLock::new(HashMap::new()),
        };
        db.reload_snapshot()?;
        Ok(db)
    }

    /// Replace the whole knowledge base. Records without title or content are skipped.
    pub fn replace_all(&self, records: &[KnowledgeRecord]) -> Result<LoadReport, AssistantError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        tx.execute("DELETE FROM records_fts", [])?;

        let mut report = LoadReport::default();
        {
            let mut ins = tx.prepare(
                "INSERT INTO records (id, category, date, unit, title, url, content, attachments, \
                 crawled_at, tags, summary, content_enriched, fingerprint) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            let mut ins_fts = tx.prepare(
                "INSERT INTO records_fts (id, title, body) VALUES (?1, ?2, ?3)",
            )?;
            for r in records {
                if !r.is_valid() {
                    report.skipped += 1;
                    continue;
                }
                let id = report.loaded as i64 + 1;
                let attachments = serde_json::to_string(&r.attachments)?;
                let tags = r.tags.as_ref().map(serde_json::to_string).transpose()?;
                ins.execute(params![
                    id,
                    r.category,
                    r.date,
                    r.unit,
                    r.title,
                    r.url,
                    r.content,
                    attachments,
                    r.crawled_at,
                    tags,
                    r.summary,
                    r.content_enriched,
                    fingerprint(&r.semantic_text()),
                ])?;
                ins_fts.execute(params![
                    id,
                    append_segmented(&r.title),
                    append_segmented(&r.search_text()),
                ])?;
                report.loaded += 1;
            }
        }
        tx.commit()?;
        drop(conn);

        self.reload_snapshot()?;
        write_lock(&self.vec_index, "vec_index").clear();
        tracing::info!(loaded = report.loaded, skipped = report.skipped, "knowledge base replaced");
        Ok(report)
    }

    fn reload_snapshot(&self) -> Result<(), AssistantError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, category, date, unit, title, url, content, attachments, crawled_at, \
             tags, summary, content_enriched FROM records ORDER BY id",
        )?;
        let rows: Vec<StoredRecord> = stmt
            .query_map([], row_to_record)?
            .filter_map(|r| r.map_err(|e| tracing::warn!("row parse: {e}")).ok())
            .collect();
        *write_lock(&self.snapshot, "snapshot") = rows;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<StoredRecord> {
        let snap = read_lock(&self.snapshot, "snapshot");
        // ids are dense and 1-based
        usize::try_from(id - 1)
            .ok()
            .and_then(|i| snap.get(i))
            .filter(|r| r.id == id)
            .cloned()
            .or_else(|| snap.iter().find(|r| r.id == id).cloned())
    }

    pub fn all(&self) -> Vec<StoredRecord> {
        read_lock(&self.snapshot, "snapshot").clone()
    }

    pub fn count(&self) -> usize {
        read_lock(&self.snapshot, "snapshot").len()
    }

    pub fn stats(&self) -> Stats {
        let mut by_category = BTreeMap::new();
        let snap = self.all();
        for r in &snap {
            let key = if r.record.category.is_empty() { "未分類" } else { r.record.category.as_str() };
            *by_category.entry(key.to_string()).or_insert(0) += 1;
        }
        Stats {
            total: snap.len(),
            embedded: read_lock(&self.vec_index, "vec_index").len(),
            by_category,
        }
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StoredRecord> {
    let id: i64 = row.get("id")?;
    let attachments: String = row.get("attachments")?;
    let attachments = serde_json::from_str::<Vec<Attachment>>(&attachments).unwrap_or_else(|e| {
        tracing::warn!(id, error = %e, "unreadable attachments column, using none");
        vec![]
    });
    let tags: Option<String> = row.get("tags")?;
    let tags = tags.and_then(|t| {
        serde_json::from_str::<Vec<String>>(&t)
            .map_err(|e| tracing::warn!(id, error = %e, "unreadable tags column, dropping"))
            .ok()
    });
    Ok(StoredRecord {
        id,
        record: KnowledgeRecord {
            category: row.get("category")?,
            date: row.get("date")?,
            unit: row.get("unit")?,
            title: row.get("title")?,
            url: row.get("url")?,
            content: row.get("content")?,
            attachments,
            crawled_at: row.get("crawled_at")?,
            tags,
            summary: row.get("summary")?,
            content_enriched: row.get("content_enriched")?,
        },
    })
}
