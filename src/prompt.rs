//! Prompt text. Everything the model sees is assembled here.

use chrono::{Datelike, NaiveDate};

use crate::db::StoredRecord;
use crate::util::{char_prefix, truncate_chars};

pub const SCHOOL_HOME: &str = "https://www.nihs.tp.edu.tw";

pub const FACT_SHEET: &str = "\
【學校基本資料 (必讀)】
* 現任校長：林俊岳
* 學校地址：臺北市內湖區內湖路一段520號
* 總機電話：(02) 2657-4874
* 學校網址：https://www.nihs.tp.edu.tw";

const ANSWER_GUIDELINES: &str = "\
【回答準則】：
1. 語氣要親切、有禮貌（繁體中文）。
2. **務必附上「網址」**：如果資料中有連結，請直接提供給家長點擊。
3. **提及附件**：如果資料有附件（如 PDF、Word），請提醒家長可以點擊連結下載。
4. 如果資料中沒有答案，請誠實說「目前公告中找不到相關資訊」，建議家長直接聯繫學校。
5. **精確日期**：若問到行事曆或日期，請從檢索資料中精確提取回答。
6. **關聯思考**：如果問題提到特定物品（如泡麵）或人名（如校長），請仔細閱讀檢索資料中的每一項內容（包含內容摘要），只要有相關資訊就必須整理在回答中。";

pub const KEYWORD_SYSTEM_PROMPT: &str = "\
你是內湖高工公告資料庫的搜尋助理。家長會用口語提問，請產生 3-6 個適合在公告標題與內容中搜尋的關鍵字。
規則：
- 使用繁體中文，保留問題中的專有名詞（處室、科別、活動名稱、人名）。
- 把口語轉成公告用語，例如「泡麵」→「合作社」、「開學」→「開學典禮」「註冊」、「放假」→「停課」「補假」。
- 只輸出關鍵字，不要解釋。";

pub const ENRICH_SYSTEM_PROMPT: &str = "\
你是內湖高工的資料整理員。請閱讀公告，產生 3-5 個關鍵字標籤（例如 #高三 #升學 #統測 #教務處）與一句話摘要（包含對象、截止日期）。";

pub const FAQ_SYSTEM_PROMPT: &str = "\
請根據資料提取學校的交通資訊（地址、捷運、公車）與聯絡電話（處室、職稱、姓名、分機）。找不到的欄位請填寫「查無資料」，不要猜測。";

/// Context block for one retrieved record.
pub fn context_block(index: usize, sr: &StoredRecord) -> String {
    let r = &sr.record;
    format!(
        "【資料來源 {n}】\n日期：{date}\n單位：{unit}\n標題：{title}\n網址：{url}\n附件：{att}\n內容摘要：{content}\n--------------------------------\n",
        n = index + 1,
        date = r.date,
        unit = r.unit,
        title = r.title,
        url = r.url,
        att = r.attachment_names(),
        content = truncate_chars(r.summary.as_deref().filter(|s| !s.is_empty()).unwrap_or(&r.content), 200),
    )
}

pub fn context_text(records: &[StoredRecord]) -> String {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| context_block(i, r))
        .collect()
}

/// Calendar background goes first so date questions see it before announcements.
pub fn calendar_section(month_block: &str, source_url: &str) -> String {
    format!("【重點行事曆背景資料】:\n{month_block}\n(參考網址: {source_url})\n---\n")
}

pub fn answer_prompt(query: &str, retrieved: &str, today: NaiveDate) -> String {
    let retrieved = if retrieved.trim().is_empty() { "（無相關資料）" } else { retrieved };
    format!(
        "你是一個親切的內湖高工校園小幫手。\n今天是 {y}/{m}/{d}。\n請根據下方的【檢索資料】回答家長的【問題】：『{query}』\n\n{FACT_SHEET}\n\n{ANSWER_GUIDELINES}\n\n【檢索資料】：\n{retrieved}\n\n【家長問題】：{query}\n",
        y = today.year(),
        m = today.month(),
        d = today.day(),
    )
}

pub fn enrich_user_prompt(title: &str, content: &str) -> String {
    format!("【公告標題】：{title}\n【公告內容】：{}", char_prefix(content, 800))
}

pub fn faq_user_prompt(traffic: &str, contacts: &str) -> String {
    format!(
        "【交通相關資料】：\n{}\n\n【聯絡相關資料】：\n{}",
        char_prefix(traffic, 10_000),
        char_prefix(contacts, 20_000)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Attachment, KnowledgeRecord};

    #[test]
    fn block_lists_attachments_and_caps_content() {
        let mut r = KnowledgeRecord::new("獎學金申請", "申".repeat(250));
        r.url = "https://www.nihs.tp.edu.tw/a".into();
        r.attachments = vec![
            Attachment { name: "申請表.pdf".into(), url: "https://x/1.pdf".into() },
            Attachment { name: "簡章.docx".into(), url: "https://x/2.docx".into() },
        ];
        let block = context_block(0, &StoredRecord { id: 1, record: r });
        assert!(block.starts_with("【資料來源 1】"));
        assert!(block.contains("附件：[申請表.pdf], [簡章.docx]"));
        assert!(block.contains("網址：https://www.nihs.tp.edu.tw/a"));
        assert_eq!(block.matches('申').count(), 200 + 2);
    }

    #[test]
    fn answer_prompt_carries_date_query_and_fallback() {
        let today = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let p = answer_prompt("開學日是哪天", "", today);
        assert!(p.contains("今天是 2025/9/1"));
        assert!(p.contains("『開學日是哪天』"));
        assert!(p.contains("（無相關資料）"));
        assert!(p.contains("現任校長"));
    }
}
