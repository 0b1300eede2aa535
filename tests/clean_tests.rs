use campusbot::clean::{clean_file, clean_records, dedupe, merge_files, normalize_attachments};
use campusbot::record::{load_records, save_records, Attachment, KnowledgeRecord, URL_UNAVAILABLE};

fn rec(title: &str, date: &str, url: &str) -> KnowledgeRecord {
    let mut r = KnowledgeRecord::new(title, format!("{title} 內容"));
    r.date = date.into();
    r.url = url.into();
    r
}

#[test]
fn dedupe_by_url_then_title_and_date() {
    let records = vec![
        rec("段考公告", "2025/10/01", "https://www.nihs.tp.edu.tw/a"),
        rec("段考公告(更新)", "2025/10/02", "https://www.nihs.tp.edu.tw/a"),
        rec("招生簡章", "2025/03/01", "https://www.nihs.tp.edu.tw/b"),
        rec("招生簡章", "2025/03/01", "https://www.nihs.tp.edu.tw/c"),
        rec("招生簡章", "2025/04/01", "https://www.nihs.tp.edu.tw/d"),
    ];
    let (kept, report) = dedupe(records);

    assert_eq!(report.original, 5);
    assert_eq!(report.after_url, 4);
    assert_eq!(report.after_title_date, 3);
    assert_eq!(report.removed, 2);
    // first occurrence wins
    assert_eq!(kept[0].title, "段考公告");
    assert_eq!(kept[1].url, "https://www.nihs.tp.edu.tw/b");
    assert_eq!(kept[2].date, "2025/04/01");
}

#[test]
fn unavailable_urls_are_not_duplicates_of_each_other() {
    let records = vec![
        rec("校史沿革", "", URL_UNAVAILABLE),
        rec("交通資訊", "", URL_UNAVAILABLE),
        rec("處室電話", "", ""),
    ];
    let (kept, report) = dedupe(records);
    assert_eq!(kept.len(), 3);
    assert_eq!(report.removed, 0);
}

#[test]
fn title_date_match_ignores_surrounding_whitespace() {
    let records = vec![rec("停水通知", "2025/07/01", ""), rec(" 停水通知 ", "2025/07/01 ", "")];
    let (kept, _) = dedupe(records);
    assert_eq!(kept.len(), 1);
}

#[test]
fn attachments_are_absolutized_and_filtered() {
    let mut r = rec("獎學金", "2025/05/01", "https://www.nihs.tp.edu.tw/x");
    r.attachments = vec![
        Attachment { name: "申請表.pdf".into(), url: "/uploads/form.pdf".into() },
        Attachment { name: "申請表.pdf".into(), url: "/uploads/form.pdf".into() },
        Attachment { name: "聯絡我們".into(), url: "mailto:office@nihs.tp.edu.tw".into() },
        Attachment { name: "  ".into(), url: "/uploads/blank.pdf".into() },
        Attachment { name: "簡章.docx".into(), url: "https://cdn.example.org/b.docx".into() },
    ];
    normalize_attachments(&mut r, "https://www.nihs.tp.edu.tw/");

    let urls: Vec<&str> = r.attachments.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://www.nihs.tp.edu.tw/uploads/form.pdf", "https://cdn.example.org/b.docx"]
    );
}

#[test]
fn clean_records_normalizes_before_dedupe() {
    let mut a = rec("行事曆", "2025/08/01", "https://www.nihs.tp.edu.tw/cal");
    a.attachments = vec![Attachment { name: "cal.pdf".into(), url: "/cal.pdf".into() }];
    let b = rec("行事曆", "2025/08/01", "https://www.nihs.tp.edu.tw/cal2");
    let (kept, report) = clean_records(vec![a, b]);
    assert_eq!(report.removed, 1);
    assert_eq!(kept[0].attachments[0].url, "https://www.nihs.tp.edu.tw/cal.pdf");
}

#[test]
fn clean_file_writes_cleaned_copy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("raw.json");
    let output = dir.path().join("clean.json");
    save_records(
        &input,
        &[
            rec("A", "2025/01/01", "https://x/1"),
            rec("A", "2025/01/01", "https://x/1"),
            rec("B", "2025/01/02", "https://x/2"),
        ],
    )
    .unwrap();

    let report = clean_file(&input, &output).unwrap();
    assert_eq!(report.removed, 1);
    let cleaned = load_records(&output).unwrap();
    assert_eq!(cleaned.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);
}

#[test]
fn merge_concatenates_in_order_and_skips_missing() {
    let dir = tempfile::tempdir().unwrap();
    let news = dir.path().join("news.json");
    let pages = dir.path().join("static.json");
    let out = dir.path().join("full.json");
    save_records(&news, &[rec("公告一", "2025/01/01", "https://x/1")]).unwrap();
    save_records(&pages, &[rec("交通資訊", "", URL_UNAVAILABLE), rec("校史", "", URL_UNAVAILABLE)]).unwrap();

    let report = merge_files(&[news.clone(), dir.path().join("missing.json"), pages], &out).unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.inputs[0].1, 1);
    assert_eq!(report.inputs[1].1, 0);

    let merged = load_records(&out).unwrap();
    assert_eq!(merged[0].title, "公告一");
    assert_eq!(merged[2].title, "校史");
}
