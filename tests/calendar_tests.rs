use campusbot::calendar::{
    detect_month, events_for_month, find_official_calendar, format_month, is_date_question,
    load_calendar, CalendarEvent, SchoolCalendar,
};
use campusbot::record::{Attachment, KnowledgeRecord};
use chrono::NaiveDate;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn event(date: &str, name: &str) -> CalendarEvent {
    CalendarEvent { date: date.into(), event: name.into(), category: String::new() }
}

fn calendar_record(title: &str, date: &str, attachment: &str) -> KnowledgeRecord {
    let mut r = KnowledgeRecord::new(title, "行事曆公告");
    r.date = date.into();
    r.attachments = vec![Attachment { name: "行事曆".into(), url: attachment.into() }];
    r
}

#[test]
fn explicit_month_in_digits_and_chinese() {
    let today = day(2025, 9, 10);
    assert_eq!(detect_month("10月有什麼活動", today), (2025, 10));
    assert_eq!(detect_month("十二月段考何時", today), (2025, 12));
    assert_eq!(detect_month("十一 月放假嗎", today), (2025, 11));
}

#[test]
fn early_months_asked_late_in_year_mean_next_year() {
    let today = day(2025, 11, 15);
    assert_eq!(detect_month("2月開學", today), (2026, 2));
    assert_eq!(detect_month("一月考試", today), (2026, 1));
    // close enough to stay in this year
    assert_eq!(detect_month("6月畢業典禮", today), (2025, 6));
}

#[test]
fn relative_months_roll_over_year() {
    assert_eq!(detect_month("下個月有什麼活動", day(2025, 12, 3)), (2026, 1));
    assert_eq!(detect_month("上個月的段考", day(2026, 1, 3)), (2025, 12));
    assert_eq!(detect_month("下月", day(2025, 4, 1)), (2025, 5));
}

#[test]
fn no_month_means_this_month() {
    assert_eq!(detect_month("什麼時候放假", day(2025, 4, 20)), (2025, 4));
}

#[test]
fn date_questions_detected() {
    assert!(is_date_question("開學是哪一天"));
    assert!(is_date_question("段考何時"));
    assert!(is_date_question("行事曆在哪裡"));
    assert!(!is_date_question("合作社有賣泡麵嗎"));
}

#[test]
fn month_events_sorted_and_year_filtered() {
    let events = vec![
        event("2026/02/20", "第一次段考"),
        event("2026-02-11", "開學日"),
        event("2025/02/12", "去年開學"),
        event("2026/03/01", "校慶"),
        event("not a date", "壞資料"),
    ];
    let feb = events_for_month(&events, Some(2026), 2);
    assert_eq!(feb.iter().map(|e| e.event.as_str()).collect::<Vec<_>>(), vec!["開學日", "第一次段考"]);
    assert_eq!(events_for_month(&events, None, 2).len(), 3);
    assert!(events_for_month(&events, Some(2026), 7).is_empty());
}

#[test]
fn month_format_includes_category() {
    let mut e = event("2026/02/11", "開學日");
    e.category = "教務".into();
    let text = format_month(&[e, event("2026/02/20", "段考")]);
    assert_eq!(text, "2026/02/11：開學日（教務）\n2026/02/20：段考");
}

#[test]
fn month_block_falls_back_to_any_year() {
    let cal = SchoolCalendar {
        events: vec![event("2025/03/08", "親師座談"), event("2026/02/11", "開學日")],
        source_url: "https://www.nihs.tp.edu.tw/cal.pdf".into(),
    };
    let today = day(2025, 11, 15);
    let (block, month) = cal.month_block("2月開學是哪天", today).unwrap();
    assert_eq!(month, 2);
    assert!(block.contains("開學日"));

    // 3月 resolves to 2026, which the file doesn't cover
    let (block, _) = cal.month_block("3月有什麼活動", today).unwrap();
    assert!(block.contains("親師座談"));

    assert!(cal.month_block("8月有什麼活動", today).is_none());
}

#[test]
fn official_calendar_is_newest_year_with_pdf() {
    let records = vec![
        calendar_record("113學年度第2學期行事曆", "2025/01/20", "https://www.nihs.tp.edu.tw/113-2.pdf"),
        calendar_record("114學年度第1學期行事曆", "2025/08/01", "https://www.nihs.tp.edu.tw/114-1.PDF"),
        calendar_record("115學年度行事曆", "2026/07/01", "https://www.nihs.tp.edu.tw/115.docx"),
        calendar_record("段考時程", "2025/09/01", "https://www.nihs.tp.edu.tw/exam.pdf"),
    ];
    let src = find_official_calendar(&records).unwrap();
    assert_eq!(src.academic_year, 114);
    assert_eq!(src.url, "https://www.nihs.tp.edu.tw/114-1.PDF");
}

#[test]
fn same_year_prefers_newer_announcement() {
    let records = vec![
        calendar_record("114學年度第1學期行事曆", "2025/08/01", "https://x/old.pdf"),
        calendar_record("114學年度第1學期行事曆(修正版)", "2025/09/15", "https://x/new.pdf"),
    ];
    assert_eq!(find_official_calendar(&records).unwrap().url, "https://x/new.pdf");
    assert!(find_official_calendar(&[]).is_none());
}

#[test]
fn calendar_file_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calendar.json");
    std::fs::write(&path, r#"[{"date":"2026/02/11","event":"開學日"},{"date":"2026/02/20","event":"段考","category":"教務"}]"#).unwrap();
    let events = load_calendar(&path).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].category, "教務");
}
