use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use trialbook::db::open_in_memory;
use trialbook::import::{run_import, ImportConfig};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn set(book: &mut umya_spreadsheet::Spreadsheet, sheet: &str, col: u32, row: u32, text: &str) {
    let ws = book.get_sheet_by_name_mut(sheet).expect("sheet");
    ws.get_cell_mut((col, row)).set_value(text);
}

/// One January sheet with a single block, a LEAVERS section, and the date
/// column headed just "Date" so role resolution exercises its positional
/// fallback.
fn write_fixture_workbook(path: &PathBuf) {
    let mut book = umya_spreadsheet::new_file();
    book.get_sheet_by_name_mut("Sheet1")
        .expect("default sheet")
        .set_name("January");

    let headers = ["", "Name", "Date", "Attended", "Fees", "Reg", "Badge", "Notes", "Added by"];
    for (i, h) in headers.iter().enumerate() {
        if !h.is_empty() {
            set(&mut book, "January", i as u32 + 1, 1, h);
        }
    }
    set(&mut book, "January", 1, 2, "Monday");
    set(&mut book, "January", 1, 3, "16:00");
    set(&mut book, "January", 2, 4, "alice smith");
    set(&mut book, "January", 4, 4, "yes");
    set(&mut book, "January", 8, 4, "asthma");
    set(&mut book, "January", 2, 5, "ben jones");
    set(&mut book, "January", 3, 5, "8 Jan");
    set(&mut book, "January", 4, 5, "no");

    set(&mut book, "January", 1, 7, "LEAVERS");
    set(&mut book, "January", 2, 8, "Name");
    set(&mut book, "January", 3, 8, "Leave date");
    set(&mut book, "January", 4, 8, "Reason");
    set(&mut book, "January", 2, 9, "cara lee");
    set(&mut book, "January", 3, 9, "12 Jan");

    umya_spreadsheet::writer::xlsx::write(&book, path).expect("write workbook");
}

#[test]
fn importing_twice_inserts_once() {
    let source = temp_dir("trialbook-import");
    let workbook = source.join("Millbrook Trials and Leavers 2025.xlsx");
    write_fixture_workbook(&workbook);

    let conn = open_in_memory().expect("open db");
    let cfg = ImportConfig {
        source_root: source.clone(),
        fallback_root: None,
        replace: false,
    };

    let first = run_import(&conn, &cfg).expect("first import");
    assert_eq!(first.attendance_inserted, 2);
    assert_eq!(first.departures_inserted, 1);
    assert_eq!(first.files.len(), 1);
    assert_eq!(first.files[0].unit, "millbrook");
    assert_eq!(first.files[0].year, 2025);
    assert!(!first.files[0].sha256.is_empty());

    let second = run_import(&conn, &cfg).expect("second import");
    assert_eq!(second.attendance_inserted, 0);
    assert_eq!(second.departures_inserted, 0);

    let attendance: i64 = conn
        .query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))
        .expect("count");
    let departures: i64 = conn
        .query_row("SELECT COUNT(*) FROM departures", [], |r| r.get(0))
        .expect("count");
    assert_eq!(attendance, 2);
    assert_eq!(departures, 1);

    std::fs::remove_dir_all(&source).ok();
}

#[test]
fn carried_context_fills_missing_dates_and_sessions() {
    let source = temp_dir("trialbook-import");
    let workbook = source.join("Millbrook Trials and Leavers 2025.xlsx");
    write_fixture_workbook(&workbook);

    let conn = open_in_memory().expect("open db");
    let cfg = ImportConfig {
        source_root: source.clone(),
        fallback_root: None,
        replace: false,
    };
    run_import(&conn, &cfg).expect("import");

    // Alice has no date cell: the carried Monday block and the sheet's month
    // resolve her to the first of January with the carried 16:00 session.
    let (date, session, attended, notes): (String, String, i64, String) = conn
        .query_row(
            "SELECT date, session, attended, notes FROM attendance WHERE child='Alice Smith'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .expect("alice");
    assert_eq!(date, "2025-01-01");
    assert_eq!(session, "16:00");
    assert_eq!(attended, 1);
    assert_eq!(notes, "asthma");

    let (ben_date, ben_attended): (String, i64) = conn
        .query_row(
            "SELECT date, attended FROM attendance WHERE child='Ben Jones'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("ben");
    assert_eq!(ben_date, "2025-01-08");
    assert_eq!(ben_attended, 0);

    // Cara's departure gets month and date from her adjacent cell.
    let (leave_month, leave_date): (String, String) = conn
        .query_row(
            "SELECT leave_month, leave_date FROM departures WHERE child='Cara Lee'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("cara");
    assert_eq!(leave_month, "2025-01");
    assert_eq!(leave_date, "2025-01-12");

    std::fs::remove_dir_all(&source).ok();
}

#[test]
fn missing_source_folder_is_fatal_before_any_clear() {
    let conn = open_in_memory().expect("open db");
    let cfg = ImportConfig {
        source_root: PathBuf::from("/definitely/not/here"),
        fallback_root: None,
        replace: true,
    };
    let err = run_import(&conn, &cfg).expect_err("fatal");
    let fatal = err
        .downcast_ref::<trialbook::import::Fatal>()
        .expect("fatal kind");
    assert_eq!(fatal.exit_code, trialbook::import::EXIT_SOURCE_MISSING);
}

#[test]
fn unreadable_primary_uses_fallback_copy() {
    let source = temp_dir("trialbook-import-src");
    let fallback = temp_dir("trialbook-import-fb");
    // Primary copy is a cloud placeholder, not a real archive.
    std::fs::write(source.join("Millbrook Trials and Leavers 2025.xlsx"), b"stub")
        .expect("write stub");
    let good = fallback.join("Millbrook Trials and Leavers 2025.xlsx");
    write_fixture_workbook(&good);

    let conn = open_in_memory().expect("open db");
    let cfg = ImportConfig {
        source_root: source.clone(),
        fallback_root: Some(fallback.clone()),
        replace: false,
    };
    let summary = run_import(&conn, &cfg).expect("import");
    assert_eq!(summary.attendance_inserted, 2);

    std::fs::remove_dir_all(&source).ok();
    std::fs::remove_dir_all(&fallback).ok();
}
