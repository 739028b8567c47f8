use anyhow::Context;
use calamine::{open_workbook, Reader, Xlsx};
use chrono::{Datelike, Local};
use log::{info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::audit;
use crate::dates::month_name;
use crate::extract::{extract_attendance, extract_departures, SheetMonth};
use crate::grid::{RangeGrid, SheetGrid};
use crate::locate::{detect_workbook_year, is_supported_workbook, walk_xlsx, workbook_key};
use crate::model::{unit_from_filename, NewAttendance, NewDeparture, UnitSpec, LEAVERS_MARKER};
use crate::store;
use crate::structure::{
    find_leaver_header, find_marker_rows, find_name_columns, resolve_block_columns,
};

pub const EXIT_SOURCE_MISSING: i32 = 2;
pub const EXIT_NO_READABLE_FILES: i32 = 3;

/// A whole-run fatal condition. Import aborts on these before any
/// replace-mode clear, so existing data survives a misconfigured run.
#[derive(Debug)]
pub struct Fatal {
    pub exit_code: i32,
    pub message: String,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Fatal {}

fn fatal(exit_code: i32, message: String) -> anyhow::Error {
    anyhow::Error::new(Fatal { exit_code, message })
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub source_root: PathBuf,
    pub fallback_root: Option<PathBuf>,
    pub replace: bool,
}

#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub file: String,
    pub unit: String,
    pub year: i32,
    pub attendance_inserted: usize,
    pub departures_inserted: usize,
    pub sha256: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub attendance_inserted: usize,
    pub departures_inserted: usize,
    pub shifted_sessions: usize,
    pub files: Vec<FileSummary>,
}

/// Workbooks that are not valid zip archives are partially-synced cloud
/// placeholders or corrupt; probe before parsing so one bad file cannot
/// abort the run.
pub fn is_readable_workbook(path: &Path) -> bool {
    match File::open(path) {
        Ok(file) => zip::ZipArchive::new(file).is_ok(),
        Err(_) => false,
    }
}

pub fn file_digest(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("read {} for digest", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Import every readable candidate workbook under the configured roots.
/// Files are processed strictly sequentially: each workbook is opened, fully
/// parsed, and dropped before the next begins.
pub fn run_import(conn: &rusqlite::Connection, cfg: &ImportConfig) -> anyhow::Result<RunSummary> {
    let source = &cfg.source_root;
    if !source.exists() {
        return Err(fatal(
            EXIT_SOURCE_MISSING,
            format!("source folder not found: {}", source.display()),
        ));
    }
    if !source.is_dir() {
        return Err(fatal(
            EXIT_SOURCE_MISSING,
            format!("source path is not a folder: {}", source.display()),
        ));
    }

    let mut candidates: Vec<PathBuf> = walk_xlsx(source)
        .into_iter()
        .filter(|p| is_supported_workbook(p.file_name().and_then(|s| s.to_str()).unwrap_or("")))
        .collect();

    let mut fallback_lookup: HashMap<String, PathBuf> = HashMap::new();
    let mut fallback_candidates: Vec<PathBuf> = Vec::new();
    if let Some(fallback_root) = cfg.fallback_root.as_deref() {
        if fallback_root.exists() {
            for path in walk_xlsx(fallback_root) {
                let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
                if is_supported_workbook(name) {
                    fallback_candidates.push(path.clone());
                }
                fallback_lookup.entry(workbook_key(name)).or_insert(path);
            }
        }
    }

    if candidates.is_empty() && !fallback_candidates.is_empty() {
        info!("no supported files in the primary folder; using the fallback root");
        candidates = fallback_candidates;
    }
    if candidates.is_empty() {
        return Err(fatal(
            EXIT_NO_READABLE_FILES,
            format!("no supported workbook files found in {}", source.display()),
        ));
    }

    let mut targets: Vec<PathBuf> = Vec::new();
    for file in candidates {
        if is_readable_workbook(&file) {
            targets.push(file);
            continue;
        }
        let name = file.file_name().and_then(|s| s.to_str()).unwrap_or("");
        match fallback_lookup.get(&workbook_key(name)) {
            Some(fallback) if is_readable_workbook(fallback) => {
                warn!(
                    "primary copy unreadable, using fallback for {}",
                    file.display()
                );
                targets.push(fallback.clone());
            }
            _ => warn!("skipping unreadable workbook: {}", file.display()),
        }
    }
    if targets.is_empty() {
        return Err(fatal(
            EXIT_NO_READABLE_FILES,
            "no readable workbook files found; import aborted without clearing data".to_string(),
        ));
    }

    if cfg.replace {
        info!("replace mode: clearing imported attendance and departures");
        store::clear_imported(conn)?;
    }

    let default_year = Local::now().year();
    let mut summary = RunSummary::default();
    for path in targets {
        match import_workbook(conn, &path, default_year) {
            Ok(file_summary) => {
                summary.attendance_inserted += file_summary.attendance_inserted;
                summary.departures_inserted += file_summary.departures_inserted;
                summary.files.push(file_summary);
            }
            Err(e) => {
                warn!("skipping workbook after import error: {}: {:#}", path.display(), e);
            }
        }
    }

    summary.shifted_sessions = store::shift_afternoon_times(conn)?;
    if summary.shifted_sessions > 0 {
        info!(
            "afternoon correction shifted {} session labels",
            summary.shifted_sessions
        );
    }

    audit::record(
        conn,
        "import",
        "import_run",
        "run",
        "",
        "ok",
        &format!(
            "files={} attendance={} departures={}",
            summary.files.len(),
            summary.attendance_inserted,
            summary.departures_inserted
        ),
    )?;
    info!(
        "import complete: {} attendance, {} departures across {} files",
        summary.attendance_inserted,
        summary.departures_inserted,
        summary.files.len()
    );
    Ok(summary)
}

/// Import one workbook. Worksheets map to calendar months by position;
/// anything past December is ignored.
pub fn import_workbook(
    conn: &rusqlite::Connection,
    path: &Path,
    default_year: i32,
) -> anyhow::Result<FileSummary> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();
    let unit = unit_from_filename(&name);
    let year = detect_workbook_year(path).unwrap_or(default_year);
    let sha256 = file_digest(path).unwrap_or_default();
    info!("file {}: unit {} year {}", name, unit.key, year);

    let mut workbook: Xlsx<_> =
        open_workbook(path).with_context(|| format!("open workbook {}", path.display()))?;
    let sheet_names = workbook.sheet_names().to_vec();

    let mut attendance_inserted = 0usize;
    let mut departures_inserted = 0usize;
    for (idx, sheet_name) in sheet_names.iter().enumerate().take(12) {
        let month = SheetMonth {
            year,
            month: idx as u32 + 1,
        };
        let range = workbook
            .worksheet_range(sheet_name)
            .with_context(|| format!("read sheet {}", sheet_name))?;
        let grid = RangeGrid::new(range);
        let (a, d) = import_sheet(conn, &grid, month, unit, &name)?;
        attendance_inserted += a;
        departures_inserted += d;
    }

    info!(
        "  inserted {} attendance, {} departures",
        attendance_inserted, departures_inserted
    );
    Ok(FileSummary {
        file: name,
        unit: unit.key.to_string(),
        year,
        attendance_inserted,
        departures_inserted,
        sha256,
    })
}

/// Parse one month sheet and store what it yields. Sheets are independent:
/// a sheet with no recognizable structure is skipped with a warning.
pub fn import_sheet(
    conn: &rusqlite::Connection,
    grid: &dyn SheetGrid,
    month: SheetMonth,
    unit: &UnitSpec,
    source_file: &str,
) -> anyhow::Result<(usize, usize)> {
    let label = month_name(month.month);
    let Some(layout) = find_name_columns(grid) else {
        warn!("  {}: no Name column found, skipping sheet", label);
        return Ok((0, 0));
    };
    let markers = find_marker_rows(grid, LEAVERS_MARKER);
    let leaver_marker = markers.iter().min().copied();
    let end_row = leaver_marker
        .map(|m| m.saturating_sub(1))
        .unwrap_or_else(|| grid.row_count());

    let blocks: Vec<_> = layout
        .name_cols
        .iter()
        .map(|&col| resolve_block_columns(grid, layout.header_row, col))
        .collect();

    let mut attendance_inserted = 0usize;
    for row in extract_attendance(grid, &layout, &blocks, end_row, month) {
        let hit = store::infer_class(conn, unit.key, row.day, row.time.as_deref(), row.date)?;
        let session = if !hit.session.is_empty() {
            hit.session
        } else {
            row.time.clone().unwrap_or_default()
        };
        let rec = NewAttendance {
            child: row.child,
            unit: unit.key.to_string(),
            location: unit.location.to_string(),
            session,
            class_label: hit.class_label,
            date: row.date,
            attended: row.attended,
            fees_paid: row.fees_paid,
            registration_paid: row.registration_paid,
            badge_awarded: row.badge_awarded,
            notes: row.notes,
        };
        if store::insert_attendance(conn, &rec)? {
            attendance_inserted += 1;
        }
    }

    let mut departures_inserted = 0usize;
    if let Some(marker) = leaver_marker {
        if let Some(header) = find_leaver_header(grid, marker) {
            let mut seen: HashSet<(String, String)> = HashSet::new();
            for row in extract_departures(grid, &header, month) {
                let prior =
                    store::latest_attendance_for(conn, &row.child, unit.key, &row.leave_month)?;
                let (mut session, class_label) = match prior {
                    Some(p) => (p.session, p.class_label),
                    None => (String::new(), String::new()),
                };
                if session.is_empty() {
                    let mut parts: Vec<String> = Vec::new();
                    if let Some(day) = row.day {
                        parts.push(day.to_string());
                    }
                    if let Some(time) = &row.time {
                        parts.push(time.clone());
                    }
                    session = parts.join(" ");
                }

                if !seen.insert((row.child.to_lowercase(), row.leave_month.clone())) {
                    continue;
                }
                let rec = NewDeparture {
                    child: row.child,
                    unit: unit.key.to_string(),
                    leave_month: row.leave_month,
                    leave_date: row
                        .leave_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_default(),
                    class_day: String::new(),
                    session,
                    class_label,
                    removed_from_registry: false,
                    removed_from_association: false,
                    added_to_board: false,
                    reason: String::new(),
                    contact: String::new(),
                    origin: "import".to_string(),
                    source_file: source_file.to_string(),
                };
                if store::insert_departure(conn, &rec)? {
                    departures_inserted += 1;
                }
            }
        }
    }

    info!(
        "  {}: {} attendance, {} departures",
        label, attendance_inserted, departures_inserted
    );
    Ok((attendance_inserted, departures_inserted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::grid::VecGrid;
    use crate::model::unit_by_key;

    #[test]
    fn sheet_import_is_idempotent() {
        let conn = open_in_memory().expect("open db");
        let grid = VecGrid::from_rows(&[
            &["", "Name", "Date of trial", "Attended", "Fees", "Reg", "Badge", "Notes"],
            &["Monday", "", "", "", "", "", "", ""],
            &["16:00", "", "", "", "", "", "", ""],
            &["", "alice smith", "3 Mar", "yes", "", "", "", "new starter"],
            &["", "ben jones", "", "no", "", "", "", ""],
            &["LEAVERS", "", "", "", "", "", "", ""],
            &["", "Name", "Leave date", "Reason", "", "", "", ""],
            &["", "cara lee", "12 Mar", "moved", "", "", "", ""],
        ]);
        let month = SheetMonth { year: 2025, month: 3 };
        let unit = unit_by_key("millbrook").expect("unit");

        let (a1, d1) = import_sheet(&conn, &grid, month, unit, "book.xlsx").expect("import");
        assert_eq!((a1, d1), (2, 1));
        let (a2, d2) = import_sheet(&conn, &grid, month, unit, "book.xlsx").expect("reimport");
        assert_eq!((a2, d2), (0, 0));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn leaver_inherits_session_from_attendance() {
        let conn = open_in_memory().expect("open db");
        let grid = VecGrid::from_rows(&[
            &["", "Name", "Date of trial", "Attended"],
            &["Saturday", "", "", ""],
            &["9:30", "", "", ""],
            &["", "dana frost", "1 Mar", "yes"],
            &["LEAVERS", "", "", ""],
            &["", "Name", "Leave date", ""],
            &["", "DANA FROST", "15 Mar", ""],
        ]);
        let month = SheetMonth { year: 2025, month: 3 };
        let unit = unit_by_key("millbrook").expect("unit");
        import_sheet(&conn, &grid, month, unit, "book.xlsx").expect("import");

        let session: String = conn
            .query_row("SELECT session FROM departures WHERE child='Dana Frost'", [], |r| {
                r.get(0)
            })
            .expect("departure");
        assert_eq!(session, "09:30");
    }

    #[test]
    fn sheet_without_name_columns_is_skipped() {
        let conn = open_in_memory().expect("open db");
        let grid = VecGrid::from_rows(&[&["just", "noise"]]);
        let month = SheetMonth { year: 2025, month: 1 };
        let unit = unit_by_key("harewood").expect("unit");
        let (a, d) = import_sheet(&conn, &grid, month, unit, "book.xlsx").expect("import");
        assert_eq!((a, d), (0, 0));
    }
}
