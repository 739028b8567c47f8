use chrono::{Datelike, NaiveDate};
use std::path::Path;

use crate::dates::{extract_day_name, extract_time, is_weekday_name, month_name, time_matches, weekday_name};
use crate::extract::{cell_date, SheetMonth};
use crate::grid::{snapshot_worksheet, SheetGrid};
use crate::locate::find_unit_workbook;
use crate::model::{unit_by_key, AttendanceFlag, AttendanceRecord, DepartureRecord, LEAVERS_MARKER};
use crate::structure::{
    find_leaver_header, find_marker_rows, find_name_columns, resolve_block_columns,
    resolve_leaver_columns, BlockColumns, LeaverColumns,
};

/// Categorized sync failures. Spreadsheet sync is advisory: the store write
/// has already succeeded, so every failure here surfaces as a non-blocking
/// message rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailure {
    WorkbookNotFound,
    WorkbookUnreadable,
    SheetNotFound,
    ColumnsNotFound,
    SectionNotFound,
    NoSlotFound,
    InvalidRecord,
    SaveFailed,
}

impl SyncFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncFailure::WorkbookNotFound => "workbook-not-found",
            SyncFailure::WorkbookUnreadable => "workbook-unreadable",
            SyncFailure::SheetNotFound => "sheet-not-found",
            SyncFailure::ColumnsNotFound => "columns-not-found",
            SyncFailure::SectionNotFound => "section-not-found",
            SyncFailure::NoSlotFound => "no-slot-found",
            SyncFailure::InvalidRecord => "invalid-record",
            SyncFailure::SaveFailed => "save-failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub ok: bool,
    pub message: String,
}

struct SyncError {
    kind: SyncFailure,
    detail: String,
}

impl SyncError {
    fn new(kind: SyncFailure, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    fn outcome(self) -> SyncOutcome {
        SyncOutcome {
            ok: false,
            message: format!("{}: {}", self.kind.as_str(), self.detail),
        }
    }
}

/// What a sync invocation writes: a whole new row, or one toggled flag.
/// A follow-up-contacted toggle annotates the notes cell instead of
/// rewriting a flag column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Create,
    Flag(AttendanceFlag),
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    row: u32,
    block: usize,
}

struct SlotTarget<'a> {
    child: &'a str,
    date: NaiveDate,
    day: &'static str,
    time: String,
}

/// Walk the attendance region exactly as extraction does and pick the one
/// target cell. A row already naming the child wins when its own date cell
/// matches the record, or the carried day+time does under the AM/PM-tolerant
/// comparison. Only creation may fall back to an empty slot.
fn find_attendance_slot(
    grid: &dyn SheetGrid,
    header_row: u32,
    blocks: &[BlockColumns],
    end_row: u32,
    target: &SlotTarget,
    allow_empty: bool,
    month: SheetMonth,
) -> Option<Slot> {
    let mut days: Vec<Option<&'static str>> = vec![None; blocks.len()];
    let mut times: Vec<String> = vec![String::new(); blocks.len()];
    let mut exact_empty: Option<Slot> = None;
    let mut same_day_empty: Option<Slot> = None;
    let mut any_empty: Option<Slot> = None;

    let last = end_row.min(grid.row_count());
    for row in 1..=last {
        for (i, cols) in blocks.iter().enumerate() {
            let day_txt = if cols.day_col >= 1 {
                grid.cell(row, cols.day_col).display()
            } else {
                String::new()
            };
            if let Some(day) = is_weekday_name(day_txt.trim()) {
                days[i] = Some(day);
            }
            let t = extract_time(&day_txt);
            if !t.is_empty() {
                times[i] = t;
            }

            if row <= header_row {
                continue;
            }

            let name_txt = grid.cell(row, cols.name_col).display();
            let same_day = days[i] == Some(target.day);
            let same_time = if target.time.is_empty() {
                same_day
            } else {
                time_matches(&target.time, &times[i])
            };

            if !name_txt.is_empty() {
                if name_txt.eq_ignore_ascii_case(target.child) {
                    let row_date = cell_date(&grid.cell(row, cols.date_col), month);
                    if row_date == Some(target.date) || (same_day && same_time) {
                        return Some(Slot { row, block: i });
                    }
                }
                continue;
            }

            if same_day && same_time && exact_empty.is_none() {
                exact_empty = Some(Slot { row, block: i });
            }
            if same_day && same_day_empty.is_none() {
                same_day_empty = Some(Slot { row, block: i });
            }
            if any_empty.is_none() {
                any_empty = Some(Slot { row, block: i });
            }
        }
    }

    if !allow_empty {
        return None;
    }
    let mut slot = if target.time.is_empty() {
        same_day_empty.or(exact_empty)
    } else {
        exact_empty
    };
    if slot.is_none() && target.time.is_empty() {
        slot = any_empty;
    }
    slot
}

/// Slot matching for the departure section: same carry-state walk, but the
/// day and time targets are each optional and default to matching.
fn find_leaver_slot(
    grid: &dyn SheetGrid,
    header_row: u32,
    blocks: &[LeaverColumns],
    start_row: u32,
    target_day: Option<&str>,
    target_time: &str,
    child: &str,
) -> Option<Slot> {
    let mut days: Vec<Option<&'static str>> = vec![None; blocks.len()];
    let mut times: Vec<String> = vec![String::new(); blocks.len()];
    let mut exact_empty: Option<Slot> = None;
    let mut same_day_empty: Option<Slot> = None;
    let mut same_time_empty: Option<Slot> = None;

    for row in start_row..=grid.row_count() {
        for (i, cols) in blocks.iter().enumerate() {
            let day_txt = if cols.day_col >= 1 {
                grid.cell(row, cols.day_col).display()
            } else {
                String::new()
            };
            if let Some(day) = is_weekday_name(day_txt.trim()) {
                days[i] = Some(day);
            }
            let t = extract_time(&day_txt);
            if !t.is_empty() {
                times[i] = t;
            }

            if row <= header_row {
                continue;
            }

            let name_txt = grid.cell(row, cols.name_col).display();
            let same_day = match target_day {
                Some(day) => days[i] == Some(day),
                None => true,
            };
            let same_time = if target_time.is_empty() {
                true
            } else {
                time_matches(target_time, &times[i])
            };

            if !name_txt.is_empty() {
                if name_txt.eq_ignore_ascii_case(child) && same_day && same_time {
                    return Some(Slot { row, block: i });
                }
                continue;
            }

            if same_day && same_time && exact_empty.is_none() {
                exact_empty = Some(Slot { row, block: i });
            }
            if same_day && same_day_empty.is_none() {
                same_day_empty = Some(Slot { row, block: i });
            }
            if same_time && same_time_empty.is_none() {
                same_time_empty = Some(Slot { row, block: i });
            }
        }
    }

    exact_empty
        .or(same_day_empty)
        .or(if target_day.is_none() { same_time_empty } else { None })
}

fn yes_cell(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        ""
    }
}

fn flag_value(record: &AttendanceRecord, flag: AttendanceFlag) -> bool {
    match flag {
        AttendanceFlag::Attended => record.attended,
        AttendanceFlag::FeesPaid => record.fees_paid,
        AttendanceFlag::RegistrationPaid => record.registration_paid,
        AttendanceFlag::BadgeAwarded => record.badge_awarded,
        AttendanceFlag::FollowUpContacted => record.follow_up_contacted,
    }
}

fn set_cell(ws: &mut umya_spreadsheet::Worksheet, row: u32, col: u32, text: &str) {
    ws.get_cell_mut((col, row)).set_value(text);
}

/// Push one attendance record into its originating workbook cell(s).
/// Always returns an outcome, never an error: the store is authoritative
/// and sync is best-effort.
pub fn sync_attendance(
    roots: &[&Path],
    record: &AttendanceRecord,
    mode: SyncMode,
    actor_initials: &str,
) -> SyncOutcome {
    match sync_attendance_inner(roots, record, mode, actor_initials) {
        Ok(message) => SyncOutcome { ok: true, message },
        Err(e) => e.outcome(),
    }
}

fn sync_attendance_inner(
    roots: &[&Path],
    record: &AttendanceRecord,
    mode: SyncMode,
    actor_initials: &str,
) -> Result<String, SyncError> {
    let unit = unit_by_key(&record.unit)
        .ok_or_else(|| SyncError::new(SyncFailure::InvalidRecord, format!("unknown unit {}", record.unit)))?;
    let workbook_path = find_unit_workbook(roots, unit, record.date.year()).ok_or_else(|| {
        SyncError::new(
            SyncFailure::WorkbookNotFound,
            format!("no workbook for {} {}", unit.key, record.date.year()),
        )
    })?;
    let mut book = umya_spreadsheet::reader::xlsx::read(&workbook_path)
        .map_err(|e| SyncError::new(SyncFailure::WorkbookUnreadable, format!("{:?}", e)))?;

    let sheet_name = month_name(record.date.month());
    let month = SheetMonth {
        year: record.date.year(),
        month: record.date.month(),
    };

    let grid = {
        let ws = book
            .get_sheet_by_name(sheet_name)
            .ok_or_else(|| SyncError::new(SyncFailure::SheetNotFound, format!("month sheet {}", sheet_name)))?;
        snapshot_worksheet(ws)
    };

    let layout = find_name_columns(&grid)
        .ok_or_else(|| SyncError::new(SyncFailure::ColumnsNotFound, "no Name columns found"))?;
    let markers = find_marker_rows(&grid, LEAVERS_MARKER);
    let end_row = markers
        .iter()
        .min()
        .map(|m| m.saturating_sub(1))
        .unwrap_or_else(|| grid.row_count());
    let blocks: Vec<BlockColumns> = layout
        .name_cols
        .iter()
        .map(|&col| resolve_block_columns(&grid, layout.header_row, col))
        .collect();

    let target = SlotTarget {
        child: &record.child,
        date: record.date,
        day: weekday_name(record.date),
        time: extract_time(&record.session),
    };
    let allow_empty = matches!(mode, SyncMode::Create);
    let slot = find_attendance_slot(&grid, layout.header_row, &blocks, end_row, &target, allow_empty, month)
        .ok_or_else(|| SyncError::new(SyncFailure::NoSlotFound, "no writable slot matched the record"))?;
    let cols = blocks[slot.block].clone();
    let max_col = grid.col_count();

    {
        let ws = book
            .get_sheet_by_name_mut(sheet_name)
            .ok_or_else(|| SyncError::new(SyncFailure::SheetNotFound, format!("month sheet {}", sheet_name)))?;
        match mode {
            SyncMode::Create => {
                set_cell(ws, slot.row, cols.name_col, &record.child);
                if cols.date_col <= max_col {
                    let date_text =
                        format!("{} {}", record.date.day(), record.date.format("%b"));
                    set_cell(ws, slot.row, cols.date_col, &date_text);
                }
                if cols.notes_col <= max_col && !record.notes.trim().is_empty() {
                    set_cell(ws, slot.row, cols.notes_col, record.notes.trim());
                }
                if cols.recorded_by_col <= max_col && !actor_initials.is_empty() {
                    set_cell(ws, slot.row, cols.recorded_by_col, actor_initials);
                }
                for (col, value) in [
                    (cols.attended_col, record.attended),
                    (cols.fees_col, record.fees_paid),
                    (cols.registration_col, record.registration_paid),
                    (cols.badge_col, record.badge_awarded),
                ] {
                    if col <= max_col {
                        set_cell(ws, slot.row, col, yes_cell(value));
                    }
                }
            }
            SyncMode::Flag(AttendanceFlag::FollowUpContacted) => {
                if cols.notes_col > max_col {
                    return Err(SyncError::new(SyncFailure::ColumnsNotFound, "no notes column"));
                }
                let existing = grid.cell(slot.row, cols.notes_col).display();
                if !existing.to_lowercase().contains("contacted") {
                    let annotated = if existing.is_empty() {
                        "Contacted".to_string()
                    } else {
                        format!("{}; contacted", existing)
                    };
                    set_cell(ws, slot.row, cols.notes_col, &annotated);
                }
            }
            SyncMode::Flag(flag) => {
                let col = match flag {
                    AttendanceFlag::Attended => cols.attended_col,
                    AttendanceFlag::FeesPaid => cols.fees_col,
                    AttendanceFlag::RegistrationPaid => cols.registration_col,
                    AttendanceFlag::BadgeAwarded => cols.badge_col,
                    AttendanceFlag::FollowUpContacted => unreachable!("handled above"),
                };
                if col == 0 || col > max_col {
                    return Err(SyncError::new(
                        SyncFailure::ColumnsNotFound,
                        format!("no column resolved for {}", flag.column()),
                    ));
                }
                set_cell(ws, slot.row, col, yes_cell(flag_value(record, flag)));
            }
        }
    }

    umya_spreadsheet::writer::xlsx::write(&book, &workbook_path)
        .map_err(|e| SyncError::new(SyncFailure::SaveFailed, format!("{:?}", e)))?;
    let file_name = workbook_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("workbook");
    Ok(format!("synced to {} ({})", file_name, sheet_name))
}

/// Push one departure record into the LEAVERS section of its workbook.
pub fn sync_departure(
    roots: &[&Path],
    record: &DepartureRecord,
    actor_initials: &str,
) -> SyncOutcome {
    match sync_departure_inner(roots, record, actor_initials) {
        Ok(message) => SyncOutcome { ok: true, message },
        Err(e) => e.outcome(),
    }
}

fn sync_departure_inner(
    roots: &[&Path],
    record: &DepartureRecord,
    actor_initials: &str,
) -> Result<String, SyncError> {
    let leave_date = NaiveDate::parse_from_str(record.leave_date.trim(), "%Y-%m-%d")
        .map_err(|_| SyncError::new(SyncFailure::InvalidRecord, "missing or invalid leave date"))?;
    let unit = unit_by_key(&record.unit)
        .ok_or_else(|| SyncError::new(SyncFailure::InvalidRecord, format!("unknown unit {}", record.unit)))?;
    let workbook_path = find_unit_workbook(roots, unit, leave_date.year()).ok_or_else(|| {
        SyncError::new(
            SyncFailure::WorkbookNotFound,
            format!("no workbook for {} {}", unit.key, leave_date.year()),
        )
    })?;
    let mut book = umya_spreadsheet::reader::xlsx::read(&workbook_path)
        .map_err(|e| SyncError::new(SyncFailure::WorkbookUnreadable, format!("{:?}", e)))?;

    let sheet_name = month_name(leave_date.month());
    let grid = {
        let ws = book
            .get_sheet_by_name(sheet_name)
            .ok_or_else(|| SyncError::new(SyncFailure::SheetNotFound, format!("month sheet {}", sheet_name)))?;
        snapshot_worksheet(ws)
    };

    let markers = find_marker_rows(&grid, LEAVERS_MARKER);
    let Some(&marker) = markers.iter().min() else {
        return Err(SyncError::new(SyncFailure::SectionNotFound, "no LEAVERS marker"));
    };
    let header = find_leaver_header(&grid, marker)
        .ok_or_else(|| SyncError::new(SyncFailure::ColumnsNotFound, "leaver columns not found"))?;
    let blocks: Vec<LeaverColumns> = header
        .name_cols
        .iter()
        .map(|&col| resolve_leaver_columns(&grid, header.header_row, col))
        .collect();

    let target_day = extract_day_name(&record.class_day).unwrap_or_else(|| weekday_name(leave_date));
    let target_time = extract_time(&record.session);
    let slot = find_leaver_slot(
        &grid,
        header.header_row,
        &blocks,
        marker,
        Some(target_day),
        &target_time,
        &record.child,
    )
    .ok_or_else(|| {
        SyncError::new(SyncFailure::NoSlotFound, "no writable leaver slot for the day/time")
    })?;
    let cols = blocks[slot.block].clone();
    let max_col = grid.col_count();

    {
        let ws = book
            .get_sheet_by_name_mut(sheet_name)
            .ok_or_else(|| SyncError::new(SyncFailure::SheetNotFound, format!("month sheet {}", sheet_name)))?;
        set_cell(ws, slot.row, cols.name_col, &record.child);
        if cols.date_col <= max_col {
            set_cell(ws, slot.row, cols.date_col, &leave_date.format("%d %b").to_string());
        }
        for (col, value) in [
            (cols.registry_col, record.removed_from_registry),
            (cols.association_col, record.removed_from_association),
            (cols.board_col, record.added_to_board),
        ] {
            if col <= max_col {
                set_cell(ws, slot.row, col, yes_cell(value));
            }
        }
        if cols.reason_col <= max_col && !record.reason.trim().is_empty() {
            set_cell(ws, slot.row, cols.reason_col, record.reason.trim());
        }
        if cols.recorded_by_col <= max_col && !actor_initials.is_empty() {
            set_cell(ws, slot.row, cols.recorded_by_col, actor_initials);
        }
    }

    umya_spreadsheet::writer::xlsx::write(&book, &workbook_path)
        .map_err(|e| SyncError::new(SyncFailure::SaveFailed, format!("{:?}", e)))?;
    let file_name = workbook_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("workbook");
    Ok(format!("synced to {} ({})", file_name, sheet_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::VecGrid;
    use crate::structure::{find_name_columns, resolve_block_columns};

    fn slot_fixture() -> (VecGrid, u32, Vec<BlockColumns>) {
        let grid = VecGrid::from_rows(&[
            &["", "Name", "Date of trial", "Attended", "Fees", "Reg", "Badge", "Notes"],
            &["Monday", "", "", "", "", "", "", ""],
            &["16:00", "", "", "", "", "", "", ""],
            &["", "Alice Smith", "3 Mar", "yes", "", "", "", ""],
            &["", "", "", "", "", "", "", ""],
            &["Tuesday", "", "", "", "", "", "", ""],
            &["10:00", "", "", "", "", "", "", ""],
            &["", "", "", "", "", "", "", ""],
        ]);
        let layout = find_name_columns(&grid).expect("layout");
        let blocks: Vec<BlockColumns> = layout
            .name_cols
            .iter()
            .map(|&c| resolve_block_columns(&grid, layout.header_row, c))
            .collect();
        (grid, layout.header_row, blocks)
    }

    fn march() -> SheetMonth {
        SheetMonth { year: 2025, month: 3 }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).expect("date")
    }

    #[test]
    fn name_and_date_match_wins() {
        let (grid, header, blocks) = slot_fixture();
        let target = SlotTarget {
            child: "alice smith",
            date: d(3),
            day: "Wednesday",
            time: String::new(),
        };
        let slot = find_attendance_slot(&grid, header, &blocks, grid.row_count(), &target, false, march())
            .expect("slot");
        assert_eq!(slot.row, 4);
    }

    #[test]
    fn name_match_accepts_twelve_hour_shifted_time() {
        let (grid, header, blocks) = slot_fixture();
        // Record says Monday 04:00; the sheet block carries Monday 16:00.
        let target = SlotTarget {
            child: "Alice Smith",
            date: d(10),
            day: "Monday",
            time: "04:00".to_string(),
        };
        let slot = find_attendance_slot(&grid, header, &blocks, grid.row_count(), &target, false, march())
            .expect("slot");
        assert_eq!(slot.row, 4);

        // Same minutes only: 04:15 does not match a 16:00 block.
        let target = SlotTarget {
            child: "Alice Smith",
            date: d(10),
            day: "Monday",
            time: "04:15".to_string(),
        };
        assert!(
            find_attendance_slot(&grid, header, &blocks, grid.row_count(), &target, false, march())
                .is_none()
        );
    }

    #[test]
    fn creation_prefers_exact_day_time_empty_slot() {
        let (grid, header, blocks) = slot_fixture();
        let target = SlotTarget {
            child: "New Kid",
            date: d(11),
            day: "Tuesday",
            time: "10:00".to_string(),
        };
        let slot = find_attendance_slot(&grid, header, &blocks, grid.row_count(), &target, true, march())
            .expect("slot");
        // Row 5 is empty but belongs to the Monday 16:00 block; row 7 is the
        // first empty cell carrying Tuesday 10:00.
        assert_eq!(slot.row, 7);
    }

    #[test]
    fn update_modes_never_take_empty_slots() {
        let (grid, header, blocks) = slot_fixture();
        let target = SlotTarget {
            child: "Nobody Here",
            date: d(11),
            day: "Tuesday",
            time: "10:00".to_string(),
        };
        assert!(
            find_attendance_slot(&grid, header, &blocks, grid.row_count(), &target, false, march())
                .is_none()
        );
    }

    #[test]
    fn dayless_target_falls_back_to_any_empty() {
        let (grid, header, blocks) = slot_fixture();
        let target = SlotTarget {
            child: "New Kid",
            date: d(11),
            day: "Friday",
            time: String::new(),
        };
        let slot = find_attendance_slot(&grid, header, &blocks, grid.row_count(), &target, true, march())
            .expect("slot");
        // No day matches anywhere, so the very first empty name cell wins.
        assert_eq!(slot.row, 2);
    }

    #[test]
    fn leaver_slot_matches_day_context() {
        let grid = VecGrid::from_rows(&[
            &["LEAVERS"],
            &["", "Name", "Leave date", "Reason"],
            &["Monday", "", "", ""],
            &["", "", "", ""],
            &["Saturday", "", "", ""],
            &["", "", "", ""],
        ]);
        let header = find_leaver_header(&grid, 1).expect("header");
        let blocks: Vec<LeaverColumns> = header
            .name_cols
            .iter()
            .map(|&c| resolve_leaver_columns(&grid, header.header_row, c))
            .collect();
        let slot = find_leaver_slot(&grid, header.header_row, &blocks, 1, Some("Saturday"), "", "Zoe Park")
            .expect("slot");
        // First empty name cell after the Saturday label appears.
        assert_eq!(slot.row, 5);
    }
}
