use chrono::{Datelike, NaiveDate};

use crate::dates::{
    first_of_month, is_weekday_name, looks_like_time, normalise_time, parse_sheet_date,
};
use crate::grid::{CellValue, SheetGrid};
use crate::model::normalise_child_name;
use crate::structure::{BlockColumns, SheetLayout};

/// The month a sheet covers; sheets map to months by worksheet position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetMonth {
    pub year: i32,
    pub month: u32,
}

impl SheetMonth {
    pub fn first_day(&self) -> NaiveDate {
        first_of_month(self.year, self.month)
    }

    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// Day/time/date context carried down one block while scanning. Values are
/// only replaced by new ones encountered in later rows; a fresh weekday
/// clears the time, nothing else resets.
#[derive(Debug, Clone, Default)]
pub struct BlockState {
    pub day: Option<&'static str>,
    pub time: Option<String>,
    pub date: Option<NaiveDate>,
}

impl BlockState {
    /// Advance from the block's day/time column. Weekday text starts a new
    /// day group; a time shape narrows it to one session.
    pub fn observe_day_time(&mut self, value: &CellValue) {
        match value {
            CellValue::Text(raw) => {
                let text = raw.trim();
                if let Some(day) = is_weekday_name(text) {
                    self.day = Some(day);
                    self.time = None;
                } else if looks_like_time(text) {
                    self.time = Some(normalise_time(text));
                }
            }
            CellValue::Time(t) => {
                self.time = Some(format!("{}", t.format("%H:%M")));
            }
            CellValue::DateTime(dt) => {
                self.time = Some(format!("{}", dt.time().format("%H:%M")));
            }
            _ => {}
        }
    }
}

/// One attendance row as read off the sheet, before schedule lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttendance {
    pub child: String,
    pub day: Option<&'static str>,
    pub time: Option<String>,
    pub date: NaiveDate,
    pub attended: bool,
    pub fees_paid: bool,
    pub registration_paid: bool,
    pub badge_awarded: bool,
    pub notes: String,
}

/// One departure row as read off the sheet, before store inheritance.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDeparture {
    pub child: String,
    pub leave_date: Option<NaiveDate>,
    pub leave_month: String,
    pub day: Option<&'static str>,
    pub time: Option<String>,
}

/// Interpret a date cell: native dates pass through, text goes through the
/// normalizer with the sheet's month and year.
pub fn cell_date(value: &CellValue, month: SheetMonth) -> Option<NaiveDate> {
    match value {
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Text(s) => parse_sheet_date(s, month.month, month.year),
        _ => None,
    }
}

/// Flag-cell truthiness: empty is false, "no" beats "yes", any other
/// non-empty value counts as set.
pub fn truthy(value: &CellValue) -> bool {
    match value {
        CellValue::Empty => false,
        CellValue::Bool(b) => *b,
        other => {
            let s = other.display().to_lowercase();
            if s.is_empty() {
                return false;
            }
            if s.contains("no") {
                return false;
            }
            true
        }
    }
}

fn junk_name(name: &str) -> bool {
    name.is_empty() || name.eq_ignore_ascii_case("name") || name.eq_ignore_ascii_case("leavers")
}

/// Walk the attendance region, one independent state machine per block, and
/// emit a record for every real name cell. A block emits nothing until it
/// has seen any of day, carried date, or explicit row date, which keeps
/// stray text above the first day group out of the store.
pub fn extract_attendance(
    grid: &dyn SheetGrid,
    layout: &SheetLayout,
    blocks: &[BlockColumns],
    end_row: u32,
    month: SheetMonth,
) -> Vec<RawAttendance> {
    let mut states: Vec<BlockState> = blocks.iter().map(|_| BlockState::default()).collect();
    let mut out = Vec::new();
    let last = end_row.min(grid.row_count());

    for row in (layout.header_row + 1)..=last {
        for (state, cols) in states.iter_mut().zip(blocks.iter()) {
            if cols.day_col >= 1 {
                state.observe_day_time(&grid.cell(row, cols.day_col));
            }

            let parsed = cell_date(&grid.cell(row, cols.date_col), month);
            if let Some(d) = parsed {
                state.date = Some(d);
            }

            let Some(raw_name) = grid.cell(row, cols.name_col).text().map(str::to_string) else {
                continue;
            };
            let child = normalise_child_name(&raw_name);
            if junk_name(&child) {
                continue;
            }
            if state.day.is_none()
                && state.time.is_none()
                && state.date.is_none()
                && parsed.is_none()
            {
                continue;
            }

            let date = parsed.or(state.date).unwrap_or_else(|| month.first_day());
            out.push(RawAttendance {
                child,
                day: state.day,
                time: state.time.clone(),
                date,
                attended: truthy(&grid.cell(row, cols.attended_col)),
                fees_paid: truthy(&grid.cell(row, cols.fees_col)),
                registration_paid: truthy(&grid.cell(row, cols.registration_col)),
                badge_awarded: truthy(&grid.cell(row, cols.badge_col)),
                notes: grid.cell(row, cols.notes_col).display(),
            });
        }
    }
    out
}

/// Walk the departure region below its header. The departure date sits in
/// the column immediately right of each name column; day/time context is
/// probed from nearby cells when the section does not restate it per row.
pub fn extract_departures(
    grid: &dyn SheetGrid,
    header: &SheetLayout,
    month: SheetMonth,
) -> Vec<RawDeparture> {
    let mut out = Vec::new();
    for row in (header.header_row + 1)..=grid.row_count() {
        for &name_col in &header.name_cols {
            let Some(raw_name) = grid.cell(row, name_col).text().map(str::to_string) else {
                continue;
            };
            let child = normalise_child_name(&raw_name);
            if junk_name(&child) {
                continue;
            }

            let leave_date = cell_date(&grid.cell(row, name_col + 1), month);
            let leave_month = match leave_date {
                Some(d) => format!("{:04}-{:02}", d.year(), d.month()),
                None => month.key(),
            };

            let (day, time) = probe_day_time(grid, row, name_col, header.header_row);
            out.push(RawDeparture {
                child,
                leave_date,
                leave_month,
                day,
                time,
            });
        }
    }
    out
}

/// Same-row cells just left of the name column first; then walk upward in
/// the day/time column for context the section stated once for a group.
fn probe_day_time(
    grid: &dyn SheetGrid,
    row: u32,
    name_col: u32,
    header_row: u32,
) -> (Option<&'static str>, Option<String>) {
    let mut day: Option<&'static str> = None;
    let mut time: Option<String> = None;

    let from = name_col.saturating_sub(4).max(1);
    for col in from..name_col {
        let text = grid.cell(row, col).display();
        if let Some(d) = is_weekday_name(text.trim()) {
            day = Some(d);
        }
        if text.contains(':') {
            let t = normalise_time(text.trim());
            if t.contains(':') {
                time = Some(t);
            }
        }
    }

    if day.is_some() && time.is_some() {
        return (day, time);
    }

    let probe_col = name_col.saturating_sub(1).max(1);
    let floor = header_row.max(row.saturating_sub(12));
    let mut r = row;
    while r > floor {
        let text = grid.cell(r, probe_col).display();
        if day.is_none() {
            if let Some(d) = is_weekday_name(text.trim()) {
                day = Some(d);
            }
        }
        if time.is_none() && text.contains(':') {
            let t = normalise_time(text.trim());
            if t.contains(':') {
                time = Some(t);
            }
        }
        if day.is_some() && time.is_some() {
            break;
        }
        r -= 1;
    }
    (day, time)
}
