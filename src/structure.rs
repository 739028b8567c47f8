use crate::grid::SheetGrid;

/// Header discovery is bounded: name columns must appear in the first rows
/// of a sheet, and a departure header within a short span below its marker.
pub const NAME_HEADER_SCAN_ROWS: u32 = 25;
pub const LEAVER_HEADER_SCAN_ROWS: u32 = 15;
const ROLE_WINDOW: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub header_row: u32,
    pub name_cols: Vec<u32>,
}

/// Find the shared header row: the first of the top rows containing at least
/// one cell whose trimmed text is exactly "Name" (any case). Each hit is one
/// block's name column.
pub fn find_name_columns(grid: &dyn SheetGrid) -> Option<SheetLayout> {
    let last = NAME_HEADER_SCAN_ROWS.min(grid.row_count());
    for row in 1..=last {
        let mut cols = Vec::new();
        for col in 1..=grid.col_count() {
            if let Some(text) = grid.cell(row, col).text() {
                if text.eq_ignore_ascii_case("name") {
                    cols.push(col);
                }
            }
        }
        if !cols.is_empty() {
            return Some(SheetLayout {
                header_row: row,
                name_cols: cols,
            });
        }
    }
    None
}

/// Rows containing a cell exactly matching the marker, case-insensitively.
/// The minimum hit caps the attendance region.
pub fn find_marker_rows(grid: &dyn SheetGrid, marker: &str) -> Vec<u32> {
    let mut hits = Vec::new();
    for row in 1..=grid.row_count() {
        for col in 1..=grid.col_count() {
            if let Some(text) = grid.cell(row, col).text() {
                if text.eq_ignore_ascii_case(marker) {
                    hits.push(row);
                    break;
                }
            }
        }
    }
    hits
}

/// Locate the departure-section header: a row at or below the marker with at
/// least one "Name" cell and at least one header containing "leave".
pub fn find_leaver_header(grid: &dyn SheetGrid, marker_row: u32) -> Option<SheetLayout> {
    let last = (marker_row + LEAVER_HEADER_SCAN_ROWS).min(grid.row_count());
    for row in marker_row..=last {
        let mut cols = Vec::new();
        let mut has_leave = false;
        for col in 1..=grid.col_count() {
            let cell = grid.cell(row, col);
            let Some(text) = cell.text() else {
                continue;
            };
            let lower = text.to_lowercase();
            if lower == "name" {
                cols.push(col);
            }
            if lower.contains("leave") {
                has_leave = true;
            }
        }
        if !cols.is_empty() && has_leave {
            return Some(SheetLayout {
                header_row: row,
                name_cols: cols,
            });
        }
    }
    None
}

/// Resolved role->column map for one attendance block. `day_col` is 0 when
/// the name column is the sheet's first column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockColumns {
    pub name_col: u32,
    pub day_col: u32,
    pub date_col: u32,
    pub attended_col: u32,
    pub fees_col: u32,
    pub registration_col: u32,
    pub badge_col: u32,
    pub notes_col: u32,
    pub recorded_by_col: u32,
}

/// Resolved role->column map for one departure block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaverColumns {
    pub name_col: u32,
    pub day_col: u32,
    pub date_col: u32,
    pub registry_col: u32,
    pub association_col: u32,
    pub board_col: u32,
    pub reason_col: u32,
    pub recorded_by_col: u32,
}

fn header_text(grid: &dyn SheetGrid, header_row: u32, col: u32) -> String {
    if col == 0 || col > grid.col_count() {
        return String::new();
    }
    grid.cell(header_row, col).display().to_lowercase()
}

/// First header right of the name column matching the predicate wins; a
/// fixed positional offset keeps resolution deterministic on malformed or
/// reordered headers.
fn find_col(
    grid: &dyn SheetGrid,
    header_row: u32,
    name_col: u32,
    fallback_offset: u32,
    matches: impl Fn(&str) -> bool,
) -> u32 {
    let last = (name_col + ROLE_WINDOW).min(grid.col_count());
    let mut col = name_col + 1;
    while col <= last {
        if matches(&header_text(grid, header_row, col)) {
            return col;
        }
        col += 1;
    }
    name_col + fallback_offset
}

pub fn resolve_block_columns(grid: &dyn SheetGrid, header_row: u32, name_col: u32) -> BlockColumns {
    BlockColumns {
        name_col,
        day_col: name_col.saturating_sub(1),
        date_col: find_col(grid, header_row, name_col, 1, |t| {
            t.contains("date") && (t.contains("trial") || t.contains("date of"))
        }),
        attended_col: find_col(grid, header_row, name_col, 2, |t| t.contains("attend")),
        fees_col: find_col(grid, header_row, name_col, 3, |t| {
            t.contains("fee") || (t.contains("dd") && t.contains("paid"))
        }),
        registration_col: find_col(grid, header_row, name_col, 4, |t| {
            (t.contains("paid") && t.contains("reg")) || t == "reg" || t.contains("membership")
        }),
        badge_col: find_col(grid, header_row, name_col, 5, |t| {
            t.contains("badge") || (t.contains("added") && t.contains("reg"))
        }),
        notes_col: find_col(grid, header_row, name_col, 6, |t| {
            t.contains("note") || t.contains("medical")
        }),
        recorded_by_col: find_col(grid, header_row, name_col, 7, |t| {
            t.contains("added by") || t == "added"
        }),
    }
}

pub fn resolve_leaver_columns(grid: &dyn SheetGrid, header_row: u32, name_col: u32) -> LeaverColumns {
    LeaverColumns {
        name_col,
        day_col: name_col.saturating_sub(1),
        date_col: find_col(grid, header_row, name_col, 1, |t| {
            t.contains("date") && (t.contains("leave") || t.contains("left"))
        }),
        registry_col: find_col(grid, header_row, name_col, 2, |t| {
            t.contains("register") || t.contains("inactive") || (t.contains("removed") && t.contains("reg"))
        }),
        association_col: find_col(grid, header_row, name_col, 3, |t| {
            t.contains("removed") && (t.contains("assoc") || t.contains("membership"))
        }),
        board_col: find_col(grid, header_row, name_col, 4, |t| t.contains("board")),
        reason_col: find_col(grid, header_row, name_col, 5, |t| t.contains("reason")),
        recorded_by_col: find_col(grid, header_row, name_col, 6, |t| {
            t.contains("added by") || t == "added"
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::VecGrid;

    #[test]
    fn finds_every_name_column_on_one_row() {
        let grid = VecGrid::from_rows(&[
            &["Trials", "", "", ""],
            &["", "Name", "Date of trial", "Name"],
        ]);
        let layout = find_name_columns(&grid).expect("layout");
        assert_eq!(layout.header_row, 2);
        assert_eq!(layout.name_cols, vec![2, 4]);
    }

    #[test]
    fn no_name_columns_is_none() {
        let grid = VecGrid::from_rows(&[&["nothing", "here"]]);
        assert!(find_name_columns(&grid).is_none());
    }

    #[test]
    fn marker_rows_match_exactly_case_insensitive() {
        let grid = VecGrid::from_rows(&[
            &["Name"],
            &["leavers listed below"],
            &["LEAVERS"],
            &["leavers"],
        ]);
        assert_eq!(find_marker_rows(&grid, "LEAVERS"), vec![3, 4]);
    }

    #[test]
    fn headers_resolve_roles_out_of_order() {
        let grid = VecGrid::from_rows(&[&[
            "Monday",
            "Name",
            "Attended",
            "Date of trial",
            "Paid reg",
            "Badge",
            "Fees",
            "Notes",
            "Added by",
        ]]);
        let cols = resolve_block_columns(&grid, 1, 2);
        assert_eq!(cols.day_col, 1);
        assert_eq!(cols.attended_col, 3);
        assert_eq!(cols.date_col, 4);
        assert_eq!(cols.registration_col, 5);
        assert_eq!(cols.badge_col, 6);
        assert_eq!(cols.fees_col, 7);
        assert_eq!(cols.notes_col, 8);
        assert_eq!(cols.recorded_by_col, 9);
    }

    #[test]
    fn missing_headers_fall_back_to_offsets() {
        let grid = VecGrid::from_rows(&[&["", "Name", "", "", "", "", "", ""]]);
        let cols = resolve_block_columns(&grid, 1, 2);
        assert_eq!(cols.date_col, 3);
        assert_eq!(cols.attended_col, 4);
        assert_eq!(cols.fees_col, 5);
        assert_eq!(cols.registration_col, 6);
        assert_eq!(cols.badge_col, 7);
        assert_eq!(cols.notes_col, 8);
        assert_eq!(cols.recorded_by_col, 9);
    }

    #[test]
    fn leaver_header_needs_name_and_leave() {
        let grid = VecGrid::from_rows(&[
            &["LEAVERS"],
            &["some banner"],
            &["", "Name", "Leave date", "Reason"],
        ]);
        let layout = find_leaver_header(&grid, 1).expect("leaver header");
        assert_eq!(layout.header_row, 3);
        assert_eq!(layout.name_cols, vec![2]);
        let cols = resolve_leaver_columns(&grid, 3, 2);
        assert_eq!(cols.date_col, 3);
        assert_eq!(cols.reason_col, 4);
    }

    #[test]
    fn leaver_header_scan_is_bounded() {
        let mut rows: Vec<&[&str]> = vec![&["LEAVERS"]];
        for _ in 0..20 {
            rows.push(&[""]);
        }
        rows.push(&["", "Name", "Leave date"]);
        let grid = VecGrid::from_rows(&rows);
        assert!(find_leaver_header(&grid, 1).is_none());
    }
}
