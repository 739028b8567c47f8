use calamine::Data;
use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};

/// A spreadsheet cell, decoupled from any one backend.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl CellValue {
    /// The trimmed text of a text cell; None for every other kind. Name
    /// cells and day labels only count when they are actual text.
    pub fn text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.trim()),
            _ => None,
        }
    }

    /// Human-oriented rendering used when a cell lands in a free-text field.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Bool(b) => {
                if *b {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            CellValue::Time(t) => format!("{:02}:{:02}", t.hour(), t.minute()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Read access to one sheet. Rows and columns are 1-based, matching how the
/// workbooks are discussed with their maintainers; out-of-range reads are
/// Empty, never an error.
pub trait SheetGrid {
    fn row_count(&self) -> u32;
    fn col_count(&self) -> u32;
    fn cell(&self, row: u32, col: u32) -> CellValue;
}

/// In-memory grid; the fixture backend for state-machine and matcher tests,
/// and the snapshot form of a live worksheet.
#[derive(Debug, Default, Clone)]
pub struct VecGrid {
    rows: Vec<Vec<CellValue>>,
    cols: u32,
}

impl VecGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a grid from rows of text, mapping "" to Empty.
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        let mut grid = VecGrid::new();
        for (r, row) in rows.iter().enumerate() {
            for (c, text) in row.iter().enumerate() {
                if !text.is_empty() {
                    grid.set(r as u32 + 1, c as u32 + 1, CellValue::Text((*text).to_string()));
                }
            }
        }
        grid
    }

    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if row == 0 || col == 0 {
            return;
        }
        let r = (row - 1) as usize;
        let c = (col - 1) as usize;
        if self.rows.len() <= r {
            self.rows.resize(r + 1, Vec::new());
        }
        let cells = &mut self.rows[r];
        if cells.len() <= c {
            cells.resize(c + 1, CellValue::Empty);
        }
        cells[c] = value;
        self.cols = self.cols.max(col);
    }
}

impl SheetGrid for VecGrid {
    fn row_count(&self) -> u32 {
        self.rows.len() as u32
    }

    fn col_count(&self) -> u32 {
        self.cols
    }

    fn cell(&self, row: u32, col: u32) -> CellValue {
        if row == 0 || col == 0 {
            return CellValue::Empty;
        }
        self.rows
            .get((row - 1) as usize)
            .and_then(|r| r.get((col - 1) as usize))
            .cloned()
            .unwrap_or(CellValue::Empty)
    }
}

/// Import-direction adapter over a calamine worksheet range.
pub struct RangeGrid {
    range: calamine::Range<Data>,
}

impl RangeGrid {
    pub fn new(range: calamine::Range<Data>) -> Self {
        Self { range }
    }
}

impl SheetGrid for RangeGrid {
    fn row_count(&self) -> u32 {
        match self.range.end() {
            Some((row, _)) => row + 1,
            None => 0,
        }
    }

    fn col_count(&self) -> u32 {
        match self.range.end() {
            Some((_, col)) => col + 1,
            None => 0,
        }
    }

    fn cell(&self, row: u32, col: u32) -> CellValue {
        if row == 0 || col == 0 {
            return CellValue::Empty;
        }
        match self.range.get_value((row - 1, col - 1)) {
            Some(data) => convert_data(data),
            None => CellValue::Empty,
        }
    }
}

fn convert_data(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(excel) => match excel.as_datetime() {
            // Serial values below one day carry no real date part; they are
            // times like 16:00 typed into a day/time cell.
            Some(dt) if dt.date().year() > 1901 => CellValue::DateTime(dt),
            Some(dt) => CellValue::Time(dt.time()),
            None => CellValue::Empty,
        },
        Data::DateTimeIso(s) => match NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            Ok(dt) => CellValue::DateTime(dt),
            Err(_) => CellValue::Text(s.clone()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}

/// Snapshot a live worksheet into a VecGrid so the matching walk stays pure
/// while the worksheet itself remains free for mutation afterwards.
pub fn snapshot_worksheet(ws: &umya_spreadsheet::Worksheet) -> VecGrid {
    let mut grid = VecGrid::new();
    let max_row = ws.get_highest_row();
    let max_col = ws.get_highest_column();
    for row in 1..=max_row {
        for col in 1..=max_col {
            let text = ws.get_value((col, row));
            if !text.is_empty() {
                grid.set(row, col, CellValue::Text(text));
            }
        }
    }
    grid
}
