use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::model::{UnitSpec, CANONICAL_PHRASE, LEAVER_TOKEN, TRIAL_TOKEN};

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(20\d{2})").expect("year regex"));

#[derive(Debug, Clone)]
pub struct WorkbookCandidate {
    pub path: PathBuf,
    pub score: i32,
}

/// Recursively collect .xlsx files under a root, sorted by path, skipping
/// editor temporaries. Unreadable directories are treated as empty.
pub fn walk_xlsx(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    collect_xlsx(root, &mut out);
    out.sort();
    out
}

fn collect_xlsx(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_xlsx(&path, out);
            continue;
        }
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if name.starts_with("~$") {
            continue;
        }
        if path
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| e.eq_ignore_ascii_case("xlsx"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
}

/// A supported workbook names both record kinds it carries.
pub fn is_supported_workbook(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains(TRIAL_TOKEN) && lower.contains(LEAVER_TOKEN)
}

/// Filenames are compared across roots by their alphanumeric core, so a
/// fallback copy matches its cloud original despite spacing or punctuation.
pub fn workbook_key(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Year carried by a workbook: first 20xx in the filename, else a path
/// component that is exactly a year, innermost first.
pub fn detect_workbook_year(path: &Path) -> Option<i32> {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    if let Some(caps) = YEAR_RE.captures(name) {
        return caps[1].parse().ok();
    }
    for part in path.iter().rev() {
        let text = part.to_str().unwrap_or("");
        if text.len() == 4 && text.starts_with("20") && text.chars().all(|c| c.is_ascii_digit()) {
            return text.parse().ok();
        }
    }
    None
}

/// Candidates for one unit and year under one root, best first. Scoring
/// favors the year appearing in the path and again in the filename, with a
/// small bonus for the canonical naming phrase; ties break lexically.
pub fn candidate_workbooks(root: &Path, unit: &UnitSpec, year: i32) -> Vec<WorkbookCandidate> {
    let year_text = year.to_string();
    let mut out: Vec<WorkbookCandidate> = Vec::new();
    for path in walk_xlsx(root) {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !is_supported_workbook(&name) {
            continue;
        }
        if !unit.tokens.iter().any(|t| name.contains(t)) {
            continue;
        }
        let mut score = 0;
        if path.to_string_lossy().contains(&year_text) {
            score += 2;
        }
        if name.contains(&year_text) {
            score += 2;
        }
        if name.contains(CANONICAL_PHRASE) {
            score += 1;
        }
        out.push(WorkbookCandidate { path, score });
    }
    out.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| {
                a.path
                    .to_string_lossy()
                    .to_lowercase()
                    .cmp(&b.path.to_string_lossy().to_lowercase())
            })
    });
    out
}

/// Best-matching workbook for a unit/year across ordered roots; the first
/// root with any candidate wins. Absence is a normal result.
pub fn find_unit_workbook(roots: &[&Path], unit: &UnitSpec, year: i32) -> Option<PathBuf> {
    for root in roots {
        if !root.exists() {
            continue;
        }
        let matches = candidate_workbooks(root, unit, year);
        if let Some(best) = matches.into_iter().next() {
            return Some(best.path);
        }
    }
    None
}
