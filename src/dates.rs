use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

static ORDINAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)\b").expect("ordinal regex"));
static OF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bof\b").expect("of regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static TIME_FULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{1,2}):(\d{2})(?::\d{2})?\s*([ap]m)?$").expect("time regex"));
static TIME_ANY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("time regex"));
static TIME_LEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}").expect("time regex"));

pub fn month_name(month: u32) -> &'static str {
    MONTH_NAMES[(month.clamp(1, 12) - 1) as usize]
}

pub fn is_weekday_name(text: &str) -> Option<&'static str> {
    WEEKDAY_NAMES.iter().find(|d| **d == text).copied()
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Find a weekday name mentioned anywhere in free text, word-bounded.
pub fn extract_day_name(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    for day in WEEKDAY_NAMES.iter() {
        let target = day.to_lowercase();
        if lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == target)
        {
            return Some(day);
        }
    }
    None
}

/// First day of a sheet's month. Always resolvable for months 1..=12.
pub fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month.clamp(1, 12), 1)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 1, 1).expect("january exists"))
}

fn clean_date_text(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let no_ordinals = ORDINAL_RE.replace_all(&lower, "$1");
    let no_filler = OF_RE.replace_all(&no_ordinals, " ");
    WS_RE.replace_all(no_filler.trim(), " ").to_string()
}

/// Parse heterogeneous sheet date text into a concrete date, supplementing
/// the sheet's month and year where the text omits them. Returns None when
/// nothing matches; never panics.
pub fn parse_sheet_date(raw: &str, sheet_month: u32, sheet_year: i32) -> Option<NaiveDate> {
    let s = clean_date_text(raw);
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(d) = NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&s, "%d/%m/%Y") {
        return Some(d);
    }

    // Day/month forms take the year from the sheet.
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{}/{}", s, sheet_year), "%d/%m/%Y") {
        return Some(d);
    }
    for fmt in ["%d-%b %Y", "%d %b %Y", "%d%b %Y", "%d %B %Y", "%d%B %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{} {}", s, sheet_year), fmt) {
            return Some(d);
        }
    }

    // Last resort: a bare day number inside the sheet's own month.
    NaiveDate::parse_from_str(
        &format!("{} {} {}", s, month_name(sheet_month).to_lowercase(), sheet_year),
        "%d %B %Y",
    )
    .ok()
}

/// True when the text starts with an H:MM shape.
pub fn looks_like_time(text: &str) -> bool {
    TIME_LEAD_RE.is_match(text.trim())
}

/// Canonicalize a time label to 24-hour HH:MM, honoring a trailing am/pm
/// marker. Unparseable input is returned trimmed but otherwise untouched.
pub fn normalise_time(raw: &str) -> String {
    let s = raw.trim();
    let caps = match TIME_FULL_RE.captures(s) {
        Some(c) => c,
        None => return s.to_string(),
    };
    let mut hour: u32 = match caps[1].parse() {
        Ok(h) => h,
        Err(_) => return s.to_string(),
    };
    let minute: u32 = match caps[2].parse() {
        Ok(m) => m,
        Err(_) => return s.to_string(),
    };
    if minute > 59 {
        return s.to_string();
    }
    match caps.get(3).map(|m| m.as_str().to_lowercase()) {
        Some(meridiem) => {
            if !(1..=12).contains(&hour) {
                return s.to_string();
            }
            if meridiem == "am" {
                if hour == 12 {
                    hour = 0;
                }
            } else if hour != 12 {
                hour += 12;
            }
        }
        None => {
            if hour > 23 {
                return s.to_string();
            }
        }
    }
    format!("{:02}:{:02}", hour, minute)
}

/// Locate the first H:MM pattern anywhere in the text and zero-pad it.
/// Returns "" when no time shape is present.
pub fn extract_time(text: &str) -> String {
    match TIME_ANY_RE.captures(text.trim()) {
        Some(caps) => {
            let hour: u32 = caps[1].parse().unwrap_or(0);
            format!("{:02}:{}", hour, &caps[2])
        }
        None => String::new(),
    }
}

/// AM/PM-tolerant comparison: times match when the minutes are equal and the
/// hours are equal or differ by exactly 12. Compensates for historic imports
/// that recorded afternoon sessions without a meridiem.
pub fn time_matches(target: &str, observed: &str) -> bool {
    let t = extract_time(target);
    let o = extract_time(observed);
    if t.is_empty() || o.is_empty() {
        return false;
    }
    if t == o {
        return true;
    }
    let (Some((th, tm)), Some((oh, om))) = (split_hm(&t), split_hm(&o)) else {
        return false;
    };
    if tm != om {
        return false;
    }
    (th + 12) % 24 == oh || (oh + 12) % 24 == th
}

fn split_hm(t: &str) -> Option<(u32, u32)> {
    let (h, m) = t.split_once(':')?;
    Some((h.parse().ok()?, m.parse().ok()?))
}

/// Session labels are stored time-only (e.g. "16:00"). Zero-pads the first
/// time shape found; passes anything else through trimmed.
pub fn session_label(value: &str) -> String {
    let s = value.trim();
    if s.is_empty() {
        return String::new();
    }
    let t = extract_time(s);
    if t.is_empty() {
        s.to_string()
    } else {
        t
    }
}
