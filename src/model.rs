use chrono::NaiveDate;

/// Filename tokens a supported workbook must carry. Workbooks are one per
/// unit per year, named like "Millbrook Trials and Leavers 2025.xlsx".
pub const TRIAL_TOKEN: &str = "trial";
pub const LEAVER_TOKEN: &str = "leaver";
pub const CANONICAL_PHRASE: &str = "trials and leavers";

/// Marker text opening the departure section of a month sheet.
pub const LEAVERS_MARKER: &str = "LEAVERS";

pub struct UnitSpec {
    pub key: &'static str,
    pub location: &'static str,
    pub tokens: &'static [&'static str],
}

pub const UNITS: [UnitSpec; 3] = [
    UnitSpec {
        key: "preschool",
        location: "Preschool",
        tokens: &["preschool", "pre-school"],
    },
    UnitSpec {
        key: "millbrook",
        location: "Millbrook",
        tokens: &["millbrook"],
    },
    UnitSpec {
        key: "harewood",
        location: "Harewood",
        tokens: &["harewood"],
    },
];

/// Classify a workbook filename into a unit. Falls back to the last unit in
/// the registry, so classification is total.
pub fn unit_from_filename(name: &str) -> &'static UnitSpec {
    let lower = name.to_lowercase();
    for unit in UNITS.iter().take(UNITS.len() - 1) {
        if unit.tokens.iter().any(|t| lower.contains(t)) {
            return unit;
        }
    }
    &UNITS[UNITS.len() - 1]
}

pub fn unit_by_key(key: &str) -> Option<&'static UnitSpec> {
    UNITS.iter().find(|u| u.key == key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceFlag {
    Attended,
    FeesPaid,
    RegistrationPaid,
    BadgeAwarded,
    FollowUpContacted,
}

impl AttendanceFlag {
    pub fn column(&self) -> &'static str {
        match self {
            AttendanceFlag::Attended => "attended",
            AttendanceFlag::FeesPaid => "fees_paid",
            AttendanceFlag::RegistrationPaid => "registration_paid",
            AttendanceFlag::BadgeAwarded => "badge_awarded",
            AttendanceFlag::FollowUpContacted => "follow_up_contacted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub id: String,
    pub child: String,
    pub unit: String,
    pub location: String,
    pub session: String,
    pub class_label: String,
    pub date: NaiveDate,
    pub attended: bool,
    pub fees_paid: bool,
    pub registration_paid: bool,
    pub badge_awarded: bool,
    pub follow_up_contacted: bool,
    pub notes: String,
}

/// Attendance row ready for insertion; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub child: String,
    pub unit: String,
    pub location: String,
    pub session: String,
    pub class_label: String,
    pub date: NaiveDate,
    pub attended: bool,
    pub fees_paid: bool,
    pub registration_paid: bool,
    pub badge_awarded: bool,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct DepartureRecord {
    pub id: String,
    pub child: String,
    pub unit: String,
    pub leave_month: String,
    pub leave_date: String,
    pub class_day: String,
    pub session: String,
    pub class_label: String,
    pub removed_from_registry: bool,
    pub removed_from_association: bool,
    pub added_to_board: bool,
    pub reason: String,
    pub contact: String,
    pub origin: String,
}

#[derive(Debug, Clone)]
pub struct NewDeparture {
    pub child: String,
    pub unit: String,
    pub leave_month: String,
    pub leave_date: String,
    pub class_day: String,
    pub session: String,
    pub class_label: String,
    pub removed_from_registry: bool,
    pub removed_from_association: bool,
    pub added_to_board: bool,
    pub reason: String,
    pub contact: String,
    pub origin: String,
    pub source_file: String,
}

#[derive(Debug, Clone)]
pub struct ScheduleTemplate {
    pub unit: String,
    pub location: String,
    /// ISO date for a one-off session, empty for a recurring weekly slot.
    pub session_date: String,
    pub weekday: String,
    pub class_label: String,
    pub start_time: String,
    pub end_time: String,
    pub source_file: String,
}

/// Title-case a child name, preserving hyphenated and apostrophe parts, and
/// collapsing internal whitespace.
pub fn normalise_child_name(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return String::new();
    }
    let mut words: Vec<String> = Vec::new();
    for word in collapsed.split(' ') {
        let mut rebuilt = String::new();
        let mut segment = String::new();
        for ch in word.chars() {
            if ch == '-' || ch == '\'' {
                rebuilt.push_str(&capitalise(&segment));
                segment.clear();
                rebuilt.push(ch);
            } else {
                segment.push(ch);
            }
        }
        rebuilt.push_str(&capitalise(&segment));
        words.push(rebuilt);
    }
    words.join(" ")
}

fn capitalise(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}
