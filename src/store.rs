use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::audit;
use crate::dates::{extract_time, session_label, weekday_name};
use crate::model::{
    AttendanceFlag, AttendanceRecord, DepartureRecord, NewAttendance, NewDeparture,
    ScheduleTemplate, UNITS,
};

/// Insert an attendance record if its natural key (child, unit, date,
/// session) is absent. Returns whether a row actually landed, so importers
/// can count real insertions across re-runs. Session labels are stored
/// time-only and zero-padded, keeping the natural key canonical.
pub fn insert_attendance(conn: &Connection, rec: &NewAttendance) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO attendance(
            id, child, unit, location, session, class_label, date,
            attended, fees_paid, registration_paid, badge_awarded, notes
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &rec.child,
            &rec.unit,
            &rec.location,
            session_label(&rec.session),
            &rec.class_label,
            rec.date.format("%Y-%m-%d").to_string(),
            rec.attended as i64,
            rec.fees_paid as i64,
            rec.registration_paid as i64,
            rec.badge_awarded as i64,
            &rec.notes,
        ),
    )?;
    Ok(changed == 1)
}

/// Insert a departure if (child, unit, leave_month) is absent.
pub fn insert_departure(conn: &Connection, rec: &NewDeparture) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO departures(
            id, child, unit, leave_month, leave_date, class_day, session, class_label,
            removed_from_registry, removed_from_association, added_to_board,
            reason, contact, origin, source_file
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &rec.child,
            &rec.unit,
            &rec.leave_month,
            &rec.leave_date,
            &rec.class_day,
            &rec.session,
            &rec.class_label,
            rec.removed_from_registry as i64,
            rec.removed_from_association as i64,
            rec.added_to_board as i64,
            &rec.reason,
            &rec.contact,
            &rec.origin,
            &rec.source_file,
        ),
    )?;
    Ok(changed == 1)
}

pub fn insert_schedule_template(conn: &Connection, t: &ScheduleTemplate) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO schedule_templates(
            id, unit, location, session_date, weekday, class_label,
            start_time, end_time, source_file
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &t.unit,
            &t.location,
            &t.session_date,
            &t.weekday,
            &t.class_label,
            &t.start_time,
            &t.end_time,
            &t.source_file,
        ),
    )?;
    Ok(changed == 1)
}

/// Replace-mode reset: drops every imported record ahead of a full resync.
/// Callers must gate this behind explicit opt-in and run it only after the
/// fatal-condition checks have passed.
pub fn clear_imported(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("DELETE FROM attendance", [])?;
    conn.execute("DELETE FROM departures", [])?;
    Ok(())
}

/// A session time as imported, plus its +12h twin when the hour could have
/// lost an afternoon marker.
pub fn time_candidates(start: &str) -> Vec<String> {
    if start.is_empty() || !start.contains(':') {
        return Vec::new();
    }
    let mut out = vec![start.to_string()];
    if let Some((h, m)) = start.split_once(':') {
        if let Ok(hour) = h.trim().parse::<u32>() {
            let minute: String = m.chars().take(2).collect();
            if (1..=11).contains(&hour) {
                out.push(format!("{:02}:{}", hour + 12, minute));
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMatch {
    pub class_label: String,
    pub session: String,
    pub matched: bool,
}

/// Backfill the class label from the schedule templates: a date-specific
/// session wins over a recurring weekly one, and each lookup also tries the
/// +12h candidate. The candidate that matched becomes the session label.
pub fn infer_class(
    conn: &Connection,
    unit: &str,
    day: Option<&str>,
    start_time: Option<&str>,
    date: NaiveDate,
) -> anyhow::Result<ClassMatch> {
    let start = match start_time {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => {
            return Ok(ClassMatch {
                class_label: String::new(),
                session: String::new(),
                matched: false,
            })
        }
    };

    let iso = date.format("%Y-%m-%d").to_string();
    for candidate in time_candidates(start) {
        let label: Option<String> = conn
            .query_row(
                "SELECT class_label FROM schedule_templates
                 WHERE unit = ? AND session_date = ? AND substr(start_time, 1, 5) = ?
                 ORDER BY class_label LIMIT 1",
                (unit, &iso, &candidate),
                |row| row.get(0),
            )
            .optional()?;
        if let Some(class_label) = label {
            return Ok(ClassMatch {
                class_label,
                session: candidate,
                matched: true,
            });
        }
    }

    let weekday = match day {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => weekday_name(date).to_string(),
    };
    for candidate in time_candidates(start) {
        let label: Option<String> = conn
            .query_row(
                "SELECT class_label FROM schedule_templates
                 WHERE unit = ? AND weekday = ? AND substr(start_time, 1, 5) = ?
                 ORDER BY class_label LIMIT 1",
                (unit, &weekday, &candidate),
                |row| row.get(0),
            )
            .optional()?;
        if let Some(class_label) = label {
            return Ok(ClassMatch {
                class_label,
                session: candidate,
                matched: true,
            });
        }
    }

    Ok(ClassMatch {
        class_label: String::new(),
        session: start.to_string(),
        matched: false,
    })
}

#[derive(Debug, Clone)]
pub struct PriorAttendance {
    pub session: String,
    pub class_label: String,
    pub date: String,
}

/// Latest attendance for a child at a unit, preferring the given month.
/// Departure rows inherit session and class label from this.
pub fn latest_attendance_for(
    conn: &Connection,
    child: &str,
    unit: &str,
    month: &str,
) -> anyhow::Result<Option<PriorAttendance>> {
    let map = |row: &rusqlite::Row| -> rusqlite::Result<PriorAttendance> {
        Ok(PriorAttendance {
            session: row.get(0)?,
            class_label: row.get(1)?,
            date: row.get(2)?,
        })
    };
    let in_month = conn
        .query_row(
            "SELECT session, class_label, date FROM attendance
             WHERE lower(child) = lower(?) AND unit = ? AND substr(date, 1, 7) = ?
             ORDER BY date DESC LIMIT 1",
            (child, unit, month),
            map,
        )
        .optional()?;
    if in_month.is_some() {
        return Ok(in_month);
    }
    Ok(conn
        .query_row(
            "SELECT session, class_label, date FROM attendance
             WHERE lower(child) = lower(?) AND unit = ?
             ORDER BY date DESC LIMIT 1",
            (child, unit),
            map,
        )
        .optional()?)
}

fn row_to_attendance(row: &rusqlite::Row) -> rusqlite::Result<(AttendanceRecord, String)> {
    let date_text: String = row.get(6)?;
    Ok((
        AttendanceRecord {
            id: row.get(0)?,
            child: row.get(1)?,
            unit: row.get(2)?,
            location: row.get(3)?,
            session: row.get(4)?,
            class_label: row.get(5)?,
            date: NaiveDate::default(),
            attended: row.get::<_, i64>(7)? != 0,
            fees_paid: row.get::<_, i64>(8)? != 0,
            registration_paid: row.get::<_, i64>(9)? != 0,
            badge_awarded: row.get::<_, i64>(10)? != 0,
            follow_up_contacted: row.get::<_, i64>(11)? != 0,
            notes: row.get(12)?,
        },
        date_text,
    ))
}

pub fn get_attendance(conn: &Connection, id: &str) -> anyhow::Result<Option<AttendanceRecord>> {
    let found = conn
        .query_row(
            "SELECT id, child, unit, location, session, class_label, date,
                    attended, fees_paid, registration_paid, badge_awarded,
                    follow_up_contacted, notes
             FROM attendance WHERE id = ?",
            [id],
            row_to_attendance,
        )
        .optional()?;
    match found {
        None => Ok(None),
        Some((mut rec, date_text)) => {
            rec.date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("bad stored date {}: {}", date_text, e))?;
            Ok(Some(rec))
        }
    }
}

/// Update one flag column and return the refreshed record. The write is
/// audited; spreadsheet sync happens afterwards and is best-effort.
pub fn set_attendance_flag(
    conn: &Connection,
    id: &str,
    flag: AttendanceFlag,
    value: bool,
    actor: &str,
) -> anyhow::Result<Option<AttendanceRecord>> {
    let sql = format!("UPDATE attendance SET {} = ? WHERE id = ?", flag.column());
    let changed = conn.execute(&sql, (value as i64, id))?;
    if changed == 0 {
        return Ok(None);
    }
    audit::record(
        conn,
        actor,
        "set_attendance_flag",
        "attendance",
        id,
        "ok",
        &format!("{}={}", flag.column(), value as i64),
    )?;
    get_attendance(conn, id)
}

pub fn get_departure(conn: &Connection, id: &str) -> anyhow::Result<Option<DepartureRecord>> {
    Ok(conn
        .query_row(
            "SELECT id, child, unit, leave_month, leave_date, class_day, session,
                    class_label, removed_from_registry, removed_from_association,
                    added_to_board, reason, contact, origin
             FROM departures WHERE id = ?",
            [id],
            |row| {
                Ok(DepartureRecord {
                    id: row.get(0)?,
                    child: row.get(1)?,
                    unit: row.get(2)?,
                    leave_month: row.get(3)?,
                    leave_date: row.get(4)?,
                    class_day: row.get(5)?,
                    session: row.get(6)?,
                    class_label: row.get(7)?,
                    removed_from_registry: row.get::<_, i64>(8)? != 0,
                    removed_from_association: row.get::<_, i64>(9)? != 0,
                    added_to_board: row.get::<_, i64>(10)? != 0,
                    reason: row.get(11)?,
                    contact: row.get(12)?,
                    origin: row.get(13)?,
                })
            },
        )
        .optional()?)
}

/// Minimum morning sessions before the shift pass considers a unit affected,
/// and the afternoon share that rules it out.
const SHIFT_MIN_MORNING: usize = 10;

/// One-shot correction for a historic import defect: afternoon sessions
/// recorded without a meridiem all landed in hours 1-11. When a non-preschool
/// unit's times are almost entirely in that band, shift them +12h. An audit
/// sentinel per unit guarantees the pass runs at most once, and natural-key
/// collisions leave the conflicting row unshifted.
pub fn shift_afternoon_times(conn: &Connection) -> anyhow::Result<usize> {
    let mut total = 0usize;
    for unit in UNITS.iter().filter(|u| u.key != "preschool") {
        let action = format!("session_time_shift:{}", unit.key);
        if audit::has_action(conn, &action)? {
            continue;
        }

        let mut stmt = conn.prepare("SELECT id, session FROM attendance WHERE unit = ?")?;
        let rows = stmt
            .query_map([unit.key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut morning: Vec<(String, u32, String)> = Vec::new();
        let mut afternoon = 0usize;
        for (id, session) in rows {
            let t = extract_time(&session);
            let Some((hour, minute)) = t.split_once(':').and_then(|(h, m)| {
                Some((h.parse::<u32>().ok()?, m.to_string()))
            }) else {
                continue;
            };
            if (1..=11).contains(&hour) {
                morning.push((id, hour, minute));
            } else if hour >= 12 {
                afternoon += 1;
            }
        }

        if morning.len() < SHIFT_MIN_MORNING || afternoon * 10 > morning.len() {
            continue;
        }

        let mut shifted = 0usize;
        for (id, hour, minute) in &morning {
            let new_session = format!("{:02}:{}", hour + 12, minute);
            shifted += conn.execute(
                "UPDATE OR IGNORE attendance SET session = ? WHERE id = ?",
                (&new_session, id),
            )?;
        }
        audit::record(
            conn,
            "system",
            &action,
            "attendance",
            "",
            "ok",
            &format!("shifted {} of {} morning session labels", shifted, morning.len()),
        )?;
        total += shifted;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn sample(child: &str, date: NaiveDate, session: &str) -> NewAttendance {
        NewAttendance {
            child: child.to_string(),
            unit: "millbrook".to_string(),
            location: "Millbrook".to_string(),
            session: session.to_string(),
            class_label: String::new(),
            date,
            attended: true,
            fees_paid: false,
            registration_paid: false,
            badge_awarded: false,
            notes: String::new(),
        }
    }

    #[test]
    fn natural_key_deduplicates() {
        let conn = open_in_memory().expect("open db");
        let rec = sample("Alice Smith", d(2025, 3, 1), "16:00");
        assert!(insert_attendance(&conn, &rec).expect("insert"));
        assert!(!insert_attendance(&conn, &rec).expect("reinsert"));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn class_inference_prefers_dated_template_and_tries_pm_twin() {
        let conn = open_in_memory().expect("open db");
        insert_schedule_template(
            &conn,
            &ScheduleTemplate {
                unit: "millbrook".to_string(),
                location: "Millbrook".to_string(),
                session_date: String::new(),
                weekday: "Monday".to_string(),
                class_label: "General 1.5hr".to_string(),
                start_time: "16:00".to_string(),
                end_time: "17:30".to_string(),
                source_file: String::new(),
            },
        )
        .expect("template");

        // "4:00" has no weekly 04:00 slot, but its +12h twin does.
        let hit = infer_class(&conn, "millbrook", Some("Monday"), Some("04:00"), d(2025, 3, 3))
            .expect("infer");
        assert!(hit.matched);
        assert_eq!(hit.class_label, "General 1.5hr");
        assert_eq!(hit.session, "16:00");

        let miss = infer_class(&conn, "millbrook", Some("Tuesday"), Some("09:00"), d(2025, 3, 4))
            .expect("infer");
        assert!(!miss.matched);
        assert_eq!(miss.session, "09:00");
        assert_eq!(miss.class_label, "");

        let none = infer_class(&conn, "millbrook", None, None, d(2025, 3, 4)).expect("infer");
        assert!(!none.matched);
        assert_eq!(none.session, "");
    }

    #[test]
    fn departure_inherits_latest_prefer_month() {
        let conn = open_in_memory().expect("open db");
        let mut march = sample("Ben Jones", d(2025, 3, 8), "10:00");
        march.class_label = "March class".to_string();
        insert_attendance(&conn, &march).expect("insert");
        let mut april = sample("Ben Jones", d(2025, 4, 5), "16:00");
        april.class_label = "April class".to_string();
        insert_attendance(&conn, &april).expect("insert");

        let hit = latest_attendance_for(&conn, "ben jones", "millbrook", "2025-03")
            .expect("query")
            .expect("found");
        assert_eq!(hit.class_label, "March class");

        let fallback = latest_attendance_for(&conn, "ben jones", "millbrook", "2025-07")
            .expect("query")
            .expect("found");
        assert_eq!(fallback.class_label, "April class");
    }

    #[test]
    fn afternoon_shift_runs_once_and_skips_preschool() {
        let conn = open_in_memory().expect("open db");
        for i in 0..12 {
            insert_attendance(&conn, &sample(&format!("Kid {}", i), d(2025, 3, 1 + i), "04:00"))
                .expect("insert");
        }
        let mut pre = sample("Pre Kid", d(2025, 3, 1), "09:30");
        pre.unit = "preschool".to_string();
        insert_attendance(&conn, &pre).expect("insert");

        let shifted = shift_afternoon_times(&conn).expect("shift");
        assert_eq!(shifted, 12);
        let after: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM attendance WHERE unit='millbrook' AND session='16:00'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(after, 12);
        let pre_untouched: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM attendance WHERE unit='preschool' AND session='09:30'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(pre_untouched, 1);

        // The sentinel blocks a second pass even though the data would again
        // look shiftable after more morning imports.
        for i in 0..12 {
            insert_attendance(&conn, &sample(&format!("Late {}", i), d(2025, 5, 1 + i), "05:00"))
                .expect("insert");
        }
        assert_eq!(shift_afternoon_times(&conn).expect("shift"), 0);
    }

    #[test]
    fn flag_update_is_audited_and_returned() {
        let conn = open_in_memory().expect("open db");
        insert_attendance(&conn, &sample("Cara Lee", d(2025, 3, 1), "16:00")).expect("insert");
        let id: String = conn
            .query_row("SELECT id FROM attendance LIMIT 1", [], |r| r.get(0))
            .expect("id");
        let updated = set_attendance_flag(&conn, &id, AttendanceFlag::RegistrationPaid, true, "JG")
            .expect("update")
            .expect("row");
        assert!(updated.registration_paid);
        assert!(audit::has_action(&conn, "set_attendance_flag").expect("audit"));
    }
}
