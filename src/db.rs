use rusqlite::Connection;
use std::path::Path;

pub fn open_db(db_path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            child TEXT NOT NULL,
            unit TEXT NOT NULL,
            location TEXT NOT NULL,
            session TEXT NOT NULL DEFAULT '',
            class_label TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL,
            attended INTEGER NOT NULL DEFAULT 0,
            fees_paid INTEGER NOT NULL DEFAULT 0,
            registration_paid INTEGER NOT NULL DEFAULT 0,
            badge_awarded INTEGER NOT NULL DEFAULT 0,
            follow_up_contacted INTEGER NOT NULL DEFAULT 0,
            notes TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uniq_attendance
         ON attendance(child, unit, date, session)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departures(
            id TEXT PRIMARY KEY,
            child TEXT NOT NULL,
            unit TEXT NOT NULL,
            leave_month TEXT NOT NULL,
            leave_date TEXT NOT NULL DEFAULT '',
            class_day TEXT NOT NULL DEFAULT '',
            session TEXT NOT NULL DEFAULT '',
            class_label TEXT NOT NULL DEFAULT '',
            removed_from_registry INTEGER NOT NULL DEFAULT 0,
            removed_from_association INTEGER NOT NULL DEFAULT 0,
            added_to_board INTEGER NOT NULL DEFAULT 0,
            reason TEXT NOT NULL DEFAULT '',
            contact TEXT NOT NULL DEFAULT '',
            origin TEXT NOT NULL DEFAULT 'import',
            source_file TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uniq_departure
         ON departures(child, unit, leave_month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_templates(
            id TEXT PRIMARY KEY,
            unit TEXT NOT NULL,
            location TEXT NOT NULL,
            session_date TEXT NOT NULL DEFAULT '',
            weekday TEXT NOT NULL,
            class_label TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL DEFAULT '',
            source_file TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uniq_schedule_template
         ON schedule_templates(unit, session_date, weekday, class_label, start_time, end_time)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            actor TEXT NOT NULL DEFAULT '',
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL DEFAULT '',
            entity_id TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'ok',
            details TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log(created_at DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log(action)",
        [],
    )?;

    // Databases created before follow-up tracking or departure contact
    // details need the columns added in place.
    ensure_attendance_follow_up(conn)?;
    ensure_departures_contact(conn)?;

    Ok(())
}

fn ensure_attendance_follow_up(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "follow_up_contacted")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance ADD COLUMN follow_up_contacted INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_departures_contact(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "departures", "contact")? {
        conn.execute(
            "ALTER TABLE departures ADD COLUMN contact TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    if !table_has_column(conn, "departures", "source_file")? {
        conn.execute(
            "ALTER TABLE departures ADD COLUMN source_file TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
