use rusqlite::Connection;
use uuid::Uuid;

/// Append one audit entry. The audit log doubles as the sentinel store for
/// one-shot corrective passes, so writes here must never be skipped when the
/// action they describe went ahead.
pub fn record(
    conn: &Connection,
    actor: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    status: &str,
    details: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO audit_log(id, actor, action, entity_type, entity_id, status, details)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            actor,
            action,
            entity_type,
            entity_id,
            status,
            details,
        ),
    )?;
    Ok(())
}

/// Whether any entry with this action has ever been recorded.
pub fn has_action(conn: &Connection, action: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM audit_log WHERE action = ?",
        [action],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn sentinel_actions_are_visible_once_recorded() {
        let conn = open_in_memory().expect("open db");
        assert!(!has_action(&conn, "session_time_shift:millbrook").expect("query"));
        record(
            &conn,
            "import",
            "session_time_shift:millbrook",
            "attendance",
            "",
            "ok",
            "shifted 14 sessions",
        )
        .expect("record");
        assert!(has_action(&conn, "session_time_shift:millbrook").expect("query"));
    }
}
