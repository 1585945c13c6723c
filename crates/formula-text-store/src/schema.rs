use rusqlite::Connection;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    // Scratch database: nothing needs to survive a crash, so skip the journal entirely.
    conn.pragma_update_and_check(None, "journal_mode", "OFF", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "OFF")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
          idx INTEGER PRIMARY KEY,
          payload BLOB NOT NULL
        );

        -- Canonical key -> index. Keys are HMAC digests when the store is encrypted.
        CREATE TABLE IF NOT EXISTS record_keys (
          key BLOB PRIMARY KEY,
          idx INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}
