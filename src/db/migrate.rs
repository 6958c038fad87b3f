use rusqlite::{params, Connection};
use crate::error::Result;

/// Schema migrations, embedded at compile time so the binary is
/// self-contained. Names must stay stable once shipped; append only.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_core_tables",
        include_str!("../../migrations/001_core_tables.sql"),
    ),
    (
        "002_batch_checkpoints",
        include_str!("../../migrations/002_batch_checkpoints.sql"),
    ),
];

/// Create schema_migrations table if it doesn't exist
fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get list of applied migrations
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

/// Run all pending migrations inside a transaction per migration
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    ensure_migrations_table(conn)?;

    let applied = get_applied_migrations(conn)?;

    for (version, (name, sql)) in MIGRATIONS.iter().enumerate() {
        if applied.iter().any(|n| n == name) {
            log::debug!("Migration {} already applied, skipping", name);
            continue;
        }

        log::info!("Applying migration {}", name);
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![(version + 1) as i64, name],
        )?;
        tx.commit()?;
    }

    Ok(())
}
