use turso::Connection;

const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER NOT NULL PRIMARY KEY,
    description TEXT NOT NULL,
    createtime TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "origin index",
    sql: r#"
CREATE TABLE IF NOT EXISTS origin_index (
    origin_hash TEXT NOT NULL,
    with_audio INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    PRIMARY KEY (origin_hash, with_audio)
);
"#,
}];

pub async fn migrate(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute_batch(MIGRATIONS_TABLE_SQL).await?;

    for migration in MIGRATIONS {
        if is_migration_applied(conn, migration.version).await? {
            continue;
        }
        let tx = conn.transaction().await?;
        tx.execute_batch(migration.sql).await?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            (migration.version, migration.description),
        )
        .await?;
        tx.commit().await?;
        log::info!(
            "applied migration {}: {}",
            migration.version,
            migration.description
        );
    }

    Ok(())
}

async fn is_migration_applied(conn: &Connection, version: i64) -> anyhow::Result<bool> {
    let mut rows = conn
        .query("SELECT 1 FROM _migrations WHERE version = ?1", (version,))
        .await?;
    Ok(rows.next().await?.is_some())
}
