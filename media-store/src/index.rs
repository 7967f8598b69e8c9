use std::fmt;

use turso::{Connection, Row};

/// Identity of a source as requested: its content hash and the audio flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginKey {
    pub hash: String,
    pub with_audio: bool,
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, if self.with_audio { "av" } else { "v" })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub origin: OriginKey,
    pub content_hash: String,
}

pub async fn by_origin(origin: &OriginKey, conn: &Connection) -> anyhow::Result<Option<String>> {
    let mut rows = conn
        .query(
            "SELECT content_hash FROM origin_index WHERE origin_hash = ?1 AND with_audio = ?2 LIMIT 1",
            (origin.hash.as_str(), origin.with_audio as i64),
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(
            row.get_value(0)?
                .as_text()
                .ok_or_else(|| anyhow::anyhow!("content_hash is null"))?
                .to_owned(),
        )),
        None => Ok(None),
    }
}

pub async fn all(conn: &Connection) -> anyhow::Result<Vec<IndexEntry>> {
    let mut rows = conn
        .query(
            "SELECT origin_hash, with_audio, content_hash FROM origin_index ORDER BY origin_hash, with_audio",
            (),
        )
        .await?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next().await? {
        entries.push(row_to_entry(&row)?);
    }
    Ok(entries)
}

/// Inserts or replaces the mapping for `entry.origin`.
pub async fn upsert(entry: &IndexEntry, conn: &mut Connection) -> anyhow::Result<()> {
    let tx = conn.transaction().await?;
    tx.execute(
        "DELETE FROM origin_index WHERE origin_hash = ?1 AND with_audio = ?2",
        (entry.origin.hash.as_str(), entry.origin.with_audio as i64),
    )
    .await?;
    tx.execute(
        "INSERT INTO origin_index (origin_hash, with_audio, content_hash) VALUES (?1, ?2, ?3)",
        (
            entry.origin.hash.as_str(),
            entry.origin.with_audio as i64,
            entry.content_hash.as_str(),
        ),
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn clear(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("DELETE FROM origin_index", ()).await?;
    Ok(())
}

fn row_to_entry(row: &Row) -> anyhow::Result<IndexEntry> {
    let hash = row
        .get_value(0)?
        .as_text()
        .ok_or_else(|| anyhow::anyhow!("origin_hash is null"))?
        .to_owned();
    let with_audio = row
        .get_value(1)?
        .as_integer()
        .ok_or_else(|| anyhow::anyhow!("with_audio is null"))?
        .to_owned()
        != 0;
    let content_hash = row
        .get_value(2)?
        .as_text()
        .ok_or_else(|| anyhow::anyhow!("content_hash is null"))?
        .to_owned();
    Ok(IndexEntry {
        origin: OriginKey { hash, with_audio },
        content_hash,
    })
}
