use std::path::Path;

use turso::{Builder, Connection, Database};

use crate::migrations;

/// Url of a private in-memory index.
pub const IN_MEMORY: &str = ":memory:";

/// The origin index database. Connections are cheap; take one per operation.
pub struct IndexDatabase {
    db: Database,
    url: String,
}

impl IndexDatabase {
    /// Opens or creates the index at `url` and applies pending migrations.
    pub async fn open(url: &str) -> anyhow::Result<Self> {
        if url != IN_MEMORY {
            if let Some(parent) = Path::new(url).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let db = Builder::new_local(url)
            .build()
            .await
            .map_err(|e| anyhow::anyhow!("open index {}: {}", url, e))?;

        let mut conn = db.connect().map_err(anyhow::Error::from)?;
        if url != IN_MEMORY {
            conn.pragma_update("journal_mode", "wal").await?;
        }
        migrations::migrate(&mut conn).await?;

        Ok(Self {
            db,
            url: url.to_string(),
        })
    }

    pub fn connect(&self) -> anyhow::Result<Connection> {
        self.db
            .connect()
            .map_err(|e| anyhow::anyhow!("connect {}: {}", self.url, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_applies_schema() -> anyhow::Result<()> {
        let db = IndexDatabase::open(IN_MEMORY).await?;
        let mut conn = db.connect()?;
        migrations::migrate(&mut conn).await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM origin_index", ()).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| anyhow::anyhow!("no count row"))?;
        let count = row
            .get_value(0)?
            .as_integer()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("count is null"))?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_creates_parent_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let url = dir.path().join("nested").join("index.db");
        let db = IndexDatabase::open(&url.to_string_lossy()).await?;
        db.connect()?;
        assert!(url.exists());
        Ok(())
    }
}
