use std::{
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use media_bus::SourceLocator;
use tokio::sync::Mutex;

use crate::{
    db::IndexDatabase,
    hash,
    index::{self, IndexEntry, OriginKey},
};

pub const OUTPUT_EXTENSION: &str = "mp4";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Flat directory of `<hash>.mp4` outputs.
    pub storage_dir: PathBuf,
    /// Scratch directory for in-flight outputs. Wiped on open.
    pub processing_dir: PathBuf,
    pub index_url: String,
}

/// Processed outputs keyed by content hash, plus the origin index.
///
/// Index writes and clearing are serialized, and lookups take the same lock
/// so they never observe a half cleared store.
pub struct ContentStore {
    storage_dir: PathBuf,
    processing_dir: PathBuf,
    db: IndexDatabase,
    lock: Mutex<()>,
}

impl ContentStore {
    pub async fn open(config: StoreConfig) -> anyhow::Result<Self> {
        reset_dir(&config.processing_dir).await?;
        tokio::fs::create_dir_all(&config.storage_dir).await?;
        let db = IndexDatabase::open(&config.index_url).await?;
        log::info!(
            "content store at {}, index {}",
            config.storage_dir.display(),
            config.index_url
        );
        Ok(Self {
            storage_dir: config.storage_dir,
            processing_dir: config.processing_dir,
            db,
            lock: Mutex::new(()),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn processing_dir(&self) -> &Path {
        &self.processing_dir
    }

    /// Hashes the source bytes. Reads the whole source.
    pub async fn origin_key(
        &self,
        source: &SourceLocator,
        with_audio: bool,
    ) -> anyhow::Result<OriginKey> {
        let source = source.clone();
        let hash = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let mut reader = source
                .open()
                .map_err(|e| anyhow::anyhow!("open source {}: {}", source, e))?;
            Ok(hash::md5_hex(&mut reader)?)
        })
        .await??;
        Ok(OriginKey { hash, with_audio })
    }

    pub async fn lookup(&self, origin: &OriginKey) -> anyhow::Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let conn = self.db.connect()?;
        index::by_origin(origin, &conn).await
    }

    /// Path of the stored output for `content_hash`, if the file exists.
    pub async fn resolve(&self, content_hash: &str) -> Option<PathBuf> {
        let path = self.output_path(content_hash);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    /// Moves a finished output into storage under its content hash and
    /// points `origin` at it. The temporary file is gone afterwards.
    pub async fn store(&self, origin: &OriginKey, temp: &Path) -> anyhow::Result<IndexEntry> {
        let source = temp.to_path_buf();
        let content_hash = tokio::task::spawn_blocking(move || hash::md5_file(&source)).await??;
        let dest = self.output_path(&content_hash);

        let _guard = self.lock.lock().await;
        if tokio::fs::try_exists(&dest).await? {
            log::debug!("{} already stored", dest.display());
            remove_if_exists(temp).await?;
        } else {
            place(temp, &dest).await?;
        }

        let entry = IndexEntry {
            origin: origin.clone(),
            content_hash,
        };
        let mut conn = self.db.connect()?;
        index::upsert(&entry, &mut conn).await?;
        log::info!("stored {} as {}", entry.origin, dest.display());
        Ok(entry)
    }

    /// Deletes every stored output and empties the index.
    pub async fn clear_all(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let conn = self.db.connect()?;
        index::clear(&conn).await?;
        reset_dir(&self.storage_dir).await?;
        log::info!("cleared {}", self.storage_dir.display());
        Ok(())
    }

    pub async fn entries(&self) -> anyhow::Result<Vec<IndexEntry>> {
        let _guard = self.lock.lock().await;
        let conn = self.db.connect()?;
        index::all(&conn).await
    }

    /// Fresh path in the processing directory for an in-flight output.
    /// Whatever is left at that path is deleted when the guard drops.
    pub fn temp_file(&self) -> TempOutput {
        TempOutput {
            path: self
                .processing_dir
                .join(format!("{}.{}", uuid::Uuid::new_v4(), OUTPUT_EXTENSION)),
        }
    }

    fn output_path(&self, content_hash: &str) -> PathBuf {
        self.storage_dir
            .join(format!("{}.{}", content_hash, OUTPUT_EXTENSION))
    }
}

/// Path of an in-flight output. Removing happens on drop, so a run that is
/// aborted at any await point still leaves the processing directory clean.
/// After a successful [`ContentStore::store`] the file has already moved and
/// dropping is a no-op.
#[derive(Debug)]
pub struct TempOutput {
    path: PathBuf,
}

impl Deref for TempOutput {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for TempOutput {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed temp output {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// Renames `from` to `to`, copying when they sit on different filesystems.
async fn place(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    remove_if_exists(from).await
}

pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    tokio::fs::create_dir_all(dir).await
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
