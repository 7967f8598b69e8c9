use std::{
    fmt,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{packet::Sample, track::TrackDescriptor};

/// Content behind an opaque locator, e.g. a document provider or a blob.
pub trait ContentSource: Send + Sync {
    fn open(&self) -> std::io::Result<Box<dyn Read + Send>>;

    /// Human readable name used in logs and errors.
    fn describe(&self) -> String;
}

/// Where a source video lives. Opening it yields a byte stream that can be
/// read from the start any number of times.
#[derive(Clone)]
pub enum SourceLocator {
    File(PathBuf),
    Content(Arc<dyn ContentSource>),
}

impl SourceLocator {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    pub fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        match self {
            SourceLocator::File(path) => Ok(Box::new(File::open(path)?)),
            SourceLocator::Content(content) => content.open(),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::File(path) => write!(f, "{}", path.display()),
            SourceLocator::Content(content) => write!(f, "content:{}", content.describe()),
        }
    }
}

impl fmt::Debug for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceLocator({})", self)
    }
}

/// Container reader. Yields samples of the selected tracks in file order.
pub trait Demuxer: Send {
    fn tracks(&self) -> &[TrackDescriptor];

    fn select_track(&mut self, index: usize) -> anyhow::Result<()>;

    /// Next sample of a selected track, `None` once the container is exhausted.
    fn read_sample(&mut self) -> anyhow::Result<Option<Sample>>;
}
