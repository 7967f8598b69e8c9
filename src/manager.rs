use std::{collections::HashMap, fmt, sync::Arc};

use media_bus::{SourceLocator, Transcoder};
use media_store::ContentStore;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    config::{AppConfig, PublishSettings},
    job::{JobRequest, VideoJob},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct JobDescriptor(Uuid);

impl fmt::Display for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Owns the content store and every job started through it.
pub(crate) struct JobManager {
    store: Arc<ContentStore>,
    transcoder: Arc<dyn Transcoder>,
    publish: PublishSettings,
    jobs: RwLock<HashMap<JobDescriptor, Arc<VideoJob>>>,
}

impl JobManager {
    pub(crate) async fn open(config: &AppConfig) -> anyhow::Result<Self> {
        let store = ContentStore::open(config.store_config()).await?;
        Ok(Self::new(
            Arc::new(store),
            default_transcoder()?,
            config.publish(),
        ))
    }

    pub(crate) fn new(
        store: Arc<ContentStore>,
        transcoder: Arc<dyn Transcoder>,
        publish: PublishSettings,
    ) -> Self {
        Self {
            store,
            transcoder,
            publish,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// Registers a job for `source` and starts it.
    pub(crate) async fn init_job(&self, source: SourceLocator, with_audio: bool) -> JobDescriptor {
        let descriptor = JobDescriptor(Uuid::new_v4());
        let job = Arc::new(VideoJob::new(
            JobRequest { source, with_audio },
            self.store.clone(),
            self.transcoder.clone(),
            self.publish,
        ));
        job.retry();
        log::debug!("[MANAGER] job {} started", descriptor);
        self.jobs.write().await.insert(descriptor, job);
        descriptor
    }

    pub(crate) async fn job(&self, descriptor: &JobDescriptor) -> Option<Arc<VideoJob>> {
        self.jobs.read().await.get(descriptor).cloned()
    }

    /// Deletes every stored output and index entry. Jobs already `Ready`
    /// keep pointing at paths that no longer exist.
    pub(crate) async fn clear_storage(&self) -> anyhow::Result<()> {
        self.store.clear_all().await
    }
}

#[cfg(feature = "ffmpeg")]
fn default_transcoder() -> anyhow::Result<Arc<dyn Transcoder>> {
    let backend = media_bus::ffmpeg::FfmpegBackend::new()?;
    Ok(Arc::new(media_bus::Pipeline::new(Arc::new(backend))))
}

#[cfg(not(feature = "ffmpeg"))]
fn default_transcoder() -> anyhow::Result<Arc<dyn Transcoder>> {
    log::warn!("[MANAGER] built without the ffmpeg feature, every job will fail");
    Ok(Arc::new(NoBackend))
}

/// Stands in for the pipeline when no media backend is compiled in.
#[cfg(not(feature = "ffmpeg"))]
struct NoBackend;

#[cfg(not(feature = "ffmpeg"))]
impl Transcoder for NoBackend {
    fn transcode(&self, _: media_bus::PipelineRequest) -> media_bus::ProcessingStream {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.try_send(Err(media_bus::PipelineError::Device(
            "no media backend available, rebuild with --features ffmpeg".to_string(),
        )));
        media_bus::ProcessingStream::new(rx, tokio_util::sync::CancellationToken::new())
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod manager_test;
