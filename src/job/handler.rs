use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Context;
use futures::StreamExt;
use media_bus::{PipelineRequest, ProcessingEvent, ProcessingStats, SourceLocator, Transcoder};
use media_store::ContentStore;
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;

use super::JobState;
use crate::config::PublishSettings;

#[derive(Clone, Debug)]
pub struct JobRequest {
    pub source: SourceLocator,
    pub with_audio: bool,
}

/// One source turned into one stored output.
///
/// A job does nothing until [`VideoJob::retry`] is called. Each call starts
/// a fresh run; a run still in flight is aborted and its state updates are
/// discarded.
pub struct VideoJob {
    inner: Arc<JobInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct JobInner {
    request: JobRequest,
    store: Arc<ContentStore>,
    transcoder: Arc<dyn Transcoder>,
    publish: PublishSettings,
    state: watch::Sender<JobState>,
    generation: AtomicU64,
}

impl VideoJob {
    pub fn new(
        request: JobRequest,
        store: Arc<ContentStore>,
        transcoder: Arc<dyn Transcoder>,
        publish: PublishSettings,
    ) -> Self {
        let (state, _) = watch::channel(JobState::Initial);
        Self {
            inner: Arc::new(JobInner {
                request,
                store,
                transcoder,
                publish,
                state,
                generation: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> JobState {
        self.inner.state.borrow().clone()
    }

    /// Current state first, then every change. Intermediate states may be
    /// skipped by a slow reader; the settled state never is.
    pub fn subscribe(&self) -> WatchStream<JobState> {
        WatchStream::new(self.inner.state.subscribe())
    }

    /// Resets the job to `Initial` and starts processing from scratch.
    pub fn retry(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = task.take() {
            previous.abort();
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_replace(JobState::Initial);

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.run(generation).await }));
    }

    /// Aborts the run in flight. A job that has not settled yet ends in
    /// `Error`, so pending `wait_settled` calls resolve.
    pub fn cancel(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = task.take() {
            task.abort();
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_if_modified(|state| {
            if state.is_settled() {
                return false;
            }
            *state = JobState::Error {
                message: "cancelled".to_string(),
            };
            true
        });
    }

    /// Waits for `Ready` or `Error`.
    pub async fn wait_settled(&self) -> JobState {
        let mut rx = self.inner.state.subscribe();
        let settled = match rx.wait_for(JobState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }
}

impl Drop for VideoJob {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl JobInner {
    /// Publishes `state` unless a newer run has started since `generation`.
    fn set(&self, generation: u64, state: JobState) {
        self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *current = state;
            true
        });
    }

    async fn run(self: Arc<Self>, generation: u64) {
        self.set(generation, JobState::Initializing);

        match self.process(generation).await {
            Ok(path) => {
                log::info!("[JOB] {} ready at {}", self.request.source, path.display());
                self.set(generation, JobState::Ready { path });
            }
            Err(e) => {
                log::error!("[JOB] {} failed: {:#}", self.request.source, e);
                self.set(
                    generation,
                    JobState::Error {
                        message: format!("{:#}", e),
                    },
                );
            }
        }
    }

    /// The temp output is a drop guard, so it is cleaned up on failure and
    /// when the run is aborted.
    async fn process(&self, generation: u64) -> anyhow::Result<PathBuf> {
        let origin = self
            .store
            .origin_key(&self.request.source, self.request.with_audio)
            .await?;

        if let Some(content_hash) = self.store.lookup(&origin).await? {
            match self.store.resolve(&content_hash).await {
                Some(path) => {
                    log::info!("[JOB] {} already processed as {}", origin, content_hash);
                    return Ok(path);
                }
                None => log::warn!(
                    "[JOB] index maps {} to missing output {}, reprocessing",
                    origin,
                    content_hash
                ),
            }
        }

        let temp = self.store.temp_file();
        let stats = self.transcode(generation, temp.to_path_buf()).await?;
        log::info!(
            "[JOB] {} processed: {} frames, {} audio samples, {} bytes in {:?}",
            origin,
            stats.video_frames_written,
            stats.audio_samples_written,
            stats.bytes_written,
            stats.elapsed
        );

        let entry = self
            .store
            .store(&origin, &temp)
            .await
            .context("store output")?;
        drop(temp);

        self.publish(generation).await;

        let content_hash = self
            .store
            .lookup(&origin)
            .await?
            .ok_or_else(|| anyhow::anyhow!("index entry for {} disappeared", origin))?;
        self.store
            .resolve(&content_hash)
            .await
            .ok_or_else(|| anyhow::anyhow!("stored output {} is missing", entry.content_hash))
    }

    async fn transcode(&self, generation: u64, output: PathBuf) -> anyhow::Result<ProcessingStats> {
        let mut events = self.transcoder.transcode(PipelineRequest {
            source: self.request.source.clone(),
            with_audio: self.request.with_audio,
            output,
        });
        while let Some(event) = events.next().await {
            match event? {
                ProcessingEvent::Progress {
                    progress,
                    thumbnail,
                } => self.set(
                    generation,
                    JobState::InProgress {
                        progress,
                        thumbnail,
                    },
                ),
                ProcessingEvent::Finished(stats) => return Ok(stats),
            }
        }
        anyhow::bail!("processing ended without a result")
    }

    async fn publish(&self, generation: u64) {
        let steps = self.publish.steps.max(1);
        for step in 1..=steps {
            if !self.publish.step_delay.is_zero() {
                tokio::time::sleep(self.publish.step_delay).await;
            }
            self.set(
                generation,
                JobState::PublishingSimulated {
                    progress: step as f32 / steps as f32,
                },
            );
        }
    }
}

#[cfg(test)]
#[path = "handler_test.rs"]
mod handler_test;
