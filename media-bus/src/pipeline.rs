//! Processing orchestrator.
//!
//! A run wires the demuxer feed, the decoder device, the per-job render
//! thread and the encoder device together, then pumps encoder output into
//! the container writer until the encoder reports end of stream. Progress
//! and the final statistics are delivered as a [`ProcessingStream`];
//! dropping the stream cancels the run.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{Arc, atomic::Ordering},
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    backend::MediaBackend,
    compositor::{Compositor, SnapshotSlot},
    device::{
        DecoderEvent, DeviceHandle, EncoderEvent, FaultReceiver, start_decoder, start_encoder,
    },
    error::{PipelineError, PipelineResult},
    feed::{FeedCounters, FeedRoutes, FeedTask},
    frame::Thumbnail,
    output::ContainerWriter,
    packet::Sample,
    profile::EncodeSettings,
    render::{RenderContext, RenderThread},
    source::SourceLocator,
    track::{AUDIO_PREFIX, TrackDescriptor, VIDEO_PREFIX, pick_track},
};

/// Progress events buffered ahead of a slow consumer.
pub const PROGRESS_CHANNEL_CAP: usize = 16;

#[derive(Clone, Debug)]
pub struct PipelineRequest {
    pub source: SourceLocator,
    pub with_audio: bool,
    /// Where the MP4 is written. Removed again if the run fails.
    pub output: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProcessingEvent {
    /// Emitted after every written video sample. `progress` never decreases.
    Progress {
        progress: f32,
        thumbnail: Option<Thumbnail>,
    },
    Finished(ProcessingStats),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessingStats {
    pub video_samples_read: u64,
    pub video_frames_written: u64,
    pub audio_samples_read: u64,
    pub audio_samples_written: u64,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

pub type ProcessingResult = PipelineResult<ProcessingEvent>;

/// Events of one processing run. Ends after `Finished` or an error.
/// Dropping it cancels the run.
pub struct ProcessingStream {
    events: ReceiverStream<ProcessingResult>,
    _cancel: DropGuard,
}

impl ProcessingStream {
    pub fn new(events: mpsc::Receiver<ProcessingResult>, cancel: CancellationToken) -> Self {
        Self {
            events: ReceiverStream::new(events),
            _cancel: cancel.drop_guard(),
        }
    }
}

impl Stream for ProcessingStream {
    type Item = ProcessingResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Turns a source into a normalized MP4. Must be called inside a tokio runtime.
pub trait Transcoder: Send + Sync + 'static {
    fn transcode(&self, request: PipelineRequest) -> ProcessingStream;
}

pub struct Pipeline {
    backend: Arc<dyn MediaBackend>,
}

impl Pipeline {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self { backend }
    }
}

impl Transcoder for Pipeline {
    fn transcode(&self, request: PipelineRequest) -> ProcessingStream {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAP);
        let backend = self.backend.clone();
        let run_cancel = cancel.clone();
        tokio::spawn(async move {
            let last = match run(backend, request, run_cancel, tx.clone()).await {
                Ok(stats) => Ok(ProcessingEvent::Finished(stats)),
                Err(e) => Err(e),
            };
            let _ = tx.send(last).await;
        });
        ProcessingStream::new(rx, cancel)
    }
}

/// Everything a run must release, in release order.
#[derive(Default)]
struct Resources {
    encoder: Option<DeviceHandle>,
    decoder: Option<DeviceHandle>,
    render: Option<RenderThread>,
    feed: Option<FeedTask>,
    writer: Option<Box<dyn ContainerWriter>>,
}

impl Resources {
    /// Encoder, decoder, render context, then the demuxer. Idempotent.
    async fn release(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.release().await;
        }
        if let Some(mut decoder) = self.decoder.take() {
            decoder.release().await;
        }
        if let Some(mut render) = self.render.take() {
            render.release().await;
        }
        if let Some(mut feed) = self.feed.take() {
            feed.release().await;
        }
        self.writer.take();
    }
}

async fn run(
    backend: Arc<dyn MediaBackend>,
    request: PipelineRequest,
    cancel: CancellationToken,
    events: mpsc::Sender<ProcessingResult>,
) -> PipelineResult<ProcessingStats> {
    let started = Instant::now();
    log::info!(
        "[PIPELINE] processing {} (audio: {}) into {}",
        request.source,
        request.with_audio,
        request.output.display()
    );
    let mut resources = Resources::default();
    let result = process(&backend, &request, &cancel, events, &mut resources).await;
    resources.release().await;

    match result {
        Ok(mut stats) => {
            stats.elapsed = started.elapsed();
            log::info!(
                "[PIPELINE] done in {:?}: video read/written {}/{}, audio read/written {}/{}, {} bytes",
                stats.elapsed,
                stats.video_samples_read,
                stats.video_frames_written,
                stats.audio_samples_read,
                stats.audio_samples_written,
                stats.bytes_written
            );
            Ok(stats)
        }
        Err(e) => {
            log::error!("[PIPELINE] processing {} failed: {}", request.source, e);
            remove_partial_output(&request.output).await;
            Err(e)
        }
    }
}

async fn blocking<R, F>(call: F) -> PipelineResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(PipelineError::device)
}

async fn process(
    backend: &Arc<dyn MediaBackend>,
    request: &PipelineRequest,
    cancel: &CancellationToken,
    events: mpsc::Sender<ProcessingResult>,
    res: &mut Resources,
) -> PipelineResult<ProcessingStats> {
    let b = backend.clone();
    let locator = request.source.clone();
    let mut demuxer = blocking(move || b.open_source(&locator))
        .await?
        .map_err(PipelineError::source)?;

    let video = pick_track(demuxer.tracks(), VIDEO_PREFIX)
        .cloned()
        .ok_or_else(|| PipelineError::Source(format!("no video track in {}", request.source)))?;
    let audio = if request.with_audio {
        let track = pick_track(demuxer.tracks(), AUDIO_PREFIX)
            .cloned()
            .ok_or_else(|| {
                PipelineError::Source(format!("no audio track in {}", request.source))
            })?;
        Some(track)
    } else {
        None
    };
    demuxer
        .select_track(video.index)
        .map_err(PipelineError::source)?;
    if let Some(track) = &audio {
        demuxer
            .select_track(track.index)
            .map_err(PipelineError::source)?;
    }

    let settings = EncodeSettings::for_source(&video);
    log::info!(
        "[PIPELINE] video track {} {} {}x{} rotation {} -> {}x{}",
        video.index,
        video.mime,
        video.width,
        video.height,
        video.rotation,
        settings.width,
        settings.height
    );

    let b = backend.clone();
    let output = request.output.clone();
    let writer = blocking(move || b.create_writer(&output))
        .await?
        .map_err(PipelineError::io)?;
    let writer = res.writer.insert(writer);

    let (faults_tx, faults) = mpsc::unbounded_channel();

    let b = backend.clone();
    let encode = settings.clone();
    let encoder_engine = blocking(move || b.create_encoder(&encode))
        .await?
        .map_err(PipelineError::device)?;
    let (encoder, surface, encoded) = start_encoder(encoder_engine, faults_tx.clone());
    res.encoder = Some(encoder);

    let (thumbnail_tx, thumbnails) = watch::channel(None);
    let snapshot = SnapshotSlot::new();
    snapshot.arm(Box::new(move |thumbnail| {
        let _ = thumbnail_tx.send(Some(thumbnail));
    }));
    let compositor = Compositor::new(settings.width, settings.height, video.rotation, snapshot);
    let render = res.render.insert(
        RenderThread::spawn("reframe-render", RenderContext::new(compositor, surface))
            .map_err(PipelineError::device)?,
    );

    let b = backend.clone();
    let track = video.clone();
    let decoder_engine = blocking(move || b.create_decoder(&track))
        .await?
        .map_err(PipelineError::device)?;
    let (decoder, ports) = start_decoder(decoder_engine, faults_tx.clone());
    res.decoder = Some(decoder);

    let (audio_tx, audio_rx) = mpsc::unbounded_channel();
    let counters = Arc::new(FeedCounters::default());
    res.feed = Some(FeedTask::start(
        demuxer,
        FeedRoutes {
            video_track: video.index,
            decoder: ports.input,
            audio_track: audio.as_ref().map(|t| t.index),
            audio: audio_tx,
        },
        faults_tx,
        counters.clone(),
    ));

    let mut pump = Pump {
        writer: &mut *writer,
        events,
        thumbnails,
        decoded: ports.events,
        encoded,
        audio: audio_rx,
        faults,
        audio_track: audio,
        duration_us: video.duration_us,
        video_out: None,
        audio_out: None,
        pending: VecDeque::new(),
        progress: 0.0,
        stats: ProcessingStats::default(),
        decoder_done: false,
        encoder_done: false,
    };
    pump.run(cancel, render).await?;
    let mut stats = std::mem::take(&mut pump.stats);
    drop(pump);

    writer.finish().map_err(PipelineError::io)?;
    stats.video_samples_read = counters.video_samples.load(Ordering::Relaxed);
    stats.audio_samples_read = counters.audio_samples.load(Ordering::Relaxed);
    Ok(stats)
}

/// Moves frames from the decoder through the render thread and encoded
/// samples into the writer. The writer starts once, when the encoder
/// announces its output format; samples produced earlier are held back.
struct Pump<'a> {
    writer: &'a mut Box<dyn ContainerWriter>,
    events: mpsc::Sender<ProcessingResult>,
    thumbnails: watch::Receiver<Option<Thumbnail>>,
    decoded: mpsc::Receiver<DecoderEvent>,
    encoded: mpsc::Receiver<EncoderEvent>,
    audio: mpsc::UnboundedReceiver<Sample>,
    faults: FaultReceiver,
    audio_track: Option<TrackDescriptor>,
    duration_us: i64,
    video_out: Option<usize>,
    audio_out: Option<usize>,
    pending: VecDeque<Sample>,
    progress: f32,
    stats: ProcessingStats,
    decoder_done: bool,
    encoder_done: bool,
}

impl Pump<'_> {
    async fn run(&mut self, cancel: &CancellationToken, render: &RenderThread) -> PipelineResult<()> {
        while !self.encoder_done {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                Some(fault) = self.faults.recv() => return Err(fault),
                event = self.decoded.recv(), if !self.decoder_done => match event {
                    Some(DecoderEvent::Frame(frame)) => {
                        self.render_with(cancel, render, move |ctx| ctx.render(frame)).await?;
                    }
                    Some(DecoderEvent::Finished) => {
                        self.decoder_done = true;
                        self.render_with(cancel, render, |ctx| ctx.signal_end_of_input()).await?;
                    }
                    None => return Err(self.stopped("decoder")),
                },
                event = self.encoded.recv() => match event {
                    Some(event) => self.on_encoded(event).await?,
                    None => return Err(self.stopped("encoder")),
                },
            }
            self.drain_audio()?;
        }
        if !self.decoder_done {
            return Err(PipelineError::Device(
                "encoder finished before the decoder".to_string(),
            ));
        }
        self.drain_audio()
    }

    /// Runs `job` on the render thread. Encoder output keeps flowing while
    /// the render thread waits for room in the encoder input.
    async fn render_with<F>(
        &mut self,
        cancel: &CancellationToken,
        render: &RenderThread,
        job: F,
    ) -> PipelineResult<()>
    where
        F: FnOnce(&mut RenderContext) -> anyhow::Result<()> + Send + 'static,
    {
        let rendering = render.run(job);
        tokio::pin!(rendering);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                done = &mut rendering => {
                    return match done.and_then(|r| r) {
                        Ok(()) => Ok(()),
                        Err(e) => Err(self.faults.try_recv().unwrap_or_else(|_| PipelineError::device(e))),
                    };
                }
                Some(event) = self.encoded.recv(), if !self.encoder_done => self.on_encoded(event).await?,
            }
        }
    }

    /// A device closed its output early. Prefer the fault it reported.
    fn stopped(&mut self, device: &str) -> PipelineError {
        self.faults.try_recv().unwrap_or_else(|_| {
            PipelineError::Device(format!("{} stopped before end of stream", device))
        })
    }

    async fn on_encoded(&mut self, event: EncoderEvent) -> PipelineResult<()> {
        match event {
            EncoderEvent::FormatChanged(format) => {
                if self.video_out.is_some() {
                    log::warn!("[PIPELINE] ignoring repeated encoder format change");
                    return Ok(());
                }
                let video = self.start_writer(&format)?;
                while let Some(sample) = self.pending.pop_front() {
                    self.write_video(video, sample).await?;
                }
            }
            EncoderEvent::Data(sample) => match self.video_out {
                Some(video) => self.write_video(video, sample).await?,
                None => self.pending.push_back(sample),
            },
            EncoderEvent::EndOfStream => {
                if self.video_out.is_none() {
                    return Err(PipelineError::Source(
                        "encoder reached end of stream without producing output".to_string(),
                    ));
                }
                self.encoder_done = true;
            }
        }
        Ok(())
    }

    fn start_writer(&mut self, format: &TrackDescriptor) -> PipelineResult<usize> {
        let video = self.writer.add_track(format).map_err(PipelineError::io)?;
        if let Some(track) = &self.audio_track {
            let audio = self.writer.add_track(track).map_err(PipelineError::io)?;
            self.audio_out = Some(audio);
        }
        self.writer.start().map_err(PipelineError::io)?;
        self.video_out = Some(video);
        log::info!(
            "[PIPELINE] writer started: {} {}x{}, audio: {}, {} samples held back",
            format.mime,
            format.width,
            format.height,
            self.audio_out.is_some(),
            self.pending.len()
        );
        Ok(video)
    }

    async fn write_video(&mut self, track: usize, sample: Sample) -> PipelineResult<()> {
        let pts_us = sample.pts_us;
        let size = sample.size() as u64;
        self.writer
            .write_sample(track, sample)
            .map_err(PipelineError::io)?;
        self.stats.video_frames_written += 1;
        self.stats.bytes_written += size;

        let progress = if self.duration_us > 0 {
            (pts_us as f64 / self.duration_us as f64).clamp(0.0, 1.0) as f32
        } else {
            0.0
        };
        self.progress = self.progress.max(progress);
        let thumbnail = self.thumbnails.borrow().clone();
        self.events
            .send(Ok(ProcessingEvent::Progress {
                progress: self.progress,
                thumbnail,
            }))
            .await
            .map_err(|_| PipelineError::Cancelled)
    }

    fn drain_audio(&mut self) -> PipelineResult<()> {
        let Some(track) = self.audio_out else {
            return Ok(());
        };
        while let Ok(sample) = self.audio.try_recv() {
            let size = sample.size() as u64;
            self.writer
                .write_sample(track, sample)
                .map_err(PipelineError::io)?;
            self.stats.audio_samples_written += 1;
            self.stats.bytes_written += size;
        }
        Ok(())
    }
}

async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("[PIPELINE] removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "[PIPELINE] failed to remove partial output {}: {}",
            path.display(),
            e
        ),
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
