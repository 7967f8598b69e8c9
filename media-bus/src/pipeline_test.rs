use std::{
    collections::VecDeque,
    fs::File,
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use futures::StreamExt;

use crate::{
    backend::MediaBackend,
    device::{DecoderEngine, EncoderEngine},
    error::PipelineError,
    frame::{ComposedFrame, DecodedFrame, Texture},
    output::ContainerWriter,
    packet::Sample,
    pipeline::{Pipeline, PipelineRequest, ProcessingEvent, ProcessingStats, Transcoder},
    profile::EncodeSettings,
    source::{Demuxer, SourceLocator},
    track::TrackDescriptor,
};

const FRAME_US: i64 = 33_333;
const ENCODED_SIZE: usize = 64;
const AUDIO_SIZE: usize = 16;

#[derive(Clone, Debug, PartialEq)]
enum WriterCall {
    AddTrack(String),
    Start,
    Sample { track: usize, pts_us: i64 },
    Finish,
}

#[derive(Clone)]
struct FakeBackend {
    video_frames: usize,
    audio_samples: usize,
    has_video: bool,
    has_audio: bool,
    rotation: i32,
    decode_fail_at: Option<usize>,
    encode_fail_at: Option<usize>,
    read_fail_at: Option<usize>,
    format_after: usize,
    calls: Arc<Mutex<Vec<WriterCall>>>,
    encoder_settings: Arc<Mutex<Option<EncodeSettings>>>,
    frame_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl FakeBackend {
    fn new(video_frames: usize) -> Self {
        Self {
            video_frames,
            audio_samples: video_frames,
            has_video: true,
            has_audio: true,
            rotation: 0,
            decode_fail_at: None,
            encode_fail_at: None,
            read_fail_at: None,
            format_after: 0,
            calls: Arc::new(Mutex::new(Vec::new())),
            encoder_settings: Arc::new(Mutex::new(None)),
            frame_sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Vec<WriterCall> {
        self.calls.lock().unwrap().clone()
    }

    fn samples_for(&self, track: usize) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                WriterCall::Sample { track: t, pts_us } if t == track => Some(pts_us),
                _ => None,
            })
            .collect()
    }
}

impl MediaBackend for FakeBackend {
    fn open_source(&self, _locator: &SourceLocator) -> anyhow::Result<Box<dyn Demuxer>> {
        let duration = self.video_frames as i64 * FRAME_US;
        let mut tracks = Vec::new();
        if self.has_video {
            tracks.push(
                TrackDescriptor::video(0, "video/avc", 16, 9)
                    .with_duration_us(duration)
                    .with_rotation(self.rotation),
            );
        }
        if self.has_audio {
            tracks.push(TrackDescriptor::audio(1, "audio/mp4a-latm", 48_000, 2));
        }
        let mut samples = VecDeque::new();
        for i in 0..self.video_frames.max(self.audio_samples) {
            let pts_us = i as i64 * FRAME_US;
            if self.has_video && i < self.video_frames {
                samples.push_back(Sample::new(0, Bytes::from_static(b"video"), pts_us, i == 0));
            }
            if self.has_audio && i < self.audio_samples {
                samples.push_back(Sample::new(
                    1,
                    Bytes::from(vec![1u8; AUDIO_SIZE]),
                    pts_us,
                    true,
                ));
            }
        }
        Ok(Box::new(FakeDemuxer {
            tracks,
            selected: Vec::new(),
            samples,
            read: 0,
            fail_at: self.read_fail_at,
        }))
    }

    fn create_decoder(&self, track: &TrackDescriptor) -> anyhow::Result<Box<dyn DecoderEngine>> {
        Ok(Box::new(FakeDecoder {
            width: track.width,
            height: track.height,
            decoded: 0,
            fail_at: self.decode_fail_at,
        }))
    }

    fn create_encoder(&self, settings: &EncodeSettings) -> anyhow::Result<Box<dyn EncoderEngine>> {
        *self.encoder_settings.lock().unwrap() = Some(settings.clone());
        Ok(Box::new(FakeEncoder {
            width: settings.width,
            height: settings.height,
            encoded: 0,
            fail_at: self.encode_fail_at,
            format_after: self.format_after,
            frame_sizes: self.frame_sizes.clone(),
        }))
    }

    fn create_writer(&self, path: &Path) -> anyhow::Result<Box<dyn ContainerWriter>> {
        Ok(Box::new(FakeWriter {
            file: File::create(path)?,
            calls: self.calls.clone(),
            tracks: 0,
            started: false,
        }))
    }
}

struct FakeDemuxer {
    tracks: Vec<TrackDescriptor>,
    selected: Vec<usize>,
    samples: VecDeque<Sample>,
    read: usize,
    fail_at: Option<usize>,
}

impl Demuxer for FakeDemuxer {
    fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> anyhow::Result<()> {
        self.selected.push(index);
        Ok(())
    }

    fn read_sample(&mut self) -> anyhow::Result<Option<Sample>> {
        if Some(self.read) == self.fail_at {
            anyhow::bail!("io gone");
        }
        self.read += 1;
        while let Some(sample) = self.samples.pop_front() {
            if self.selected.contains(&sample.track_index) {
                return Ok(Some(sample));
            }
        }
        Ok(None)
    }
}

struct FakeDecoder {
    width: u32,
    height: u32,
    decoded: usize,
    fail_at: Option<usize>,
}

impl DecoderEngine for FakeDecoder {
    fn decode(&mut self, sample: Sample) -> anyhow::Result<Vec<DecodedFrame>> {
        if Some(self.decoded) == self.fail_at {
            anyhow::bail!("corrupt sample at {}", sample.pts_us);
        }
        self.decoded += 1;
        let texture = Texture::filled(self.width, self.height, [30, 120, 200, 255]);
        Ok(vec![DecodedFrame::new(texture, sample.pts_us)])
    }

    fn flush(&mut self) -> anyhow::Result<Vec<DecodedFrame>> {
        Ok(Vec::new())
    }
}

struct FakeEncoder {
    width: u32,
    height: u32,
    encoded: usize,
    fail_at: Option<usize>,
    format_after: usize,
    frame_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl EncoderEngine for FakeEncoder {
    fn encode(&mut self, frame: ComposedFrame) -> anyhow::Result<Vec<Sample>> {
        if Some(self.encoded) == self.fail_at {
            anyhow::bail!("enc boom");
        }
        self.frame_sizes
            .lock()
            .unwrap()
            .push((frame.texture.width(), frame.texture.height()));
        self.encoded += 1;
        let sample = Sample::new(
            0,
            Bytes::from(vec![0u8; ENCODED_SIZE]),
            frame.pts_us,
            self.encoded == 1,
        );
        Ok(vec![sample])
    }

    fn flush(&mut self) -> anyhow::Result<Vec<Sample>> {
        Ok(Vec::new())
    }

    fn output_format(&self) -> Option<TrackDescriptor> {
        (self.encoded >= self.format_after)
            .then(|| TrackDescriptor::video(0, "video/avc", self.width, self.height))
    }
}

struct FakeWriter {
    file: File,
    calls: Arc<Mutex<Vec<WriterCall>>>,
    tracks: usize,
    started: bool,
}

impl ContainerWriter for FakeWriter {
    fn add_track(&mut self, track: &TrackDescriptor) -> anyhow::Result<usize> {
        anyhow::ensure!(!self.started, "track added after start");
        self.calls
            .lock()
            .unwrap()
            .push(WriterCall::AddTrack(track.mime.clone()));
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn start(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.started, "started twice");
        self.started = true;
        self.calls.lock().unwrap().push(WriterCall::Start);
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: Sample) -> anyhow::Result<()> {
        anyhow::ensure!(self.started, "sample written before start");
        anyhow::ensure!(track < self.tracks, "unknown track {}", track);
        self.file.write_all(&sample.data)?;
        self.calls.lock().unwrap().push(WriterCall::Sample {
            track,
            pts_us: sample.pts_us,
        });
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.file.flush()?;
        self.calls.lock().unwrap().push(WriterCall::Finish);
        Ok(())
    }
}

struct Outcome {
    progress: Vec<f32>,
    thumbnails: usize,
    result: Result<ProcessingStats, PipelineError>,
}

async fn transcode(backend: &FakeBackend, with_audio: bool, output: &Path) -> Outcome {
    let pipeline = Pipeline::new(Arc::new(backend.clone()));
    let mut stream = pipeline.transcode(PipelineRequest {
        source: SourceLocator::file("fake.mp4"),
        with_audio,
        output: output.to_path_buf(),
    });
    let mut progress = Vec::new();
    let mut thumbnails = 0;
    let mut result = Err(PipelineError::Cancelled);
    while let Some(event) = stream.next().await {
        match event {
            Ok(ProcessingEvent::Progress {
                progress: p,
                thumbnail,
            }) => {
                progress.push(p);
                thumbnails += thumbnail.is_some() as usize;
            }
            Ok(ProcessingEvent::Finished(stats)) => result = Ok(stats),
            Err(e) => result = Err(e),
        }
    }
    Outcome {
        progress,
        thumbnails,
        result,
    }
}

#[tokio::test]
async fn test_transcode_video_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let backend = FakeBackend::new(8);

    let outcome = transcode(&backend, false, &output).await;
    let stats = outcome.result?;

    assert_eq!(stats.video_samples_read, 8);
    assert_eq!(stats.video_frames_written, 8);
    assert_eq!(stats.audio_samples_read, 0);
    assert_eq!(stats.audio_samples_written, 0);
    assert_eq!(stats.bytes_written, 8 * ENCODED_SIZE as u64);
    assert_eq!(std::fs::metadata(&output)?.len(), 8 * ENCODED_SIZE as u64);

    assert_eq!(outcome.progress.len(), 8);
    assert!(outcome.progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(outcome.progress.iter().all(|p| (0.0..=1.0).contains(p)));
    assert!(outcome.thumbnails >= 7);

    let calls = backend.calls();
    assert_eq!(calls[0], WriterCall::AddTrack("video/avc".to_string()));
    assert_eq!(calls[1], WriterCall::Start);
    assert_eq!(calls.last(), Some(&WriterCall::Finish));
    let pts = backend.samples_for(0);
    assert_eq!(pts, (0..8).map(|i| i * FRAME_US).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn test_transcode_copies_audio() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let backend = FakeBackend::new(6);

    let stats = transcode(&backend, true, &output).await.result?;

    assert_eq!(stats.audio_samples_read, 6);
    assert_eq!(stats.audio_samples_written, 6);
    assert_eq!(
        stats.bytes_written,
        6 * ENCODED_SIZE as u64 + 6 * AUDIO_SIZE as u64
    );
    let calls = backend.calls();
    assert_eq!(
        &calls[..3],
        &[
            WriterCall::AddTrack("video/avc".to_string()),
            WriterCall::AddTrack("audio/mp4a-latm".to_string()),
            WriterCall::Start,
        ]
    );
    assert_eq!(backend.samples_for(1).len(), 6);
    Ok(())
}

#[tokio::test]
async fn test_samples_held_until_format_known() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let mut backend = FakeBackend::new(8);
    backend.format_after = 3;

    let stats = transcode(&backend, false, &output).await.result?;

    assert_eq!(stats.video_frames_written, 8);
    let calls = backend.calls();
    let start = calls.iter().position(|c| *c == WriterCall::Start).unwrap();
    let first_sample = calls
        .iter()
        .position(|c| matches!(c, WriterCall::Sample { .. }))
        .unwrap();
    assert!(start < first_sample);
    assert_eq!(
        backend.samples_for(0),
        (0..8).map(|i| i * FRAME_US).collect::<Vec<_>>()
    );
    Ok(())
}

#[tokio::test]
async fn test_rotated_source_gets_portrait_frames() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let mut backend = FakeBackend::new(3);
    backend.rotation = 90;

    transcode(&backend, false, &output).await.result?;

    let settings = backend.encoder_settings.lock().unwrap().clone().unwrap();
    assert_eq!((settings.width, settings.height), (720, 1280));
    assert!(
        backend
            .frame_sizes
            .lock()
            .unwrap()
            .iter()
            .all(|size| *size == (720, 1280))
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_video_track() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let mut backend = FakeBackend::new(4);
    backend.has_video = false;

    let outcome = transcode(&backend, false, &output).await;

    assert!(matches!(outcome.result, Err(PipelineError::Source(_))));
    assert!(outcome.progress.is_empty());
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_missing_audio_track() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let mut backend = FakeBackend::new(4);
    backend.has_audio = false;

    let outcome = transcode(&backend, true, &output).await;

    assert!(matches!(outcome.result, Err(PipelineError::Source(_))));
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_decoder_fault_removes_output() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let mut backend = FakeBackend::new(8);
    backend.decode_fail_at = Some(4);

    let outcome = transcode(&backend, false, &output).await;

    assert!(matches!(outcome.result, Err(PipelineError::Device(_))));
    assert!(!backend.calls().contains(&WriterCall::Finish));
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_encoder_fault_removes_output() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let mut backend = FakeBackend::new(50);
    backend.encode_fail_at = Some(5);

    let outcome = transcode(&backend, true, &output).await;

    match outcome.result {
        Err(PipelineError::Device(message)) => {
            assert!(message.contains("enc boom"), "{}", message)
        }
        other => panic!("expected device error, got {:?}", other),
    }
    assert!(!backend.calls().contains(&WriterCall::Finish));
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_read_fault_removes_output() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let mut backend = FakeBackend::new(50);
    backend.read_fail_at = Some(20);

    let outcome = transcode(&backend, true, &output).await;

    match outcome.result {
        Err(PipelineError::Source(message)) => {
            assert!(message.contains("io gone"), "{}", message)
        }
        other => panic!("expected source error, got {:?}", other),
    }
    assert!(!backend.calls().contains(&WriterCall::Finish));
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_dropping_stream_cancels() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let backend = FakeBackend::new(500);

    let pipeline = Pipeline::new(Arc::new(backend.clone()));
    let mut stream = pipeline.transcode(PipelineRequest {
        source: SourceLocator::file("fake.mp4"),
        with_audio: false,
        output: output.clone(),
    });
    let first = stream.next().await;
    assert!(matches!(first, Some(Ok(ProcessingEvent::Progress { .. }))));
    drop(stream);

    for _ in 0..100 {
        if !output.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!output.exists());
    assert!(!backend.calls().contains(&WriterCall::Finish));
    Ok(())
}
