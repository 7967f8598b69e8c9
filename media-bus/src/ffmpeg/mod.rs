//! FFmpeg implementation of [`MediaBackend`].

use std::path::Path;

use crate::{
    backend::MediaBackend,
    device::{DecoderEngine, EncoderEngine},
    output::ContainerWriter,
    profile::EncodeSettings,
    source::{Demuxer, SourceLocator},
    track::TrackDescriptor,
};

pub mod decoder;
pub mod encoder;
pub mod hw;
pub mod input;
pub mod output;
pub mod scaler;
pub mod stream;

/// Microsecond time base used for every sample crossing the backend boundary.
pub const MICROS: ffmpeg_next::Rational = ffmpeg_next::Rational(1, 1_000_000);

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> anyhow::Result<Self> {
        crate::init()?;
        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_source(&self, locator: &SourceLocator) -> anyhow::Result<Box<dyn Demuxer>> {
        Ok(Box::new(input::FfmpegDemuxer::open(locator)?))
    }

    fn create_decoder(&self, track: &TrackDescriptor) -> anyhow::Result<Box<dyn DecoderEngine>> {
        Ok(Box::new(decoder::FfmpegDecoder::new(track)?))
    }

    fn create_encoder(&self, settings: &EncodeSettings) -> anyhow::Result<Box<dyn EncoderEngine>> {
        Ok(Box::new(encoder::FfmpegEncoder::new(settings)?))
    }

    fn create_writer(&self, path: &Path) -> anyhow::Result<Box<dyn ContainerWriter>> {
        Ok(Box::new(output::FfmpegWriter::new(path)?))
    }
}
