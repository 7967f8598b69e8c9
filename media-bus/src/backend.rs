use std::path::Path;

use crate::{
    device::{DecoderEngine, EncoderEngine},
    output::ContainerWriter,
    profile::EncodeSettings,
    source::{Demuxer, SourceLocator},
    track::TrackDescriptor,
};

/// Factory for the platform pieces a processing run needs. All methods are
/// called from blocking threads and may perform I/O.
pub trait MediaBackend: Send + Sync + 'static {
    fn open_source(&self, locator: &SourceLocator) -> anyhow::Result<Box<dyn Demuxer>>;

    fn create_decoder(&self, track: &TrackDescriptor) -> anyhow::Result<Box<dyn DecoderEngine>>;

    fn create_encoder(&self, settings: &EncodeSettings) -> anyhow::Result<Box<dyn EncoderEngine>>;

    fn create_writer(&self, path: &Path) -> anyhow::Result<Box<dyn ContainerWriter>>;
}
