use crate::{packet::Sample, track::TrackDescriptor};

/// MP4 container writer.
///
/// Tracks are registered before [`ContainerWriter::start`]; samples are only
/// accepted after it. `finish` writes the trailer and may be called once.
pub trait ContainerWriter: Send {
    /// Registers a track and returns the writer-side track index.
    fn add_track(&mut self, track: &TrackDescriptor) -> anyhow::Result<usize>;

    fn start(&mut self) -> anyhow::Result<()>;

    fn write_sample(&mut self, track: usize, sample: Sample) -> anyhow::Result<()>;

    fn finish(&mut self) -> anyhow::Result<()>;
}
