//! Media processing core: source tracks, codec devices, the per-job render
//! thread and the pipeline orchestrator that ties them together.
//!
//! The orchestrator talks to codecs only through [`backend::MediaBackend`];
//! the FFmpeg implementation lives behind the `ffmpeg` feature.

/// Registers FFmpeg components. Call once at startup before opening sources.
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod backend;
pub mod compositor;
pub mod device;
pub mod error;
mod feed;
pub mod frame;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod profile;
pub mod render;
pub mod source;
pub mod track;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::{
    Pipeline, PipelineRequest, ProcessingEvent, ProcessingStats, ProcessingStream, Transcoder,
};
pub use source::SourceLocator;
