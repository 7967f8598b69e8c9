use std::fmt::Display;

use thiserror::Error;

/// Failure of a processing run. Every variant is fatal for the run; the
/// partial output is removed before the error reaches the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not be opened or lacks a required track.
    #[error("source error: {0}")]
    Source(String),
    /// A decoder, encoder or the render context reported a fault.
    #[error("device error: {0}")]
    Device(String),
    /// Writing, hashing or storing output failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("processing cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn source(err: impl Display) -> Self {
        Self::Source(format!("{:#}", err))
    }

    pub fn device(err: impl Display) -> Self {
        Self::Device(format!("{:#}", err))
    }

    pub fn io(err: impl Display) -> Self {
        Self::Io(std::io::Error::other(format!("{:#}", err)))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
