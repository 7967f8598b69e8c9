//! Asynchronous codec devices.
//!
//! Each device owns a codec engine and runs it on a tokio task. Engine calls
//! are executed on the blocking pool; inputs and outputs travel through
//! bounded channels so that a slow stage back-pressures the stage before it.
//! Engine failures are reported once on the shared fault channel and stop
//! the device.

use std::future::Future;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::PipelineError,
    frame::{ComposedFrame, DecodedFrame},
    packet::{Sample, SampleCmd},
    track::TrackDescriptor,
};

/// Compressed samples queued in front of the decoder.
pub const DECODER_INPUT_CAP: usize = 8;
/// Decoded frames waiting for the render thread. Frames are large, keep it small.
pub const DECODER_OUTPUT_CAP: usize = 4;
pub const ENCODER_INPUT_CAP: usize = 4;
pub const ENCODER_OUTPUT_CAP: usize = 32;

pub type FaultSender = mpsc::UnboundedSender<PipelineError>;
pub type FaultReceiver = mpsc::UnboundedReceiver<PipelineError>;

/// Synchronous video decoder. Calls may block.
pub trait DecoderEngine: Send {
    /// Feeds one compressed sample and returns the frames that became ready.
    fn decode(&mut self, sample: Sample) -> anyhow::Result<Vec<DecodedFrame>>;

    /// Drains frames still buffered after the last sample.
    fn flush(&mut self) -> anyhow::Result<Vec<DecodedFrame>>;
}

/// Synchronous video encoder. Calls may block.
pub trait EncoderEngine: Send {
    fn encode(&mut self, frame: ComposedFrame) -> anyhow::Result<Vec<Sample>>;

    fn flush(&mut self) -> anyhow::Result<Vec<Sample>>;

    /// Output track format, `None` until the codec configuration is known.
    fn output_format(&self) -> Option<TrackDescriptor>;
}

#[derive(Debug)]
pub enum DecoderEvent {
    Frame(DecodedFrame),
    Finished,
}

#[derive(Debug)]
pub enum EncoderInput {
    Frame(ComposedFrame),
    EndOfStream,
}

#[derive(Debug)]
pub enum EncoderEvent {
    /// Emitted once, before or after the first data depending on the codec.
    FormatChanged(TrackDescriptor),
    Data(Sample),
    EndOfStream,
}

/// Running device. Releasing it stops the worker and drops the engine.
pub struct DeviceHandle {
    name: &'static str,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    fn spawn<F>(name: &'static str, cancel: CancellationToken, worker: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            cancel,
            task: Some(tokio::spawn(worker)),
        }
    }

    /// Stops the worker and waits for it. Safe to call more than once.
    pub async fn release(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("[{}] worker ended abnormally: {:#?}", self.name, e);
            }
            log::debug!("[{}] released", self.name);
        }
    }
}

pub struct DecoderPorts {
    pub input: mpsc::Sender<SampleCmd>,
    pub events: mpsc::Receiver<DecoderEvent>,
}

pub fn start_decoder(
    engine: Box<dyn DecoderEngine>,
    faults: FaultSender,
) -> (DeviceHandle, DecoderPorts) {
    let cancel = CancellationToken::new();
    let (input_tx, input_rx) = mpsc::channel(DECODER_INPUT_CAP);
    let (events_tx, events_rx) = mpsc::channel(DECODER_OUTPUT_CAP);
    let handle = DeviceHandle::spawn(
        "DECODER",
        cancel.clone(),
        decoder_loop(engine, cancel, input_rx, events_tx, faults),
    );
    (
        handle,
        DecoderPorts {
            input: input_tx,
            events: events_rx,
        },
    )
}

/// Producer side of the encoder input. The render thread owns it and
/// presents composited frames into it.
pub struct EncoderSurface {
    tx: mpsc::Sender<EncoderInput>,
}

impl EncoderSurface {
    /// Blocks the calling thread until the encoder accepts the frame.
    /// Must not be called from an async context.
    pub fn present(&self, frame: ComposedFrame) -> anyhow::Result<()> {
        self.tx
            .blocking_send(EncoderInput::Frame(frame))
            .map_err(|_| anyhow::anyhow!("encoder input surface closed"))
    }

    pub fn signal_end_of_input(&self) -> anyhow::Result<()> {
        self.tx
            .blocking_send(EncoderInput::EndOfStream)
            .map_err(|_| anyhow::anyhow!("encoder input surface closed"))
    }
}

pub fn start_encoder(
    engine: Box<dyn EncoderEngine>,
    faults: FaultSender,
) -> (DeviceHandle, EncoderSurface, mpsc::Receiver<EncoderEvent>) {
    let cancel = CancellationToken::new();
    let (input_tx, input_rx) = mpsc::channel(ENCODER_INPUT_CAP);
    let (events_tx, events_rx) = mpsc::channel(ENCODER_OUTPUT_CAP);
    let handle = DeviceHandle::spawn(
        "ENCODER",
        cancel.clone(),
        encoder_loop(engine, cancel, input_rx, events_tx, faults),
    );
    (handle, EncoderSurface { tx: input_tx }, events_rx)
}

/// Runs one engine call on the blocking pool and hands the engine back.
async fn run_engine<E, R, F>(mut engine: Box<E>, call: F) -> anyhow::Result<(Box<E>, R)>
where
    E: ?Sized + Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut E) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = call(&mut *engine);
        (engine, result)
    })
    .await
    .map_err(|e| anyhow::anyhow!("engine call panicked: {}", e))
}

/// Sends `item` unless the device is cancelled first. False when the item
/// could not be delivered.
async fn deliver<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

async fn decoder_loop(
    mut engine: Box<dyn DecoderEngine>,
    cancel: CancellationToken,
    mut input: mpsc::Receiver<SampleCmd>,
    events: mpsc::Sender<DecoderEvent>,
    faults: FaultSender,
) {
    let mut decoded: u64 = 0;
    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = input.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        let eof = matches!(cmd, SampleCmd::Eof);
        let (returned, result) = match run_engine(engine, move |e| match cmd {
            SampleCmd::Data(sample) => e.decode(sample),
            SampleCmd::Eof => e.flush(),
        })
        .await
        {
            Ok(r) => r,
            Err(e) => {
                let _ = faults.send(PipelineError::device(e));
                return;
            }
        };
        engine = returned;

        let frames = match result {
            Ok(frames) => frames,
            Err(e) => {
                log::error!("[DECODER] decode error: {:#?}", e);
                let _ = faults.send(PipelineError::Device(format!("decoder: {:#}", e)));
                return;
            }
        };
        for frame in frames {
            decoded += 1;
            if !deliver(&events, DecoderEvent::Frame(frame), &cancel).await {
                return;
            }
        }
        if eof {
            log::debug!("[DECODER] end of stream after {} frames", decoded);
            deliver(&events, DecoderEvent::Finished, &cancel).await;
            return;
        }
    }
    log::debug!("[DECODER] stopped after {} frames", decoded);
}

async fn encoder_loop(
    mut engine: Box<dyn EncoderEngine>,
    cancel: CancellationToken,
    mut input: mpsc::Receiver<EncoderInput>,
    events: mpsc::Sender<EncoderEvent>,
    faults: FaultSender,
) {
    let mut format_sent = false;
    let mut encoded: u64 = 0;
    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = input.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        let eos = matches!(cmd, EncoderInput::EndOfStream);
        let want_format = !format_sent;
        let (returned, (result, format)) = match run_engine(engine, move |e| {
            let result = match cmd {
                EncoderInput::Frame(frame) => e.encode(frame),
                EncoderInput::EndOfStream => e.flush(),
            };
            let format = if want_format { e.output_format() } else { None };
            (result, format)
        })
        .await
        {
            Ok(r) => r,
            Err(e) => {
                let _ = faults.send(PipelineError::device(e));
                return;
            }
        };
        engine = returned;

        let samples = match result {
            Ok(samples) => samples,
            Err(e) => {
                log::error!("[ENCODER] encode error: {:#?}", e);
                let _ = faults.send(PipelineError::Device(format!("encoder: {:#}", e)));
                return;
            }
        };
        if let Some(format) = format {
            format_sent = true;
            log::debug!(
                "[ENCODER] output format {} {}x{}",
                format.mime,
                format.width,
                format.height
            );
            if !deliver(&events, EncoderEvent::FormatChanged(format), &cancel).await {
                return;
            }
        }
        for sample in samples {
            encoded += 1;
            if !deliver(&events, EncoderEvent::Data(sample), &cancel).await {
                return;
            }
        }
        if eos {
            log::debug!("[ENCODER] end of stream after {} samples", encoded);
            deliver(&events, EncoderEvent::EndOfStream, &cancel).await;
            return;
        }
    }
    log::debug!("[ENCODER] stopped after {} samples", encoded);
}
