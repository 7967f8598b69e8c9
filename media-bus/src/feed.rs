use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    device::FaultSender,
    error::PipelineError,
    packet::{Sample, SampleCmd},
    source::Demuxer,
};

#[derive(Debug, Default)]
pub(crate) struct FeedCounters {
    pub video_samples: AtomicU64,
    pub audio_samples: AtomicU64,
}

/// Where the feed sends each selected track.
pub(crate) struct FeedRoutes {
    pub video_track: usize,
    pub decoder: mpsc::Sender<SampleCmd>,
    pub audio_track: Option<usize>,
    pub audio: mpsc::UnboundedSender<Sample>,
}

/// Reads the demuxer on a blocking thread. Video samples wait for room in
/// the decoder input; audio samples are queued for the writer.
pub(crate) struct FeedTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl FeedTask {
    pub fn start(
        demuxer: Box<dyn Demuxer>,
        routes: FeedRoutes,
        faults: FaultSender,
        counters: Arc<FeedCounters>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let inner = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            Self::feed_loop(demuxer, routes, inner, faults, counters)
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    fn feed_loop(
        mut demuxer: Box<dyn Demuxer>,
        routes: FeedRoutes,
        cancel: CancellationToken,
        faults: FaultSender,
        counters: Arc<FeedCounters>,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let sample = match demuxer.read_sample() {
                Ok(Some(sample)) => sample,
                Ok(None) => {
                    log::debug!(
                        "[FEED] source exhausted, video: {}, audio: {}",
                        counters.video_samples.load(Ordering::Relaxed),
                        counters.audio_samples.load(Ordering::Relaxed)
                    );
                    let _ = routes.decoder.blocking_send(SampleCmd::Eof);
                    break;
                }
                Err(e) => {
                    log::error!("[FEED] read error: {:#?}", e);
                    let _ = faults.send(PipelineError::source(e));
                    break;
                }
            };

            if sample.track_index == routes.video_track {
                if routes.decoder.blocking_send(SampleCmd::Data(sample)).is_err() {
                    log::debug!("[FEED] decoder input closed");
                    break;
                }
                counters.video_samples.fetch_add(1, Ordering::Relaxed);
            } else if Some(sample.track_index) == routes.audio_track {
                if routes.audio.send(sample).is_err() {
                    break;
                }
                counters.audio_samples.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Stops reading and waits for the thread, which drops the demuxer.
    pub async fn release(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("[FEED] worker ended abnormally: {:#?}", e);
            }
            log::debug!("[FEED] released");
        }
    }
}
