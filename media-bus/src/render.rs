use std::{sync::mpsc, thread};

use tokio::sync::oneshot;

use crate::{compositor::Compositor, device::EncoderSurface, frame::DecodedFrame};

/// Rendering state bound to one encoder input surface.
pub struct RenderContext {
    compositor: Compositor,
    surface: EncoderSurface,
}

impl RenderContext {
    pub fn new(compositor: Compositor, surface: EncoderSurface) -> Self {
        Self {
            compositor,
            surface,
        }
    }

    /// Composites `frame` and presents it to the encoder, blocking while the
    /// encoder input is full.
    pub fn render(&mut self, frame: DecodedFrame) -> anyhow::Result<()> {
        let composed = self.compositor.compose(frame);
        self.surface.present(composed)
    }

    pub fn signal_end_of_input(&mut self) -> anyhow::Result<()> {
        self.surface.signal_end_of_input()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.compositor.frames_rendered()
    }
}

type RenderJob = Box<dyn FnOnce(&mut RenderContext) + Send>;

/// OS thread owning a job's render context. Every operation on the context
/// runs on this thread, one at a time, so jobs never share graphics state.
pub struct RenderThread {
    jobs: Option<mpsc::Sender<RenderJob>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl RenderThread {
    pub fn spawn(name: &str, mut context: RenderContext) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<RenderJob>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job(&mut context);
                }
                log::debug!(
                    "[RENDER] context released after {} frames",
                    context.frames_rendered()
                );
            })?;
        Ok(Self {
            jobs: Some(tx),
            worker: Some(worker),
        })
    }

    /// Runs `job` on the render thread with the context bound and returns
    /// its result.
    pub async fn run<R, F>(&self, job: F) -> anyhow::Result<R>
    where
        F: FnOnce(&mut RenderContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("render context already released"))?;
        let (tx, rx) = oneshot::channel();
        jobs.send(Box::new(move |context| {
            let _ = tx.send(job(context));
        }))
        .map_err(|_| anyhow::anyhow!("render thread stopped"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("render thread dropped the job"))
    }

    /// Lets queued work finish, then joins the thread. Safe to call more than once.
    pub async fn release(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => log::warn!("[RENDER] render thread panicked"),
                Err(e) => log::warn!("[RENDER] join failed: {:#?}", e),
            }
        }
    }
}
