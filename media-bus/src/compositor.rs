//! Letterboxing compositor and one-shot thumbnail capture.

use std::sync::{Arc, Mutex};

use crate::frame::{ComposedFrame, DecodedFrame, Texture, Thumbnail};

pub type SnapshotCallback = Box<dyn FnOnce(Thumbnail) + Send>;

/// One-shot thumbnail request shared between a job and its render thread.
/// The callback is taken under the lock, so it fires at most once.
#[derive(Clone, Default)]
pub struct SnapshotSlot(Arc<Mutex<Option<SnapshotCallback>>>);

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, callback: SnapshotCallback) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(callback);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.0.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn take(&self) -> Option<SnapshotCallback> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest rectangle with the source aspect ratio that fits the target,
/// centred. The remaining area is padding.
pub fn letterbox(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Viewport {
    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Viewport {
            x: 0,
            y: 0,
            width: dst_width,
            height: dst_height,
        };
    }
    let scale = (dst_width as f64 / src_width as f64).min(dst_height as f64 / src_height as f64);
    let width = ((src_width as f64 * scale).round() as u32).clamp(1, dst_width);
    let height = ((src_height as f64 * scale).round() as u32).clamp(1, dst_height);
    Viewport {
        x: (dst_width - width) / 2,
        y: (dst_height - height) / 2,
        width,
        height,
    }
}

/// Maps normalized display coordinates back to texture coordinates for a
/// picture that is shown rotated clockwise by `rotation` degrees.
fn unrotate(rotation: u32, u: f32, v: f32) -> (f32, f32) {
    match rotation {
        90 => (v, 1.0 - u),
        180 => (1.0 - u, 1.0 - v),
        270 => (1.0 - v, u),
        _ => (u, v),
    }
}

fn texel(coord: f32, size: u32) -> u32 {
    ((coord * size as f32).floor().max(0.0) as u32).min(size - 1)
}

pub struct Compositor {
    width: u32,
    height: u32,
    rotation: u32,
    frames_rendered: u64,
    snapshot: SnapshotSlot,
}

impl Compositor {
    pub fn new(width: u32, height: u32, rotation: u32, snapshot: SnapshotSlot) -> Self {
        Self {
            width,
            height,
            rotation,
            frames_rendered: 0,
            snapshot,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Draws `frame` letterboxed onto a black target. Once at least one frame
    /// has been rendered, an armed snapshot request is served from the result.
    pub fn compose(&mut self, frame: DecodedFrame) -> ComposedFrame {
        let texture = self.draw(&frame);
        if self.frames_rendered > 0 {
            self.serve_snapshot(&texture);
        }
        self.frames_rendered += 1;
        ComposedFrame {
            texture,
            pts_us: frame.pts_us,
        }
    }

    fn draw(&self, frame: &DecodedFrame) -> Texture {
        let src = &frame.texture;
        let mut out = Texture::new(self.width, self.height);
        if src.width() == 0 || src.height() == 0 {
            return out;
        }
        let (display_width, display_height) = match self.rotation {
            90 | 270 => (src.height(), src.width()),
            _ => (src.width(), src.height()),
        };
        let view = letterbox(display_width, display_height, self.width, self.height);
        let m = &frame.transform;
        for dy in 0..view.height {
            let dv = (dy as f32 + 0.5) / view.height as f32;
            for dx in 0..view.width {
                let du = (dx as f32 + 0.5) / view.width as f32;
                let (u, v) = unrotate(self.rotation, du, dv);
                let s = m[0] * u + m[4] * v + m[12];
                let t = m[1] * u + m[5] * v + m[13];
                let px = src.pixel(texel(s, src.width()), texel(t, src.height()));
                out.put_pixel(view.x + dx, view.y + dy, px);
            }
        }
        out
    }

    fn serve_snapshot(&self, texture: &Texture) {
        let Some(callback) = self.snapshot.take() else {
            return;
        };
        match Thumbnail::encode(texture, Thumbnail::QUALITY) {
            Ok(thumbnail) => callback(thumbnail),
            Err(e) => log::warn!("[RENDER] thumbnail encode failed: {:#}", e),
        }
    }
}
