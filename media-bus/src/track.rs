use std::{any::Any, fmt, sync::Arc};

use bytes::Bytes;

pub const VIDEO_PREFIX: &str = "video/";
pub const AUDIO_PREFIX: &str = "audio/";

/// Backend-owned codec description carried alongside a track so that the
/// same backend can later configure a decoder or a container stream from it.
#[derive(Clone)]
pub struct CodecHandle(Arc<dyn Any + Send + Sync>);

impl CodecHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for CodecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodecHandle(..)")
    }
}

/// Immutable snapshot of one elementary stream in a container.
#[derive(Clone, Debug, Default)]
pub struct TrackDescriptor {
    pub index: usize,
    /// Mime type such as `video/avc` or `audio/mp4a-latm`.
    pub mime: String,
    pub width: u32,
    pub height: u32,
    /// Track duration in microseconds, 0 when unknown.
    pub duration_us: i64,
    pub sample_rate: u32,
    pub channels: u32,
    /// Clockwise display rotation in degrees: 0, 90, 180 or 270.
    pub rotation: u32,
    pub frame_rate: f32,
    /// Codec specific data (e.g. SPS/PPS), empty when not applicable.
    pub codec_config: Bytes,
    pub codec: Option<CodecHandle>,
}

impl TrackDescriptor {
    pub fn video(index: usize, mime: &str, width: u32, height: u32) -> Self {
        Self {
            index,
            mime: mime.to_string(),
            width,
            height,
            ..Default::default()
        }
    }

    pub fn audio(index: usize, mime: &str, sample_rate: u32, channels: u32) -> Self {
        Self {
            index,
            mime: mime.to_string(),
            sample_rate,
            channels,
            ..Default::default()
        }
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = duration_us;
        self
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation = normalize_rotation(degrees);
        self
    }

    /// Size of the picture once display rotation is applied.
    pub fn display_size(&self) -> (u32, u32) {
        match self.rotation {
            90 | 270 => (self.height, self.width),
            _ => (self.width, self.height),
        }
    }
}

/// Snaps an arbitrary angle to the nearest quarter turn in `[0, 360)`.
pub fn normalize_rotation(degrees: i32) -> u32 {
    let quarter = ((degrees as f64) / 90.0).round() as i32;
    (quarter.rem_euclid(4) * 90) as u32
}

/// First track whose mime type starts with `prefix`.
pub fn pick_track<'a>(tracks: &'a [TrackDescriptor], prefix: &str) -> Option<&'a TrackDescriptor> {
    tracks.iter().find(|t| t.mime.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_is_snapped_to_quarter_turns() {
        assert_eq!(normalize_rotation(0), 0);
        assert_eq!(normalize_rotation(90), 90);
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(179), 180);
    }

    #[test]
    fn display_size_swaps_for_quarter_turns() {
        let track = TrackDescriptor::video(0, "video/avc", 1920, 1080).with_rotation(90);
        assert_eq!(track.display_size(), (1080, 1920));
        let track = track.with_rotation(180);
        assert_eq!(track.display_size(), (1920, 1080));
    }

    #[test]
    fn pick_track_returns_first_match() {
        let tracks = vec![
            TrackDescriptor::audio(0, "audio/mp4a-latm", 44_100, 2),
            TrackDescriptor::video(1, "video/avc", 640, 480),
            TrackDescriptor::video(2, "video/hevc", 640, 480),
        ];
        assert_eq!(pick_track(&tracks, VIDEO_PREFIX).map(|t| t.index), Some(1));
        assert_eq!(pick_track(&tracks, AUDIO_PREFIX).map(|t| t.index), Some(0));
        assert!(pick_track(&tracks, "text/").is_none());
    }
}
