//! Fixed output encoding profile.

use crate::track::TrackDescriptor;

pub const ENCODE_MIME: &str = "video/avc";
pub const ENCODE_LONG_EDGE: u32 = 1280;
pub const ENCODE_SHORT_EDGE: u32 = 720;
pub const ENCODE_BITRATE: u64 = 2_000_000;
pub const ENCODE_FRAME_RATE: u32 = 30;
pub const ENCODE_KEYFRAME_INTERVAL_SECS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    /// Orientation of the picture as displayed; square counts as landscape.
    pub fn of(track: &TrackDescriptor) -> Self {
        let (width, height) = track.display_size();
        if height > width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    pub frame_rate: u32,
    pub keyframe_interval_secs: u32,
}

impl EncodeSettings {
    pub fn for_orientation(orientation: Orientation) -> Self {
        let (width, height) = match orientation {
            Orientation::Landscape => (ENCODE_LONG_EDGE, ENCODE_SHORT_EDGE),
            Orientation::Portrait => (ENCODE_SHORT_EDGE, ENCODE_LONG_EDGE),
        };
        Self {
            mime: ENCODE_MIME.to_string(),
            width,
            height,
            bitrate: ENCODE_BITRATE,
            frame_rate: ENCODE_FRAME_RATE,
            keyframe_interval_secs: ENCODE_KEYFRAME_INTERVAL_SECS,
        }
    }

    pub fn for_source(track: &TrackDescriptor) -> Self {
        Self::for_orientation(Orientation::of(track))
    }

    /// Frames between two key frames.
    pub fn gop_size(&self) -> u32 {
        self.frame_rate * self.keyframe_interval_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_source_gets_landscape_target() {
        let track = TrackDescriptor::video(0, "video/avc", 1920, 1080);
        let settings = EncodeSettings::for_source(&track);
        assert_eq!((settings.width, settings.height), (1280, 720));
        assert_eq!(settings.bitrate, 2_000_000);
        assert_eq!(settings.gop_size(), 60);
    }

    #[test]
    fn upright_portrait_source_gets_portrait_target() {
        let track = TrackDescriptor::video(0, "video/avc", 1080, 1920);
        let settings = EncodeSettings::for_source(&track);
        assert_eq!((settings.width, settings.height), (720, 1280));
    }

    #[test]
    fn rotated_source_gets_portrait_target() {
        let track = TrackDescriptor::video(0, "video/avc", 1920, 1080).with_rotation(90);
        assert_eq!(Orientation::of(&track), Orientation::Portrait);
        let settings = EncodeSettings::for_source(&track);
        assert_eq!((settings.width, settings.height), (720, 1280));
    }

    #[test]
    fn square_source_is_landscape() {
        let track = TrackDescriptor::video(0, "video/avc", 500, 500);
        assert_eq!(Orientation::of(&track), Orientation::Landscape);
    }
}
