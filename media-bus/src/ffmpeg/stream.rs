use ffmpeg_next::{Rational, codec::Id, codec::Parameters, format::stream, media};

use crate::track::{CodecHandle, TrackDescriptor, normalize_rotation};

unsafe impl Send for AvStream {}
unsafe impl Sync for AvStream {}

/// Owned copy of a stream's codec parameters and timing. Stored inside a
/// track's [`CodecHandle`] so decoders and writers can be configured from it.
pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
}

impl AvStream {
    pub fn from_parameters(parameters: Parameters, time_base: Rational, rate: Rational) -> Self {
        Self {
            index: 0,
            parameters,
            time_base,
            rate,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn fps(&self) -> f32 {
        if self.rate.denominator() == 0 {
            return 0.0;
        }
        self.rate.numerator() as f32 / self.rate.denominator() as f32
    }

    fn raw(&self) -> &ffmpeg_next::ffi::AVCodecParameters {
        unsafe { &*(self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters) }
    }

    pub fn width(&self) -> u32 {
        self.raw().width.max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.raw().height.max(0) as u32
    }

    /// Snapshot of this stream as a backend-neutral track.
    pub fn descriptor(&self, duration_us: i64, rotation: i32) -> TrackDescriptor {
        let raw = self.raw();
        TrackDescriptor {
            index: self.index,
            mime: mime_for(self.parameters.medium(), self.parameters.id()),
            width: self.width(),
            height: self.height(),
            duration_us,
            sample_rate: raw.sample_rate.max(0) as u32,
            channels: raw.ch_layout.nb_channels.max(0) as u32,
            rotation: normalize_rotation(rotation),
            frame_rate: self.fps(),
            codec_config: extradata(raw),
            codec: Some(CodecHandle::new(self.clone())),
        }
    }
}

fn extradata(raw: &ffmpeg_next::ffi::AVCodecParameters) -> bytes::Bytes {
    if raw.extradata.is_null() || raw.extradata_size <= 0 {
        return bytes::Bytes::new();
    }
    let data = unsafe { std::slice::from_raw_parts(raw.extradata, raw.extradata_size as usize) };
    bytes::Bytes::copy_from_slice(data)
}

/// Android-style mime type for a codec.
pub fn mime_for(medium: media::Type, id: Id) -> String {
    let known = match id {
        Id::H264 => Some("video/avc"),
        Id::HEVC => Some("video/hevc"),
        Id::MPEG4 => Some("video/mp4v-es"),
        Id::H263 => Some("video/3gpp"),
        Id::VP8 => Some("video/x-vnd.on2.vp8"),
        Id::VP9 => Some("video/x-vnd.on2.vp9"),
        Id::AV1 => Some("video/av01"),
        Id::AAC => Some("audio/mp4a-latm"),
        Id::MP3 => Some("audio/mpeg"),
        Id::OPUS => Some("audio/opus"),
        Id::VORBIS => Some("audio/vorbis"),
        Id::FLAC => Some("audio/flac"),
        Id::AMR_NB => Some("audio/3gpp"),
        Id::AMR_WB => Some("audio/amr-wb"),
        _ => None,
    };
    if let Some(mime) = known {
        return mime.to_string();
    }
    let kind = match medium {
        media::Type::Video => "video",
        media::Type::Audio => "audio",
        media::Type::Subtitle => "text",
        _ => "application",
    };
    format!("{}/x-ffmpeg-{:?}", kind, id).to_lowercase()
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
            rate: stream.avg_frame_rate(),
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
        }
    }
}
