//! Hardware-accelerated H.264 codec discovery with software fallback.

/// Software encoder used when no hardware encoder opens.
pub const SOFTWARE_H264_ENCODER: &str = "libx264";

/// Returns the first available hardware decoder for `codec_id`.
pub fn find_hw_decoder(codec_id: ffmpeg_next::codec::Id) -> Option<ffmpeg_next::Codec> {
    let hw_names: &[&str] = match codec_id {
        ffmpeg_next::codec::Id::H264 => &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
        ffmpeg_next::codec::Id::HEVC => &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
        ffmpeg_next::codec::Id::VP9 => &["vp9_cuvid", "vp9_qsv", "vp9_v4l2m2m"],
        _ => &[],
    };

    for name in hw_names {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}

/// Returns the first available hardware H.264 encoder.
pub fn find_hw_encoder() -> Option<ffmpeg_next::Codec> {
    for name in ["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"] {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            log::info!("found hardware encoder: {}", name);
            return Some(codec);
        }
    }
    None
}

/// Hardware encoders commonly prefer NV12, libx264 takes YUV420P.
pub fn pixel_format_for_encoder(codec_name: &str) -> ffmpeg_next::format::Pixel {
    let is_hw = codec_name.contains("nvenc")
        || codec_name.contains("vaapi")
        || codec_name.contains("qsv")
        || codec_name.contains("v4l2m2m");
    if is_hw {
        ffmpeg_next::format::Pixel::NV12
    } else {
        ffmpeg_next::format::Pixel::YUV420P
    }
}
