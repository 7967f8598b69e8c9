use bytes::Bytes;
use ffmpeg_next::{Dictionary, Rational, Rescale, codec::Parameters, format::Pixel};

use super::{
    MICROS,
    hw::{SOFTWARE_H264_ENCODER, find_hw_encoder, pixel_format_for_encoder},
    scaler::Scaler,
    stream::AvStream,
};
use crate::{
    device::EncoderEngine,
    frame::ComposedFrame,
    packet::Sample,
    profile::EncodeSettings,
    track::{CodecHandle, TrackDescriptor},
};

/// H.264 encoder fed with RGBA frames. The output format is known as soon
/// as the codec opens because stream headers go to extradata.
pub struct FfmpegEncoder {
    encoder: ffmpeg_next::codec::encoder::Video,
    time_base: Rational,
    frame_duration_us: i64,
    scaler: Option<Scaler>,
    format: TrackDescriptor,
}

unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    pub fn new(settings: &EncodeSettings) -> anyhow::Result<Self> {
        // Try hardware encoder first, then fall back to software encoder.
        let encoder = match find_hw_encoder() {
            Some(hw_codec) => {
                let hw_name = hw_codec.name().to_string();
                log::info!("attempting hardware encoder: {}", hw_name);
                match Self::open(hw_codec, &hw_name, settings) {
                    Ok(encoder) => encoder,
                    Err(e) => {
                        log::warn!(
                            "hardware encoder {} failed: {}, falling back to {}",
                            hw_name,
                            e,
                            SOFTWARE_H264_ENCODER
                        );
                        Self::open_software(settings)?
                    }
                }
            }
            None => {
                log::info!(
                    "no hardware encoder found, using software encoder: {}",
                    SOFTWARE_H264_ENCODER
                );
                Self::open_software(settings)?
            }
        };

        let time_base: Rational = unsafe { (*encoder.0.as_ptr()).time_base.into() };
        let mut parameters = Parameters::new();
        let codec_config = unsafe {
            let ctx = encoder.0.as_ptr();
            ffmpeg_next::ffi::avcodec_parameters_from_context(parameters.as_mut_ptr(), ctx);
            if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
                Bytes::new()
            } else {
                Bytes::copy_from_slice(std::slice::from_raw_parts(
                    (*ctx).extradata,
                    (*ctx).extradata_size as usize,
                ))
            }
        };
        let rate = Rational::new(settings.frame_rate as i32, 1);
        let format = TrackDescriptor {
            mime: settings.mime.clone(),
            width: settings.width,
            height: settings.height,
            frame_rate: settings.frame_rate as f32,
            codec_config,
            codec: Some(CodecHandle::new(AvStream::from_parameters(
                parameters, time_base, rate,
            ))),
            ..Default::default()
        };

        Ok(Self {
            encoder,
            time_base,
            frame_duration_us: 1_000_000 / settings.frame_rate.max(1) as i64,
            scaler: None,
            format,
        })
    }

    fn open_software(
        settings: &EncodeSettings,
    ) -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
        let codec = ffmpeg_next::encoder::find_by_name(SOFTWARE_H264_ENCODER)
            .ok_or(anyhow::anyhow!("codec not found: {}", SOFTWARE_H264_ENCODER))?;
        let encoder = Self::open(codec, SOFTWARE_H264_ENCODER, settings)?;
        log::info!("encoder opened successfully: {}", SOFTWARE_H264_ENCODER);
        Ok(encoder)
    }

    fn open(
        codec: ffmpeg_next::Codec,
        codec_name: &str,
        settings: &EncodeSettings,
    ) -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
        let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        let mut encoder = ctx.encoder().video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(pixel_format_for_encoder(codec_name));
        encoder.set_bit_rate(settings.bitrate as usize);
        encoder.set_gop(settings.gop_size());
        encoder.set_max_b_frames(0);
        encoder.set_frame_rate(Some(Rational::new(settings.frame_rate as i32, 1)));
        encoder.set_time_base(MICROS);
        encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);

        let mut opts = Dictionary::new();
        if codec_name == SOFTWARE_H264_ENCODER {
            opts.set("preset", "veryfast");
        }
        Ok(encoder.open_with(opts)?)
    }

    fn to_encoder_frame(
        &mut self,
        frame: &ComposedFrame,
    ) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let (width, height) = (frame.texture.width(), frame.texture.height());
        let mut rgba = ffmpeg_next::frame::Video::new(Pixel::RGBA, width, height);
        let stride = rgba.stride(0);
        let row = width as usize * 4;
        let pixels = frame.texture.pixels();
        let data = rgba.data_mut(0);
        for y in 0..height as usize {
            data[y * stride..y * stride + row].copy_from_slice(&pixels[y * row..(y + 1) * row]);
        }

        let shape = (Pixel::RGBA, width, height);
        if !self.scaler.as_ref().is_some_and(|s| s.accepts(shape)) {
            let output = (
                self.encoder.format(),
                self.encoder.width(),
                self.encoder.height(),
            );
            self.scaler = Some(Scaler::new(shape, output)?);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("scaler unavailable"))?;
        let mut converted = ffmpeg_next::frame::Video::empty();
        scaler.run(&rgba, &mut converted)?;
        converted.set_pts(Some(frame.pts_us.rescale(MICROS, self.time_base)));
        Ok(converted)
    }

    fn receive_packets(&mut self) -> anyhow::Result<Vec<Sample>> {
        let mut samples = Vec::new();
        loop {
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let pts = packet.pts().unwrap_or(0).rescale(self.time_base, MICROS);
                    let dts = packet.dts().map(|d| d.rescale(self.time_base, MICROS));
                    let duration = match packet.duration() {
                        d if d > 0 => d.rescale(self.time_base, MICROS),
                        _ => self.frame_duration_us,
                    };
                    samples.push(Sample {
                        track_index: 0,
                        data: packet.data().map(Bytes::copy_from_slice).unwrap_or_default(),
                        pts_us: pts,
                        dts_us: dts.unwrap_or(pts),
                        duration_us: duration,
                        is_key: packet.is_key(),
                    });
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(samples)
    }
}

impl EncoderEngine for FfmpegEncoder {
    fn encode(&mut self, frame: ComposedFrame) -> anyhow::Result<Vec<Sample>> {
        let converted = self.to_encoder_frame(&frame)?;
        self.encoder.send_frame(&converted)?;
        self.receive_packets()
    }

    fn flush(&mut self) -> anyhow::Result<Vec<Sample>> {
        self.encoder.send_eof()?;
        self.receive_packets()
    }

    fn output_format(&self) -> Option<TrackDescriptor> {
        Some(self.format.clone())
    }
}
