use ffmpeg_next::format::Pixel;

use super::{MICROS, hw::find_hw_decoder, scaler::Scaler, stream::AvStream};
use crate::{
    device::DecoderEngine,
    frame::{DecodedFrame, Texture},
    packet::Sample,
    track::TrackDescriptor,
};

pub struct FfmpegDecoder {
    decoder: ffmpeg_next::codec::decoder::Video,
    scaler: Option<Scaler>,
}

unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    pub fn new(track: &TrackDescriptor) -> anyhow::Result<Self> {
        let stream = track
            .codec
            .as_ref()
            .and_then(|codec| codec.downcast_ref::<AvStream>())
            .ok_or_else(|| anyhow::anyhow!("track {} has no ffmpeg parameters", track.index))?;

        let hw = find_hw_decoder(stream.parameters().id());
        let decoder = match hw.map(|codec| Self::open(stream, Some(codec))) {
            Some(Ok(decoder)) => decoder,
            Some(Err(e)) => {
                log::warn!("hardware decoder failed: {}, falling back to software", e);
                Self::open(stream, None)?
            }
            None => Self::open(stream, None)?,
        };

        if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
            return Err(anyhow::anyhow!("missing codec parameters"));
        }
        Ok(Self {
            decoder,
            scaler: None,
        })
    }

    fn open(
        stream: &AvStream,
        codec: Option<ffmpeg_next::Codec>,
    ) -> anyhow::Result<ffmpeg_next::codec::decoder::Video> {
        let mut ctx = match codec {
            Some(codec) => ffmpeg_next::codec::Context::new_with_codec(codec),
            None => ffmpeg_next::codec::Context::new(),
        };
        unsafe {
            (*ctx.as_mut_ptr()).time_base = MICROS.into();
            (*ctx.as_mut_ptr()).pkt_timebase = MICROS.into();
        }
        ctx.set_parameters(stream.parameters().clone())?;
        Ok(ctx.decoder().video()?)
    }

    fn receive_frames(&mut self) -> anyhow::Result<Vec<DecodedFrame>> {
        let mut frames = Vec::new();
        loop {
            let mut frame = ffmpeg_next::frame::Video::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => {
                    let pts_us = frame.timestamp().or(frame.pts()).unwrap_or(0);
                    frames.push(DecodedFrame::new(self.to_texture(&frame)?, pts_us));
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(frames)
    }

    fn to_texture(&mut self, frame: &ffmpeg_next::frame::Video) -> anyhow::Result<Texture> {
        let (width, height) = (frame.width(), frame.height());
        let shape = (frame.format(), width, height);
        if !self.scaler.as_ref().is_some_and(|s| s.accepts(shape)) {
            self.scaler = Some(Scaler::new(shape, (Pixel::RGBA, width, height))?);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("scaler unavailable"))?;
        let mut rgba = ffmpeg_next::frame::Video::empty();
        scaler.run(frame, &mut rgba)?;

        let stride = rgba.stride(0);
        let row = width as usize * 4;
        let data = rgba.data(0);
        let mut pixels = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            pixels.extend_from_slice(&data[y * stride..y * stride + row]);
        }
        Texture::from_rgba(width, height, pixels)
    }
}

impl DecoderEngine for FfmpegDecoder {
    fn decode(&mut self, sample: Sample) -> anyhow::Result<Vec<DecodedFrame>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(&sample.data);
        packet.set_pts(Some(sample.pts_us));
        packet.set_dts(Some(sample.dts_us));
        if sample.is_key {
            packet.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        self.decoder.send_packet(&packet)?;
        self.receive_frames()
    }

    fn flush(&mut self) -> anyhow::Result<Vec<DecodedFrame>> {
        self.decoder.send_eof()?;
        self.receive_frames()
    }
}
