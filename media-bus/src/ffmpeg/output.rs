use std::path::Path;

use ffmpeg_next::Rational;

use super::{MICROS, stream::AvStream};
use crate::{output::ContainerWriter, packet::Sample, track::TrackDescriptor};

/// MP4 writer over libavformat. Samples are written interleaved.
pub struct FfmpegWriter {
    inner: ffmpeg_next::format::context::Output,
    time_bases: Vec<Rational>,
    have_written_header: bool,
    have_written_trailer: bool,
}

unsafe impl Send for FfmpegWriter {}

impl FfmpegWriter {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let output = ffmpeg_next::format::output_as(path, "mp4")?;
        Ok(Self {
            inner: output,
            time_bases: Vec::new(),
            have_written_header: false,
            have_written_trailer: false,
        })
    }
}

impl ContainerWriter for FfmpegWriter {
    fn add_track(&mut self, track: &TrackDescriptor) -> anyhow::Result<usize> {
        if self.have_written_header {
            anyhow::bail!("cannot add track {} after start", track.mime);
        }
        let stream = track
            .codec
            .as_ref()
            .and_then(|codec| codec.downcast_ref::<AvStream>())
            .ok_or_else(|| anyhow::anyhow!("track {} has no ffmpeg parameters", track.mime))?;
        let parameters = stream.parameters();
        let mut writer_stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(parameters.id()))?;
        writer_stream.set_parameters(parameters.clone());
        writer_stream.set_time_base(stream.time_base());
        unsafe {
            (*(*writer_stream.as_mut_ptr()).codecpar).codec_tag = 0;
        }
        self.time_bases.push(stream.time_base());
        Ok(writer_stream.index())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if self.have_written_header {
            anyhow::bail!("writer already started");
        }
        self.inner.write_header()?;
        self.have_written_header = true;
        // The muxer may pick its own time bases when writing the header.
        for (index, time_base) in self.time_bases.iter_mut().enumerate() {
            if let Some(stream) = self.inner.stream(index) {
                *time_base = stream.time_base();
            }
        }
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: Sample) -> anyhow::Result<()> {
        if !self.have_written_header {
            anyhow::bail!("sample written before start");
        }
        let out_time_base = *self
            .time_bases
            .get(track)
            .ok_or_else(|| anyhow::anyhow!("stream not found: {}", track))?;
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(&sample.data);
        packet.set_pts(Some(sample.pts_us));
        packet.set_dts(Some(sample.dts_us));
        packet.set_duration(sample.duration_us);
        if sample.is_key {
            packet.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        packet.set_stream(track);
        packet.set_position(-1);
        packet.rescale_ts(MICROS, out_time_base);
        packet.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }
}
