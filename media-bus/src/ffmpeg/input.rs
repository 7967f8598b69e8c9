use std::{
    collections::{HashMap, HashSet},
    fs::File,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use ffmpeg_next::{Rescale, format::stream::Stream};

use super::{MICROS, stream::AvStream};
use crate::{
    packet::Sample,
    source::{ContentSource, Demuxer, SourceLocator},
    track::TrackDescriptor,
};

/// Local copy of a content locator, since the container reader needs a
/// seekable file. Removed on drop.
struct SpoolFile {
    path: PathBuf,
}

impl SpoolFile {
    fn copy_from(content: &dyn ContentSource) -> anyhow::Result<Self> {
        let spool = Self {
            path: std::env::temp_dir().join(format!("reframe-{}.spool", uuid::Uuid::new_v4())),
        };
        let mut reader = content.open()?;
        let mut file = File::create(&spool.path)?;
        std::io::copy(&mut reader, &mut file)?;
        Ok(spool)
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct FfmpegDemuxer {
    inner: ffmpeg_next::format::context::Input,
    streams: HashMap<usize, AvStream>,
    tracks: Vec<TrackDescriptor>,
    selected: HashSet<usize>,
    _spool: Option<SpoolFile>,
}

unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub fn open(locator: &SourceLocator) -> anyhow::Result<Self> {
        let spool = match locator {
            SourceLocator::File(_) => None,
            SourceLocator::Content(content) => Some(SpoolFile::copy_from(content.as_ref())?),
        };
        let path: &Path = match (locator, &spool) {
            (_, Some(spool)) => &spool.path,
            (SourceLocator::File(path), None) => path,
            (SourceLocator::Content(_), None) => anyhow::bail!("content was not spooled"),
        };
        let input = ffmpeg_next::format::input(path)
            .map_err(|e| anyhow::anyhow!("open {}: {}", locator, e))?;

        // Container duration is already in AV_TIME_BASE (microseconds).
        let container_us = input.duration().max(0);
        let mut streams = HashMap::new();
        let mut tracks = Vec::new();
        for stream in input.streams() {
            let duration_us = stream_duration_us(&stream).unwrap_or(container_us);
            let rotation = stream_rotation(&stream);
            let av = AvStream::from(stream);
            tracks.push(av.descriptor(duration_us, rotation));
            streams.insert(av.index(), av);
        }
        log::debug!("opened {} with {} tracks", locator, tracks.len());

        Ok(Self {
            inner: input,
            streams,
            tracks,
            selected: HashSet::new(),
            _spool: spool,
        })
    }
}

fn stream_duration_us(stream: &Stream<'_>) -> Option<i64> {
    let duration = stream.duration();
    if duration <= 0 || duration == ffmpeg_next::ffi::AV_NOPTS_VALUE {
        return None;
    }
    Some(duration.rescale(stream.time_base(), MICROS))
}

/// Clockwise display rotation from the display matrix, or the legacy
/// `rotate` tag.
fn stream_rotation(stream: &Stream<'_>) -> i32 {
    unsafe {
        let par = (*stream.as_ptr()).codecpar;
        if !par.is_null() {
            let side = ffmpeg_next::ffi::av_packet_side_data_get(
                (*par).coded_side_data,
                (*par).nb_coded_side_data,
                ffmpeg_next::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
            );
            if !side.is_null() && (*side).size >= 9 * std::mem::size_of::<i32>() {
                let counter_clockwise =
                    ffmpeg_next::ffi::av_display_rotation_get((*side).data as *const i32);
                if counter_clockwise.is_finite() {
                    return -(counter_clockwise.round() as i32);
                }
            }
        }
    }
    stream
        .metadata()
        .get("rotate")
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(0)
}

impl Demuxer for FfmpegDemuxer {
    fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> anyhow::Result<()> {
        if !self.streams.contains_key(&index) {
            anyhow::bail!("no track {}", index);
        }
        self.selected.insert(index);
        Ok(())
    }

    fn read_sample(&mut self) -> anyhow::Result<Option<Sample>> {
        loop {
            let Some((stream, packet)) = self.inner.packets().next() else {
                return Ok(None);
            };
            let index = stream.index();
            if !self.selected.contains(&index) {
                continue;
            }
            let time_base = stream.time_base();
            let pts = packet.pts().or(packet.dts()).unwrap_or(0);
            let dts = packet.dts().or(packet.pts()).unwrap_or(0);
            return Ok(Some(Sample {
                track_index: index,
                data: packet.data().map(Bytes::copy_from_slice).unwrap_or_default(),
                pts_us: pts.rescale(time_base, MICROS),
                dts_us: dts.rescale(time_base, MICROS),
                duration_us: packet.duration().max(0).rescale(time_base, MICROS),
                is_key: packet.is_key(),
            }));
        }
    }
}
