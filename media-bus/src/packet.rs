use bytes::Bytes;

/// One compressed access unit. Ownership moves from the demuxer to exactly
/// one consumer; samples are never shared.
#[derive(Debug)]
pub struct Sample {
    pub track_index: usize,
    pub data: Bytes,
    pub pts_us: i64,
    pub dts_us: i64,
    /// Duration in microseconds, 0 when unknown.
    pub duration_us: i64,
    pub is_key: bool,
}

impl Sample {
    pub fn new(track_index: usize, data: Bytes, pts_us: i64, is_key: bool) -> Self {
        Self {
            track_index,
            data,
            pts_us,
            dts_us: pts_us,
            duration_us: 0,
            is_key,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Input to a decoder: a sample, or the end of the track.
#[derive(Debug)]
pub enum SampleCmd {
    Data(Sample),
    Eof,
}
