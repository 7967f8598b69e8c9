use ffmpeg_next::{
    format::Pixel,
    software::scaling::{Context, flag::Flags},
};

/// Pixel format and size conversion for one fixed input shape.
pub struct Scaler {
    context: Context,
    input: (Pixel, u32, u32),
}

impl Scaler {
    pub fn new(
        input: (Pixel, u32, u32),
        output: (Pixel, u32, u32),
    ) -> anyhow::Result<Self> {
        let context = Context::get(
            input.0,
            input.1,
            input.2,
            output.0,
            output.1,
            output.2,
            Flags::BILINEAR,
        )?;
        Ok(Self { context, input })
    }

    pub fn accepts(&self, input: (Pixel, u32, u32)) -> bool {
        self.input == input
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

unsafe impl Send for Scaler {}
