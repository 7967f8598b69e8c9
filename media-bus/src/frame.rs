use bytes::Bytes;
use jpeg_encoder::{ColorType, Encoder};

const RGBA: usize = 4;

/// Column-major 4x4 matrix applied to texture coordinates before sampling.
pub type TransformMatrix = [f32; 16];

pub const IDENTITY: TransformMatrix = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// RGBA8 picture buffer, rows top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    /// Opaque black texture.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 255])
    }

    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let len = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(len * RGBA);
        for _ in 0..len {
            pixels.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> anyhow::Result<Self> {
        let expected = width as usize * height as usize * RGBA;
        if pixels.len() != expected {
            anyhow::bail!(
                "rgba buffer of {} bytes does not match {}x{}",
                pixels.len(),
                width,
                height
            );
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = self.offset(x, y);
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[offset..offset + RGBA]);
        px
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, px: [u8; 4]) {
        let offset = self.offset(x, y);
        self.pixels[offset..offset + RGBA].copy_from_slice(&px);
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * RGBA
    }
}

/// A decoded picture handed from the decoder to the render thread.
#[derive(Debug)]
pub struct DecodedFrame {
    pub texture: Texture,
    pub transform: TransformMatrix,
    pub pts_us: i64,
}

impl DecodedFrame {
    pub fn new(texture: Texture, pts_us: i64) -> Self {
        Self {
            texture,
            transform: IDENTITY,
            pts_us,
        }
    }
}

/// A picture composited at the target resolution, ready for the encoder.
#[derive(Debug)]
pub struct ComposedFrame {
    pub texture: Texture,
    pub pts_us: i64,
}

/// JPEG snapshot of a composited frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub jpeg: Bytes,
}

impl Thumbnail {
    pub const QUALITY: u8 = 80;

    pub fn encode(texture: &Texture, quality: u8) -> anyhow::Result<Self> {
        let width = u16::try_from(texture.width())?;
        let height = u16::try_from(texture.height())?;
        let mut jpeg = Vec::new();
        Encoder::new(&mut jpeg, quality).encode(texture.pixels(), width, height, ColorType::Rgba)?;
        Ok(Self {
            width: texture.width(),
            height: texture.height(),
            jpeg: Bytes::from(jpeg),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgba_checks_length() {
        assert!(Texture::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(Texture::from_rgba(2, 2, vec![0; 15]).is_err());
    }

    #[test]
    fn pixels_round_trip_through_coordinates() {
        let mut texture = Texture::new(4, 3);
        texture.put_pixel(3, 2, [10, 20, 30, 255]);
        assert_eq!(texture.pixel(3, 2), [10, 20, 30, 255]);
        assert_eq!(texture.pixel(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn thumbnail_is_a_jpeg() -> anyhow::Result<()> {
        let texture = Texture::filled(32, 18, [200, 40, 40, 255]);
        let thumb = Thumbnail::encode(&texture, Thumbnail::QUALITY)?;
        assert_eq!((thumb.width, thumb.height), (32, 18));
        assert_eq!(&thumb.jpeg[..2], &[0xFF, 0xD8]);
        Ok(())
    }
}
