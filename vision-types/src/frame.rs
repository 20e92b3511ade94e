//! Minimal owned frame buffer shared across crates.
//!
//! `FrameResult.frame` only needs to carry "raw RGB/BGR image + (W,H)",
//! far short of a full `owned::OImage`-style surface (see DESIGN.md), so
//! rather than depend on a surface we can't verify, this crate defines
//! the small subset of that idea it actually needs: a packed, row-major
//! pixel buffer plus its format tag.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * format.bytes_per_pixel()
        );
        Self {
            width,
            height,
            format,
            data,
        }
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}
