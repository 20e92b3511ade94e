//! Letterbox + color-convert + cast preprocessing (§4.2 steps 1-3,
//! component C2 `PreprocBuffer`).
//!
//! Reused per-worker across frames; never aliased across workers (§5
//! "Memory discipline").

use vision_types::{Frame, LetterboxInfo, PixelFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDtype {
    Uint8,
    Float32,
}

/// Per-worker scratch buffer, reused across submissions.
pub struct PreprocBuffer {
    pub model_w: u32,
    pub model_h: u32,
    /// uint8 staging, used when `dtype == Uint8`.
    u8_scratch: Vec<u8>,
    /// float32 staging, used when `dtype == Float32`.
    f32_scratch: Vec<f32>,
}

pub enum PreprocessedInput<'a> {
    Uint8(&'a [u8]),
    Float32(&'a [f32]),
}

impl PreprocBuffer {
    pub fn new(model_w: u32, model_h: u32) -> Self {
        let n = (model_w * model_h * 3) as usize;
        Self {
            model_w,
            model_h,
            u8_scratch: vec![0u8; n],
            f32_scratch: vec![0f32; n],
        }
    }

    /// Letterbox-resize (nearest-neighbor, adequate at this abstraction
    /// level; the real accelerator path would use a hardware resizer),
    /// BGR/RGB swap to RGB, and cast to the requested dtype (§4.2
    /// steps 1-3). Padding color is `(114,114,114)` for float or zero for
    /// uint8, as required by the head (§4.2 step 1).
    pub fn process<'a>(
        &'a mut self,
        frame: &Frame,
        dtype: InputDtype,
    ) -> (PreprocessedInput<'a>, LetterboxInfo) {
        let lb = LetterboxInfo::compute(
            frame.width as f32,
            frame.height as f32,
            self.model_w as f32,
            self.model_h as f32,
        );

        let pad_u8 = match dtype {
            InputDtype::Uint8 => 0u8,
            InputDtype::Float32 => 114u8,
        };

        let new_w = (frame.width as f32 * lb.scale).round() as u32;
        let new_h = (frame.height as f32 * lb.scale).round() as u32;
        let x_pad = lb.x_pad.round() as u32;
        let y_pad = lb.y_pad.round() as u32;

        let mw = self.model_w;
        let mh = self.model_h;

        self.u8_scratch.iter_mut().for_each(|v| *v = pad_u8);

        let src_bpp = frame.format.bytes_per_pixel();
        let src_stride = frame.stride();
        let (r_off, g_off, b_off) = match frame.format {
            PixelFormat::Rgb8 => (0, 1, 2),
            PixelFormat::Bgr8 => (2, 1, 0),
        };

        for out_y in 0..new_h.min(mh.saturating_sub(y_pad)) {
            // nearest-neighbor sample from source
            let src_y = ((out_y as f32 + 0.5) / lb.scale).floor() as u32;
            let src_y = src_y.min(frame.height.saturating_sub(1));
            for out_x in 0..new_w.min(mw.saturating_sub(x_pad)) {
                let src_x = ((out_x as f32 + 0.5) / lb.scale).floor() as u32;
                let src_x = src_x.min(frame.width.saturating_sub(1));

                let src_idx = src_y as usize * src_stride + src_x as usize * src_bpp;
                if src_idx + 2 >= frame.data.len() {
                    continue;
                }
                let r = frame.data[src_idx + r_off];
                let g = frame.data[src_idx + g_off];
                let b = frame.data[src_idx + b_off];

                let dst_y = out_y + y_pad;
                let dst_x = out_x + x_pad;
                let dst_idx = (dst_y as usize * mw as usize + dst_x as usize) * 3;
                if dst_idx + 2 < self.u8_scratch.len() {
                    self.u8_scratch[dst_idx] = r;
                    self.u8_scratch[dst_idx + 1] = g;
                    self.u8_scratch[dst_idx + 2] = b;
                }
            }
        }

        match dtype {
            InputDtype::Uint8 => (PreprocessedInput::Uint8(&self.u8_scratch), lb),
            InputDtype::Float32 => {
                for (dst, src) in self.f32_scratch.iter_mut().zip(self.u8_scratch.iter()) {
                    *dst = *src as f32 / 255.0;
                }
                (PreprocessedInput::Float32(&self.f32_scratch), lb)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_types::PixelFormat;

    #[test]
    fn letterbox_padding_matches_s1() {
        let mut scratch = PreprocBuffer::new(640, 640);
        let frame = Frame::new(1280, 720, PixelFormat::Rgb8, vec![128u8; 1280 * 720 * 3]);
        let (_input, lb) = scratch.process(&frame, InputDtype::Uint8);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.y_pad, 140.0);
        assert_eq!(lb.x_pad, 0.0);
    }
}
