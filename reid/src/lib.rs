//! Appearance re-identification feature extraction (§4.3,
//! component C6).
//!
//! The accelerator-backed embedding network itself is out of this
//! workspace's scope (§1: "model-file-format parsing beyond the
//! operational contract the detector consumes"); what lives here is the
//! *contract* — crop, normalize, L2-normalize — plus a deterministic
//! color-histogram extractor that stands in for the network so the rest
//! of the pipeline (tracker, registry) can be exercised end-to-end.

use vision_types::{BBox, Frame, PixelFormat};

pub const EMBEDDING_DIM: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub features: Vec<f32>,
    pub valid: bool,
}

impl Embedding {
    pub fn invalid() -> Self {
        Self {
            features: Vec::new(),
            valid: false,
        }
    }
}

pub trait ReIdExtractor: Send {
    /// Produce one embedding per input box, same index as the input
    /// (§4.3 "Invariants"). Crops are taken internally.
    fn extract(
        &self,
        frame: &Frame,
        bboxes: &[BBox],
        class_ids: &[u32],
        confidences: &[f32],
    ) -> Vec<Embedding>;
}

/// Cosine similarity on unit-norm vectors; mismatched dims or empty
/// inputs yield `0.0` (§4.3 "Similarity").
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    vision_types::cosine_similarity(a, b)
}

/// A deterministic appearance extractor based on a coarse color
/// histogram of the cropped region, L2-normalized to `EMBEDDING_DIM`.
/// Stands in for an accelerator-backed ReID network (see module docs).
pub struct HistogramReIdExtractor {
    bins_per_channel: usize,
}

impl Default for HistogramReIdExtractor {
    fn default() -> Self {
        Self {
            bins_per_channel: EMBEDDING_DIM / 3 + 1,
        }
    }
}

impl HistogramReIdExtractor {
    fn crop_histogram(&self, frame: &Frame, bbox: &BBox) -> Option<Vec<f32>> {
        let clamped = bbox.clamp_to(frame.width as f32, frame.height as f32)?;
        let x0 = clamped.x as u32;
        let y0 = clamped.y as u32;
        let w = clamped.w as u32;
        let h = clamped.h as u32;
        if w == 0 || h == 0 {
            return None;
        }

        let bpp = frame.format.bytes_per_pixel();
        let stride = frame.stride();
        let bins = self.bins_per_channel;
        let mut hist = vec![0f32; bins * 3];
        let mut count = 0f32;

        let (r_off, g_off, b_off) = match frame.format {
            PixelFormat::Rgb8 => (0, 1, 2),
            PixelFormat::Bgr8 => (2, 1, 0),
        };

        for row in y0..(y0 + h) {
            let row_base = row as usize * stride;
            for col in x0..(x0 + w) {
                let px = row_base + col as usize * bpp;
                if px + 2 >= frame.data.len() {
                    continue;
                }
                let r = frame.data[px + r_off];
                let g = frame.data[px + g_off];
                let b = frame.data[px + b_off];
                hist[bin_index(r, bins)] += 1.0;
                hist[bins + bin_index(g, bins)] += 1.0;
                hist[2 * bins + bin_index(b, bins)] += 1.0;
                count += 1.0;
            }
        }

        if count == 0.0 {
            return None;
        }

        hist.truncate(EMBEDDING_DIM.min(hist.len()));
        hist.resize(EMBEDDING_DIM, 0.0);

        let norm: f32 = hist.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in hist.iter_mut() {
                *v /= norm;
            }
        }
        Some(hist)
    }
}

fn bin_index(value: u8, bins: usize) -> usize {
    let idx = (value as usize * bins) / 256;
    idx.min(bins - 1)
}

impl ReIdExtractor for HistogramReIdExtractor {
    fn extract(
        &self,
        frame: &Frame,
        bboxes: &[BBox],
        _class_ids: &[u32],
        _confidences: &[f32],
    ) -> Vec<Embedding> {
        bboxes
            .iter()
            .map(|bbox| match self.crop_histogram(frame, bbox) {
                Some(features) => Embedding {
                    features,
                    valid: true,
                },
                None => Embedding::invalid(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(w: u32, h: u32, color: [u8; 3]) -> Frame {
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for _ in 0..(w * h) {
            data.extend_from_slice(&color);
        }
        Frame::new(w, h, PixelFormat::Rgb8, data)
    }

    #[test]
    fn embedding_is_l2_normalized() {
        let frame = solid_frame(20, 20, [200, 50, 10]);
        let ex = HistogramReIdExtractor::default();
        let out = ex.extract(&frame, &[BBox::new(0.0, 0.0, 20.0, 20.0)], &[0], &[0.9]);
        assert!(out[0].valid);
        let norm: f32 = out[0].features.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[test]
    fn degenerate_box_is_invalid() {
        let frame = solid_frame(20, 20, [0, 0, 0]);
        let ex = HistogramReIdExtractor::default();
        let out = ex.extract(&frame, &[BBox::new(-50.0, -50.0, 1.0, 1.0)], &[0], &[0.9]);
        assert!(!out[0].valid);
        assert!(out[0].features.is_empty());
    }

    #[test]
    fn same_index_as_input() {
        let frame = solid_frame(20, 20, [10, 10, 10]);
        let boxes = vec![
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(-50.0, -50.0, 1.0, 1.0),
            BBox::new(5.0, 5.0, 10.0, 10.0),
        ];
        let ex = HistogramReIdExtractor::default();
        let out = ex.extract(&frame, &boxes, &[0, 0, 0], &[0.9, 0.9, 0.9]);
        assert_eq!(out.len(), 3);
        assert!(out[0].valid);
        assert!(!out[1].valid);
        assert!(out[2].valid);
    }
}
