//! Bilinear resampling of (H, W, C) images with half-pixel centres.

use ndarray::{Array3, ArrayView3};

/// Source coordinate and blend weight for one output index.
#[inline]
fn sample_coord(out_idx: usize, in_len: usize, out_len: usize) -> (usize, usize, f32) {
    let scale = in_len as f32 / out_len as f32;
    let src = ((out_idx as f32 + 0.5) * scale - 0.5).clamp(0.0, (in_len - 1) as f32);
    let lo = src.floor() as usize;
    let hi = (lo + 1).min(in_len - 1);
    (lo, hi, src - lo as f32)
}

/// Resize to (height, width). Returns a copy when the size already matches.
pub fn resize_bilinear(image: ArrayView3<'_, f32>, height: usize, width: usize) -> Array3<f32> {
    let (in_h, in_w, channels) = image.dim();
    if (in_h, in_w) == (height, width) {
        return image.to_owned();
    }
    if in_h == 0 || in_w == 0 {
        return Array3::zeros((height, width, channels));
    }

    let cols: Vec<(usize, usize, f32)> = (0..width)
        .map(|x| sample_coord(x, in_w, width))
        .collect();

    let mut out = Array3::zeros((height, width, channels));
    for y in 0..height {
        let (y0, y1, wy) = sample_coord(y, in_h, height);
        for (x, &(x0, x1, wx)) in cols.iter().enumerate() {
            for c in 0..channels {
                let top = image[[y0, x0, c]] * (1.0 - wx) + image[[y0, x1, c]] * wx;
                let bottom = image[[y1, x0, c]] * (1.0 - wx) + image[[y1, x1, c]] * wx;
                out[[y, x, c]] = top * (1.0 - wy) + bottom * wy;
            }
        }
    }
    out
}
