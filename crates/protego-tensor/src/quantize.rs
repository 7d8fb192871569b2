//! Lossy bridge between continuous working images and 8-bit pixels.
//!
//! Quantization clamps into the domain first, then scales to [0, 255] and
//! truncates: `q = floor((clamp(x, lo, hi) - lo) * 255 / (hi - lo))`. For the
//! unit domain this is exactly `floor(clamp(x, 0, 1) * 255)`. The order
//! matters: a borderline perturbation that survives clamping can still be
//! truncated away.

use ndarray::{Array3, ArrayView3};
use protego_core::Domain;

#[inline]
fn scale_for(domain: Domain) -> f32 {
    255.0 / domain.width()
}

#[inline]
fn quantize_value(x: f32, domain: Domain, scale: f32) -> u8 {
    let scaled = (domain.clamp(x) - domain.lower) * scale;
    // NaN saturates to 0 under `as`.
    scaled.floor().clamp(0.0, 255.0) as u8
}

/// Smallest representable `f32` above `x`.
#[inline]
fn next_up(x: f32) -> f32 {
    if x.is_nan() || x == f32::INFINITY {
        x
    } else if x == 0.0 {
        f32::from_bits(1)
    } else if x > 0.0 {
        f32::from_bits(x.to_bits() + 1)
    } else {
        f32::from_bits(x.to_bits() - 1)
    }
}

/// Quantize a domain-valued image to 8 bits.
pub fn quantize_u8(image: ArrayView3<'_, f32>, domain: Domain) -> Array3<u8> {
    let scale = scale_for(domain);
    image.mapv(|x| quantize_value(x, domain, scale))
}

/// Map 8-bit pixels into a domain: `lo + q * (hi - lo) / 255`.
///
/// Exact inverse of [`quantize_u8`]: `quantize_u8(dequantize(q)) == q` for
/// every level in every domain.
pub fn dequantize(pixels: ArrayView3<'_, u8>, domain: Domain) -> Array3<f32> {
    let scale = scale_for(domain);
    let mut levels = [0.0_f32; 256];
    for (q, level) in (0..=u8::MAX).zip(levels.iter_mut()) {
        let mut x = domain.lower + f32::from(q) / scale;
        // f32 rounding can leave x a few ulps under its bucket, e.g. -1 + q/127.5.
        while quantize_value(x, domain, scale) < q {
            x = next_up(x);
        }
        *level = x;
    }
    pixels.mapv(|q| levels[usize::from(q)])
}
