//! Frequency-domain magnitude attenuation.
//!
//! Each channel is taken through a 2-D FFT (rows, then columns), every
//! coefficient's magnitude is scaled by `factor` with its phase kept, and the
//! inverse transform brings it back. Perturbations made this way are
//! low-frequency and visually coherent compared to per-pixel noise.

use ndarray::{Array3, ArrayView3};
use protego_core::{Result, ScanError};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::trace;

/// Planned forward/inverse FFTs for a fixed image size.
pub struct SpectralAttenuator {
    height: usize,
    width: usize,
    factor: f32,
    row_forward: Arc<dyn Fft<f32>>,
    row_inverse: Arc<dyn Fft<f32>>,
    col_forward: Arc<dyn Fft<f32>>,
    col_inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for SpectralAttenuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralAttenuator")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("factor", &self.factor)
            .finish()
    }
}

impl SpectralAttenuator {
    pub fn new(height: usize, width: usize, factor: f32) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            height,
            width,
            factor,
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Attenuate every frequency magnitude of every channel.
    pub fn apply(&self, image: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (h, w, channels) = image.dim();
        if (h, w) != (self.height, self.width) {
            return Err(ScanError::shape_mismatch(
                &[self.height, self.width, channels],
                image.shape(),
            ));
        }

        let n = h * w;
        let norm = 1.0 / n as f32;
        let mut out = Array3::zeros((h, w, channels));
        let mut rows = vec![Complex::new(0.0_f32, 0.0); n];
        let mut cols = vec![Complex::new(0.0_f32, 0.0); n];

        for c in 0..channels {
            for y in 0..h {
                for x in 0..w {
                    rows[y * w + x] = Complex::new(image[[y, x, c]], 0.0);
                }
            }

            // `process` transforms the buffer in chunks of the planned length.
            self.row_forward.process(&mut rows);
            transpose(&rows, &mut cols, h, w);
            self.col_forward.process(&mut cols);

            for coeff in cols.iter_mut() {
                *coeff = Complex::from_polar(coeff.norm() * self.factor, coeff.arg());
            }

            self.col_inverse.process(&mut cols);
            transpose(&cols, &mut rows, w, h);
            self.row_inverse.process(&mut rows);

            for y in 0..h {
                for x in 0..w {
                    out[[y, x, c]] = rows[y * w + x].re * norm;
                }
            }
        }

        trace!(height = h, width = w, factor = self.factor, "Spectral attenuation applied");
        Ok(out)
    }
}

/// Row-major (rows x cols) -> row-major (cols x rows).
fn transpose(src: &[Complex<f32>], dst: &mut [Complex<f32>], rows: usize, cols: usize) {
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}
