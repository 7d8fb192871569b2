//! Domain-tagged working images and the element-wise operations attacks need.

use ndarray::{Array3, ArrayD, ArrayView3, Axis, Ix3, Zip};
use protego_core::{Domain, Result, ScanError, CHANNELS};
use rand::Rng;
use std::f32::consts::PI;

/// Element-wise sign with `sign(0) = 0`.
///
/// `f32::signum` maps `+0.0` to `1.0`, which would move pixels whose gradient
/// is exactly zero.
#[inline]
pub fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// One N(0, 1) draw via the Box-Muller transform.
#[inline]
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // 1 - u lies in (0, 1], keeping ln finite.
    let u1 = 1.0 - rng.random::<f32>();
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Isotropic Gaussian noise N(0, std^2) of the given shape.
pub fn gaussian_noise<R: Rng + ?Sized>(
    shape: (usize, usize, usize),
    std: f32,
    rng: &mut R,
) -> Array3<f32> {
    Array3::from_shape_simple_fn(shape, || standard_normal(rng) * std)
}

/// A mutable (H, W, 3) image owned by a single attack invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingImage {
    data: Array3<f32>,
    domain: Domain,
}

impl WorkingImage {
    /// Wrap an existing tensor. The last axis must hold three channels.
    ///
    /// The data is not clipped; call [`clip`](Self::clip) before inference.
    pub fn new(data: Array3<f32>, domain: Domain) -> Result<Self> {
        if data.shape()[2] != CHANNELS {
            return Err(ScanError::shape_mismatch(
                &[data.shape()[0], data.shape()[1], CHANNELS],
                data.shape(),
            ));
        }
        Ok(Self { data, domain })
    }

    /// Accept a (H, W, 3) tensor or a (1, H, W, 3) batch of one.
    pub fn from_batched(data: ArrayD<f32>, domain: Domain) -> Result<Self> {
        let data = match data.ndim() {
            4 if data.shape()[0] == 1 => data.index_axis_move(Axis(0), 0),
            3 => data,
            _ => {
                return Err(ScanError::Inference(format!(
                    "expected an (H, W, 3) image or a batch of one, got shape {:?}",
                    data.shape()
                )))
            }
        };
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|e| ScanError::Inference(format!("Failed to squeeze batch dimension: {e}")))?;
        Self::new(data, domain)
    }

    /// Uniform noise over the whole domain.
    pub fn uniform<R: Rng + ?Sized>(
        height: usize,
        width: usize,
        domain: Domain,
        rng: &mut R,
    ) -> Self {
        let data = Array3::from_shape_simple_fn((height, width, CHANNELS), || {
            rng.random_range(domain.lower..=domain.upper)
        });
        Self { data, domain }
    }

    /// Constant image, clamped into the domain.
    pub fn filled(height: usize, width: usize, value: f32, domain: Domain) -> Self {
        Self {
            data: Array3::from_elem((height, width, CHANNELS), domain.clamp(value)),
            domain,
        }
    }

    /// (height, width, channels).
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clamp every element into the domain.
    pub fn clip(&mut self) {
        let domain = self.domain;
        self.data.mapv_inplace(|v| domain.clamp(v));
    }

    pub fn clipped(mut self) -> Self {
        self.clip();
        self
    }

    pub fn is_within_domain(&self) -> bool {
        self.data.iter().all(|&v| self.domain.contains(v))
    }

    fn check_shape(&self, other: &[usize]) -> Result<()> {
        if self.data.shape() != other {
            return Err(ScanError::shape_mismatch(self.data.shape(), other));
        }
        Ok(())
    }

    /// `x <- clip(x + step * sign(direction))`.
    pub fn signed_step(&mut self, direction: ArrayView3<'_, f32>, step: f32) -> Result<()> {
        self.check_shape(direction.shape())?;
        let domain = self.domain;
        Zip::from(&mut self.data)
            .and(&direction)
            .for_each(|x, &d| *x = domain.clamp(*x + step * sign(d)));
        Ok(())
    }

    /// Candidate `clip(x + step * sign(direction))`, leaving `self` untouched.
    pub fn signed_candidate(&self, direction: ArrayView3<'_, f32>, step: f32) -> Result<Self> {
        let mut candidate = self.clone();
        candidate.signed_step(direction, step)?;
        Ok(candidate)
    }

    /// Candidate `clip(x + N(0, std^2))`.
    pub fn noisy_candidate<R: Rng + ?Sized>(&self, std: f32, rng: &mut R) -> Self {
        let mut candidate = self.clone();
        let domain = self.domain;
        for v in candidate.data.iter_mut() {
            *v = domain.clamp(*v + std * standard_normal(rng));
        }
        candidate
    }

    /// Replace the pixel data with `data`, clipped into this image's domain.
    pub fn assign_clipped(&mut self, data: Array3<f32>) -> Result<()> {
        self.check_shape(data.shape())?;
        self.data = data;
        self.clip();
        Ok(())
    }
}
